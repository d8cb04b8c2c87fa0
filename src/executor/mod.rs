//! Scenario execution seam.

pub mod command;

use crate::scheduler::discovery::Scenario;
use crate::types::{ObservationCounts, ScenarioStatus};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use self::command::CommandExecutor;

/// Per-run context handed to the executor.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub batch_id: String,
    pub artifact_dir: PathBuf,
    pub convoy: Option<String>,
}

/// What an executor reports back for one scenario run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: ScenarioStatus,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub observations: ObservationCounts,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub criteria_met: u32,
    #[serde(default)]
    pub criteria_total: u32,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn passed() -> Self {
        Self {
            status: ScenarioStatus::Passed,
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ScenarioStatus::Failed,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ScenarioStatus::Error,
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Runs a single scenario. An `Err` is reported as an `error` result for
/// that scenario only; the rest of the batch continues.
#[async_trait::async_trait]
pub trait ScenarioExecutor: Send + Sync {
    async fn execute(&self, scenario: &Scenario, params: &RunParams) -> Result<ExecutionOutcome>;

    /// Program the executor depends on, for preflight PATH checks.
    fn program(&self) -> Option<&str> {
        None
    }
}
