//! Batch and per-scenario results, as written to the batch manifest.

use crate::analysis::comparison::Comparison;
use crate::detect::QuarantineAction;
use crate::scheduler::discovery::Scenario;
use crate::scheduler::BatchConfig;
use crate::types::{ObservationCounts, ScenarioStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub path: PathBuf,
    pub status: ScenarioStatus,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub observations: ObservationCounts,
    #[serde(default)]
    pub criteria_met: u32,
    #[serde(default)]
    pub criteria_total: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,
    #[serde(default)]
    pub quarantined: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl ScenarioResult {
    pub fn pending(scenario: &Scenario) -> Self {
        Self {
            name: scenario.name.clone(),
            path: scenario.path.clone(),
            status: ScenarioStatus::Pending,
            duration_ms: 0,
            observations: ObservationCounts::new(),
            criteria_met: 0,
            criteria_total: 0,
            retry_count: 0,
            error: None,
            artifact_dir: None,
            quarantined: false,
            skip_reason: None,
        }
    }

    pub fn skipped(scenario: &Scenario, reason: impl Into<String>) -> Self {
        Self {
            status: ScenarioStatus::Skipped,
            skip_reason: Some(reason.into()),
            ..Self::pending(scenario)
        }
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.status = ScenarioStatus::Skipped;
        self.skip_reason = Some(reason.into());
    }

    /// Attempts made, counting the first run.
    pub fn run_count(&self) -> u32 {
        self.retry_count + 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    #[serde(default)]
    pub observations: ObservationCounts,
    #[serde(default)]
    pub total_retries: u64,
    #[serde(default)]
    pub flake_rate: f64,
    #[serde(default)]
    pub auto_quarantined: Vec<String>,
    #[serde(default)]
    pub auto_unquarantined: Vec<String>,
    #[serde(default)]
    pub flaky_scenarios: Vec<String>,
    #[serde(default)]
    pub new_quarantine_candidates: Vec<String>,
}

impl BatchSummary {
    /// Whether any scenario failed or errored.
    pub fn has_failures(&self) -> bool {
        self.failed + self.errors > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub id: String,
    pub config: BatchConfig,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub scenarios_found: usize,
    pub scenarios_run: usize,
    pub scenarios_skipped: usize,
    pub results: Vec<ScenarioResult>,
    pub summary: BatchSummary,
    #[serde(default)]
    pub actions: Vec<QuarantineAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
    /// Where the manifest was written. Not part of the manifest itself.
    #[serde(skip)]
    pub manifest_path: Option<PathBuf>,
}

impl BatchResult {
    pub fn result(&self, name: &str) -> Option<&ScenarioResult> {
        self.results.iter().find(|r| r.name == name)
    }
}
