//! Per-scenario run history with lifetime counters and streaks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single scenario execution as seen by the flake detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
    Skip,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Pass => write!(f, "pass"),
            Outcome::Fail => write!(f, "fail"),
            Outcome::Error => write!(f, "error"),
            Outcome::Skip => write!(f, "skip"),
        }
    }
}

/// How a record contributes to totals, streaks and window counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutcomeClass {
    Pass,
    Failure,
    Error,
    Uncounted,
}

/// One observed execution. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default)]
    pub infrastructure_error: bool,
}

impl RunRecord {
    /// A record stamped with the current time.
    pub fn new(outcome: Outcome) -> Self {
        Self::at(outcome, Utc::now())
    }

    pub fn at(outcome: Outcome, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            outcome,
            retry_count: 0,
            duration_ms: 0,
            batch_id: None,
            error_type: None,
            infrastructure_error: false,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_infrastructure_error(mut self, infra: bool) -> Self {
        self.infrastructure_error = infra;
        self
    }

    /// An `error` that is not attributed to infrastructure counts as a failure.
    pub(crate) fn class(&self) -> OutcomeClass {
        match self.outcome {
            Outcome::Pass => OutcomeClass::Pass,
            Outcome::Fail => OutcomeClass::Failure,
            Outcome::Error if self.infrastructure_error => OutcomeClass::Error,
            Outcome::Error => OutcomeClass::Failure,
            Outcome::Skip => OutcomeClass::Uncounted,
        }
    }
}

/// Bounded run history for one scenario, newest run first.
///
/// `total_runs == total_passes + total_failures + total_errors` holds after
/// every [`append`](Self::append); skips are stored but never counted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioHistory {
    pub scenario: String,
    #[serde(default)]
    pub runs: Vec<RunRecord>,
    #[serde(default)]
    pub first_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_runs: u64,
    #[serde(default)]
    pub total_passes: u64,
    #[serde(default)]
    pub total_failures: u64,
    #[serde(default)]
    pub total_errors: u64,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub consecutive_passes: u32,
}

impl ScenarioHistory {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            ..Default::default()
        }
    }

    /// Push `record` to the front, update counters, and keep at most `retain` runs.
    pub fn append(&mut self, record: RunRecord, retain: usize) {
        if self.first_run.is_none() {
            self.first_run = Some(record.timestamp);
        }
        self.last_run = Some(record.timestamp);

        match record.class() {
            OutcomeClass::Pass => {
                self.total_runs += 1;
                self.total_passes += 1;
                self.consecutive_passes += 1;
                self.consecutive_failures = 0;
            }
            OutcomeClass::Failure => {
                self.total_runs += 1;
                self.total_failures += 1;
                self.consecutive_failures += 1;
                self.consecutive_passes = 0;
            }
            OutcomeClass::Error => {
                self.total_runs += 1;
                self.total_errors += 1;
                self.consecutive_failures += 1;
                self.consecutive_passes = 0;
            }
            OutcomeClass::Uncounted => {}
        }

        self.runs.insert(0, record);
        self.runs.truncate(retain.max(1));
    }

    /// The newest `size` runs.
    pub fn window(&self, size: usize) -> &[RunRecord] {
        &self.runs[..self.runs.len().min(size)]
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        self.runs.first().map(|r| r.outcome)
    }
}
