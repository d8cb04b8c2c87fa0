//! Flake detection: run history, windowed metrics, and the quarantine state machine.

pub mod classify;
pub mod engine;
pub mod history;
pub mod metrics;
pub mod quarantine;

use serde::{Deserialize, Serialize};

pub use self::classify::{InfraErrorPredicate, MarkerClassifier, DEFAULT_INFRA_MARKERS};
pub use self::engine::{FlakeDetector, PersistFailure};
pub use self::history::{Outcome, RunRecord, ScenarioHistory};
pub use self::metrics::FlakeMetrics;
pub use self::quarantine::{ActionKind, QuarantineAction, QuarantineEntry};

/// Thresholds and switches for flake classification and automatic quarantine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Number of most recent runs considered for classification.
    pub window_size: usize,
    /// Flake rate at or above which a scenario is flaky.
    pub flake_threshold: f64,
    /// Windowed runs required before any classification or policy decision.
    pub min_runs: u32,
    /// Quarantine flaky scenarios automatically.
    pub auto_quarantine: bool,
    /// Release automatically quarantined scenarios once they recover.
    pub auto_unquarantine: bool,
    /// Success rate at or above which an auto-quarantined scenario is released.
    pub unquarantine_threshold: f64,
    /// Quarantine after this many consecutive failures. `0` disables.
    pub consecutive_failures_threshold: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            flake_threshold: 0.3,
            min_runs: 3,
            auto_quarantine: true,
            auto_unquarantine: false,
            unquarantine_threshold: 0.9,
            consecutive_failures_threshold: 0,
        }
    }
}

impl DetectorConfig {
    /// Stored history length: twice the window, so a later window-size
    /// increase still has data to work with.
    pub fn retained_runs(&self) -> usize {
        self.window_size.max(1) * 2
    }
}
