//! Batch scheduler: discover, filter, execute on a bounded pool, record, summarize.

pub mod discovery;
pub mod engine;
pub mod result;
pub mod summary;

use crate::analysis::comparison;
use crate::detect::{FlakeDetector, InfraErrorPredicate, MarkerClassifier};
use crate::executor::ScenarioExecutor;
use crate::preflight::PreflightChecker;
use crate::quarantine::QuarantineLookup;
use crate::storage::ManifestStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use self::discovery::Scenario;
pub use self::result::{BatchResult, BatchSummary, ScenarioResult};

/// Skip reason for scenarios not dispatched after cancellation.
pub const SKIP_CANCELLED: &str = "context cancelled";
/// Skip reason for scenarios not dispatched after a failure with stop-on-fail.
pub const SKIP_STOPPED: &str = "batch stopped on failure";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Glob pattern, or a directory of `*.yaml`/`*.yml` scenarios.
    pub pattern: String,
    pub parallel: usize,
    pub stop_on_fail: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convoy: Option<String>,
    pub filter_tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    pub include_quarantined: bool,
    /// Baseline batch id to compare against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_to: Option<String>,
    pub skip_preflight: bool,
    pub output_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            pattern: "scenarios".to_string(),
            parallel: 4,
            stop_on_fail: false,
            convoy: None,
            filter_tags: Vec::new(),
            exclude_tags: Vec::new(),
            include_quarantined: false,
            compare_to: None,
            skip_preflight: false,
            output_dir: PathBuf::from("flakeguard-runs"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("invalid scenario pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("preflight failed: {}", failed.join("; "))]
    PreflightFailed { failed: Vec<String> },

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs batches of scenarios against one detector and executor.
pub struct BatchScheduler {
    detector: Arc<FlakeDetector>,
    executor: Arc<dyn ScenarioExecutor>,
    lookups: Vec<Arc<dyn QuarantineLookup>>,
    classifier: Arc<dyn InfraErrorPredicate>,
    preflight: Option<Arc<dyn PreflightChecker>>,
}

impl BatchScheduler {
    pub fn new(detector: Arc<FlakeDetector>, executor: Arc<dyn ScenarioExecutor>) -> Self {
        Self {
            detector,
            executor,
            lookups: Vec::new(),
            classifier: Arc::new(MarkerClassifier::default()),
            preflight: None,
        }
    }

    /// Consult `lookup` in addition to the detector when filtering quarantined scenarios.
    pub fn with_lookup(mut self, lookup: Arc<dyn QuarantineLookup>) -> Self {
        self.lookups.push(lookup);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn InfraErrorPredicate>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_preflight(mut self, preflight: Arc<dyn PreflightChecker>) -> Self {
        self.preflight = Some(preflight);
        self
    }

    /// Quarantine note from the detector, else from the first lookup that has one.
    fn quarantine_note(&self, scenario: &str) -> Option<String> {
        self.detector
            .quarantine_note(scenario)
            .or_else(|| self.lookups.iter().find_map(|l| l.quarantine_note(scenario)))
    }

    pub async fn run(&self, config: BatchConfig, cancel: CancellationToken) -> Result<BatchResult, BatchError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let id = new_batch_id(started_at);

        let discovered = discovery::discover(&config.pattern)?;
        let selected: Vec<Scenario> = discovered
            .into_iter()
            .filter(|s| discovery::matches_tags(s, &config.filter_tags, &config.exclude_tags))
            .collect();

        let mut results = Vec::with_capacity(selected.len());
        let mut runnable = Vec::new();
        let mut previously_quarantined = HashSet::new();
        for scenario in &selected {
            match self.quarantine_note(&scenario.name) {
                Some(note) => {
                    previously_quarantined.insert(scenario.name.clone());
                    if config.include_quarantined {
                        let mut r = ScenarioResult::pending(scenario);
                        r.quarantined = true;
                        runnable.push(results.len());
                        results.push(r);
                    } else {
                        info!(scenario = %scenario.name, %note, "skipping quarantined scenario");
                        let mut r = ScenarioResult::skipped(scenario, format!("quarantined: {note}"));
                        r.quarantined = true;
                        results.push(r);
                    }
                }
                None => {
                    runnable.push(results.len());
                    results.push(ScenarioResult::pending(scenario));
                }
            }
        }

        if !config.skip_preflight {
            if let Some(preflight) = &self.preflight {
                let report = preflight.check(&config).await;
                if !report.passed {
                    let failed = report.failed_checks();
                    warn!(batch_id = %id, ?failed, "preflight failed, aborting batch");
                    return Err(BatchError::PreflightFailed { failed });
                }
            }
        }

        let store = ManifestStore::new(&config.output_dir);
        let batch_dir = store.batch_dir(started_at.date_naive(), &id);

        info!(
            batch_id = %id,
            found = selected.len(),
            runnable = runnable.len(),
            parallel = config.parallel,
            stop_on_fail = config.stop_on_fail,
            "starting batch"
        );

        let pool = engine::WorkerPool {
            detector: Arc::clone(&self.detector),
            executor: Arc::clone(&self.executor),
            classifier: Arc::clone(&self.classifier),
            batch_id: id.clone(),
            batch_dir,
            convoy: config.convoy.clone(),
            stop_on_fail: config.stop_on_fail,
        };
        let actions = pool.run(&selected, &mut results, &runnable, config.parallel, cancel).await?;

        let summary = summary::summarize(&results, &actions, &previously_quarantined);
        let scenarios_skipped = summary.skipped;
        let scenarios_run = results.len() - scenarios_skipped;

        let completed_at = Utc::now();
        let mut batch = BatchResult {
            id,
            config,
            started_at,
            completed_at,
            duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            scenarios_found: selected.len(),
            scenarios_run,
            scenarios_skipped,
            results,
            summary,
            actions,
            comparison: None,
            manifest_path: None,
        };

        if let Some(baseline_id) = batch.config.compare_to.clone() {
            match store.load(&baseline_id) {
                Ok(Some(baseline)) => {
                    let c = comparison::compare(&batch, &baseline);
                    info!(
                        baseline = %baseline_id,
                        fixed = c.fixed.len(),
                        new_issues = c.new_issues.len(),
                        recurring = c.recurring.len(),
                        score = c.regression_score,
                        "compared against baseline"
                    );
                    batch.comparison = Some(c);
                }
                Ok(None) => warn!(baseline = %baseline_id, "baseline batch not found, skipping comparison"),
                Err(e) => warn!(baseline = %baseline_id, error = %e, "could not load baseline, skipping comparison"),
            }
        }

        match store.write(&batch) {
            Ok(path) => batch.manifest_path = Some(path),
            Err(e) => warn!(batch_id = %batch.id, error = %e, "failed to write batch manifest"),
        }

        info!(
            batch_id = %batch.id,
            passed = batch.summary.passed,
            failed = batch.summary.failed,
            errors = batch.summary.errors,
            skipped = batch.summary.skipped,
            flake_rate = batch.summary.flake_rate,
            duration_ms = batch.duration_ms,
            "batch complete"
        );
        Ok(batch)
    }
}

/// `<HHMMSS>-<8 hex>`, e.g. `142233-9f1c03ab`.
pub fn new_batch_id(at: DateTime<Utc>) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", at.format("%H%M%S"), &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_id_shape() {
        let id = new_batch_id(Utc::now());
        let (time, suffix) = id.split_once('-').unwrap();
        assert_eq!(time.len(), 6);
        assert!(time.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_batch_config_defaults_from_partial_toml() {
        let cfg: BatchConfig = toml::from_str("parallel = 8\nstop_on_fail = true\n").unwrap();
        assert_eq!(cfg.parallel, 8);
        assert!(cfg.stop_on_fail);
        assert_eq!(cfg.pattern, "scenarios");
        assert!(cfg.filter_tags.is_empty());
    }
}
