use crate::detect::history::{RunRecord, ScenarioHistory};
use crate::detect::metrics::FlakeMetrics;
use crate::detect::quarantine::{self, PolicyDecision, QuarantineAction, QuarantineEntry};
use crate::detect::DetectorConfig;
use crate::quarantine::QuarantineLookup;
use crate::storage::{self, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

const STATE_VERSION: u32 = 1;

/// Persistence failed after a run was recorded. The in-memory state already
/// reflects the run, and `actions` holds whatever the policy decided.
#[derive(Debug, Error)]
#[error("run recorded but detector state was not persisted: {source}")]
pub struct PersistFailure {
    pub actions: Vec<QuarantineAction>,
    #[source]
    pub source: StorageError,
}

#[derive(Debug, Default)]
struct DetectorState {
    history: BTreeMap<String, ScenarioHistory>,
    quarantine: BTreeMap<String, QuarantineEntry>,
}

#[derive(Serialize)]
struct StateSnapshot<'a> {
    version: u32,
    config: &'a DetectorConfig,
    history: &'a BTreeMap<String, ScenarioHistory>,
    quarantine: &'a BTreeMap<String, QuarantineEntry>,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct StoredState {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    history: BTreeMap<String, ScenarioHistory>,
    #[serde(default)]
    quarantine: BTreeMap<String, QuarantineEntry>,
}

/// Tracks scenario run history and drives automatic quarantine.
///
/// History and quarantine maps sit behind one `RwLock`: every mutation takes
/// it exclusively and persists the whole state before releasing it, so
/// snapshot reads like [`list_quarantined`](Self::list_quarantined) never
/// observe a half-applied run.
pub struct FlakeDetector {
    config: DetectorConfig,
    state: RwLock<DetectorState>,
    path: Option<PathBuf>,
}

impl FlakeDetector {
    /// Detector with no backing file. Mutations never fail.
    pub fn in_memory(config: DetectorConfig) -> Self {
        Self {
            config,
            state: RwLock::new(DetectorState::default()),
            path: None,
        }
    }

    /// Load detector state from `path`.
    ///
    /// A missing file starts empty. A malformed file is an error: silently
    /// discarding history would also drop every quarantine.
    pub fn open(path: impl Into<PathBuf>, config: DetectorConfig) -> Result<Self, StorageError> {
        let path = path.into();
        let state = match storage::read_json::<StoredState>(&path)? {
            Some(stored) => {
                if stored.version != STATE_VERSION {
                    warn!(
                        path = %path.display(),
                        version = stored.version,
                        expected = STATE_VERSION,
                        "detector state version mismatch, loading anyway"
                    );
                }
                info!(
                    path = %path.display(),
                    scenarios = stored.history.len(),
                    quarantined = stored.quarantine.len(),
                    "loaded detector state"
                );
                DetectorState {
                    history: stored.history,
                    quarantine: stored.quarantine,
                }
            }
            None => {
                debug!(path = %path.display(), "no detector state yet, starting empty");
                DetectorState::default()
            }
        };

        Ok(Self {
            config,
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append `record`, re-evaluate the quarantine policy, and persist.
    pub fn record_run(
        &self,
        scenario: &str,
        record: RunRecord,
    ) -> Result<Vec<QuarantineAction>, PersistFailure> {
        let mut state = self.write_state();
        let run_at = record.timestamp;
        let outcome = record.outcome;

        let history = state
            .history
            .entry(scenario.to_string())
            .or_insert_with(|| ScenarioHistory::new(scenario));
        history.append(record, self.config.retained_runs());
        let metrics = FlakeMetrics::compute(scenario, Some(history), &self.config);

        if let Some(entry) = state.quarantine.get_mut(scenario) {
            entry.last_run = Some(run_at);
        }

        debug!(
            %scenario,
            %outcome,
            window_runs = metrics.window_runs,
            flake_rate = metrics.flake_rate,
            "recorded run"
        );

        let mut actions = Vec::new();
        let decision = quarantine::evaluate(&self.config, &metrics, state.quarantine.get(scenario));
        if let Some(decision) = decision {
            match &decision {
                PolicyDecision::Quarantine { reason } => {
                    let entry = QuarantineEntry::automatic(scenario, reason, &metrics, Some(run_at));
                    state.quarantine.insert(scenario.to_string(), entry);
                    warn!(%scenario, %reason, "auto-quarantined scenario");
                }
                PolicyDecision::Unquarantine { reason } => {
                    state.quarantine.remove(scenario);
                    info!(%scenario, %reason, "auto-unquarantined scenario");
                }
                PolicyDecision::Flag { reason } => {
                    info!(%scenario, %reason, "flagged flaky scenario");
                }
            }
            actions.push(QuarantineAction {
                action: decision.kind(),
                scenario: scenario.to_string(),
                reason: decision.reason().to_string(),
                metrics,
                timestamp: Utc::now(),
            });
        }

        match self.persist(&state) {
            Ok(()) => Ok(actions),
            Err(source) => Err(PersistFailure { actions, source }),
        }
    }

    /// Windowed metrics. Zero-valued for a scenario that was never recorded.
    pub fn metrics(&self, scenario: &str) -> FlakeMetrics {
        let state = self.read_state();
        FlakeMetrics::compute(scenario, state.history.get(scenario), &self.config)
    }

    /// Metrics for every known scenario, highest flake rate first.
    pub fn all_metrics(&self) -> Vec<FlakeMetrics> {
        let state = self.read_state();
        let mut all: Vec<FlakeMetrics> = state
            .history
            .iter()
            .map(|(name, h)| FlakeMetrics::compute(name, Some(h), &self.config))
            .collect();
        sort_by_flake_rate(&mut all);
        all
    }

    /// Scenarios currently classified as flaky, highest flake rate first.
    pub fn flaky_scenarios(&self) -> Vec<FlakeMetrics> {
        let mut flaky: Vec<FlakeMetrics> = self.all_metrics().into_iter().filter(|m| m.is_flaky).collect();
        sort_by_flake_rate(&mut flaky);
        flaky
    }

    /// Manually quarantine `scenario`, replacing any existing entry.
    /// Manual entries are never released by the recovery policy.
    pub fn quarantine(&self, scenario: &str, reason: &str) -> Result<(), StorageError> {
        let mut state = self.write_state();
        let history = state.history.get(scenario);
        let metrics = FlakeMetrics::compute(scenario, history, &self.config);
        let last_run = history.and_then(|h| h.last_run);
        state.quarantine.insert(
            scenario.to_string(),
            QuarantineEntry::manual(scenario, reason, &metrics, last_run),
        );
        info!(%scenario, %reason, "manually quarantined scenario");
        self.persist(&state)
    }

    /// Remove any quarantine entry for `scenario`. Returns whether one existed;
    /// removing nothing is not an error and writes nothing.
    pub fn unquarantine(&self, scenario: &str) -> Result<bool, StorageError> {
        let mut state = self.write_state();
        if state.quarantine.remove(scenario).is_none() {
            return Ok(false);
        }
        info!(%scenario, "unquarantined scenario");
        self.persist(&state)?;
        Ok(true)
    }

    /// Attach free-form notes to an existing quarantine entry.
    pub fn annotate(&self, scenario: &str, notes: &str) -> Result<bool, StorageError> {
        let mut state = self.write_state();
        let Some(entry) = state.quarantine.get_mut(scenario) else {
            return Ok(false);
        };
        entry.notes = Some(notes.to_string());
        self.persist(&state)?;
        Ok(true)
    }

    pub fn is_quarantined(&self, scenario: &str) -> bool {
        self.read_state().quarantine.contains_key(scenario)
    }

    pub fn quarantine_entry(&self, scenario: &str) -> Option<QuarantineEntry> {
        self.read_state().quarantine.get(scenario).cloned()
    }

    /// All quarantine entries, most recently quarantined first.
    pub fn list_quarantined(&self) -> Vec<QuarantineEntry> {
        let mut entries: Vec<QuarantineEntry> = self.read_state().quarantine.values().cloned().collect();
        entries.sort_by(|a, b| {
            b.quarantined_at
                .cmp(&a.quarantined_at)
                .then_with(|| a.scenario.cmp(&b.scenario))
        });
        entries
    }

    pub fn history(&self, scenario: &str) -> Option<ScenarioHistory> {
        self.read_state().history.get(scenario).cloned()
    }

    /// Drop all recorded runs for `scenario`. Its quarantine entry, if any, stays.
    pub fn clear_history(&self, scenario: &str) -> Result<bool, StorageError> {
        let mut state = self.write_state();
        if state.history.remove(scenario).is_none() {
            return Ok(false);
        }
        info!(%scenario, "cleared scenario history");
        self.persist(&state)?;
        Ok(true)
    }

    fn persist(&self, state: &DetectorState) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = StateSnapshot {
            version: STATE_VERSION,
            config: &self.config,
            history: &state.history,
            quarantine: &state.quarantine,
            updated_at: Utc::now(),
        };
        storage::write_json_atomic(path, &snapshot)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, DetectorState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, DetectorState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl QuarantineLookup for FlakeDetector {
    fn quarantine_note(&self, scenario: &str) -> Option<String> {
        self.read_state()
            .quarantine
            .get(scenario)
            .map(|e| e.note().to_string())
    }
}

fn sort_by_flake_rate(metrics: &mut [FlakeMetrics]) {
    metrics.sort_by(|a, b| {
        b.flake_rate
            .total_cmp(&a.flake_rate)
            .then_with(|| a.scenario.cmp(&b.scenario))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::history::Outcome;
    use crate::detect::quarantine::ActionKind;

    fn detector(config: DetectorConfig) -> FlakeDetector {
        FlakeDetector::in_memory(config)
    }

    fn record(d: &FlakeDetector, scenario: &str, outcome: Outcome) -> Vec<QuarantineAction> {
        d.record_run(scenario, RunRecord::new(outcome)).unwrap()
    }

    #[test]
    fn test_three_failures_quarantine_on_third_call() {
        let d = detector(DetectorConfig::default());
        assert!(record(&d, "checkout", Outcome::Fail).is_empty());
        assert!(record(&d, "checkout", Outcome::Fail).is_empty());
        let actions = record(&d, "checkout", Outcome::Fail);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, ActionKind::Quarantine);
        assert!(d.is_quarantined("checkout"));

        let entry = d.quarantine_entry("checkout").unwrap();
        assert!(entry.auto_quarantined);
        assert!(entry.review_required);
        assert!((entry.flake_rate - 1.0).abs() < f64::EPSILON);

        // Already quarantined: no second action.
        assert!(record(&d, "checkout", Outcome::Fail).is_empty());
    }

    #[test]
    fn test_auto_recovery_releases_auto_entries_only() {
        let cfg = DetectorConfig {
            auto_unquarantine: true,
            ..Default::default()
        };
        let auto = detector(cfg.clone());
        let manual = detector(cfg);

        for _ in 0..3 {
            record(&auto, "s", Outcome::Fail);
            manual.record_run("s", RunRecord::new(Outcome::Fail)).unwrap();
        }
        assert!(auto.is_quarantined("s"));
        manual.unquarantine("s").unwrap();
        manual.quarantine("s", "pinned by on-call").unwrap();

        let mut unquarantine_actions = 0;
        let mut released_on = None;
        for i in 0..9 {
            let actions = record(&auto, "s", Outcome::Pass);
            let manual_actions = record(&manual, "s", Outcome::Pass);
            assert!(manual_actions.is_empty());
            for a in &actions {
                if a.action == ActionKind::Unquarantine {
                    unquarantine_actions += 1;
                    released_on = Some(i);
                }
            }
        }
        // 9 passes + 1 fail in a 10-run window reaches 90% on the last pass.
        assert_eq!(unquarantine_actions, 1);
        assert_eq!(released_on, Some(8));
        assert!(!auto.is_quarantined("s"));
        assert!(manual.is_quarantined("s"));
        assert!(!manual.quarantine_entry("s").unwrap().auto_quarantined);
    }

    #[test]
    fn test_flag_action_without_state_change() {
        let d = detector(DetectorConfig {
            auto_quarantine: false,
            ..Default::default()
        });
        record(&d, "search", Outcome::Fail);
        record(&d, "search", Outcome::Pass);
        let actions = record(&d, "search", Outcome::Fail);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, ActionKind::Flag);
        assert!(!d.is_quarantined("search"));
    }

    #[test]
    fn test_unquarantine_is_idempotent() {
        let d = detector(DetectorConfig::default());
        assert!(!d.unquarantine("never-seen").unwrap());
        d.quarantine("x", "manual").unwrap();
        assert!(d.unquarantine("x").unwrap());
        assert!(!d.unquarantine("x").unwrap());
    }

    #[test]
    fn test_history_trimmed_to_twice_window() {
        let d = detector(DetectorConfig {
            window_size: 5,
            ..Default::default()
        });
        for _ in 0..30 {
            record(&d, "s", Outcome::Pass);
        }
        let h = d.history("s").unwrap();
        assert_eq!(h.runs.len(), 10);
        assert_eq!(h.total_runs, 30);
    }

    #[test]
    fn test_metrics_sorted_by_flake_rate() {
        let d = detector(DetectorConfig {
            auto_quarantine: false,
            ..Default::default()
        });
        for o in [Outcome::Pass, Outcome::Pass, Outcome::Pass] {
            record(&d, "stable", o);
        }
        for o in [Outcome::Fail, Outcome::Pass, Outcome::Pass] {
            record(&d, "sometimes", o);
        }
        for o in [Outcome::Fail, Outcome::Fail, Outcome::Pass] {
            record(&d, "often", o);
        }
        let all: Vec<String> = d.all_metrics().into_iter().map(|m| m.scenario).collect();
        assert_eq!(all, vec!["often", "sometimes", "stable"]);

        let flaky: Vec<String> = d.flaky_scenarios().into_iter().map(|m| m.scenario).collect();
        assert_eq!(flaky, vec!["often", "sometimes"]);
    }

    #[test]
    fn test_list_quarantined_newest_first() {
        let d = detector(DetectorConfig::default());
        d.quarantine("older", "a").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        d.quarantine("newer", "b").unwrap();
        let names: Vec<String> = d.list_quarantined().into_iter().map(|e| e.scenario).collect();
        assert_eq!(names, vec!["newer", "older"]);
    }

    #[test]
    fn test_unknown_scenario_queries() {
        let d = detector(DetectorConfig::default());
        assert!(d.history("nope").is_none());
        assert_eq!(d.metrics("nope").window_runs, 0);
        assert!(!d.clear_history("nope").unwrap());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("flake-state.json");
        {
            let d = FlakeDetector::open(&path, DetectorConfig::default()).unwrap();
            for _ in 0..3 {
                d.record_run("login", RunRecord::new(Outcome::Fail)).unwrap();
            }
            d.quarantine("profile", "manual hold").unwrap();
        }
        let d = FlakeDetector::open(&path, DetectorConfig::default()).unwrap();
        assert_eq!(d.path(), Some(path.as_path()));
        assert!(d.is_quarantined("login"));
        assert!(d.is_quarantined("profile"));
        assert_eq!(d.history("login").unwrap().total_failures, 3);
    }

    #[test]
    fn test_constructor_config_overrides_persisted() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("flake-state.json");
        {
            let d = FlakeDetector::open(&path, DetectorConfig::default()).unwrap();
            d.record_run("login", RunRecord::new(Outcome::Pass)).unwrap();
        }
        let tuned = DetectorConfig {
            window_size: 4,
            ..Default::default()
        };
        let d = FlakeDetector::open(&path, tuned).unwrap();
        assert_eq!(d.config().window_size, 4);
        assert_eq!(d.history("login").unwrap().total_runs, 1);

        let mem = FlakeDetector::in_memory(DetectorConfig::default());
        assert!(mem.path().is_none());
        assert_eq!(mem.config().window_size, 10);
    }

    #[test]
    fn test_corrupt_state_fails_construction() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("flake-state.json");
        std::fs::write(&path, "{\"history\": [}").unwrap();
        let err = FlakeDetector::open(&path, DetectorConfig::default()).err().unwrap();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[test]
    fn test_persist_failure_keeps_memory_state_and_actions() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("flake-state.json");
        let d = FlakeDetector::open(&path, DetectorConfig::default()).unwrap();
        // A directory at the target path makes the final rename fail.
        std::fs::create_dir_all(&path).unwrap();

        for _ in 0..2 {
            let err = d.record_run("s", RunRecord::new(Outcome::Fail)).unwrap_err();
            assert!(err.actions.is_empty());
        }
        let err = d.record_run("s", RunRecord::new(Outcome::Fail)).unwrap_err();
        assert_eq!(err.actions.len(), 1);
        assert_eq!(err.actions[0].action, ActionKind::Quarantine);
        assert!(d.is_quarantined("s"));
        assert_eq!(d.history("s").unwrap().total_runs, 3);
    }
}
