//! Quarantine entries, actions, and the automatic quarantine policy.

use crate::detect::metrics::FlakeMetrics;
use crate::detect::DetectorConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scenario excluded from default batch execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub scenario: String,
    pub quarantined_at: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub flake_rate: f64,
    #[serde(default)]
    pub auto_quarantined: bool,
    #[serde(default)]
    pub review_required: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl QuarantineEntry {
    /// Operator-created entry. Never released automatically.
    pub fn manual(scenario: &str, reason: &str, metrics: &FlakeMetrics, last_run: Option<DateTime<Utc>>) -> Self {
        Self {
            scenario: scenario.to_string(),
            quarantined_at: Utc::now(),
            reason: reason.to_string(),
            flake_rate: metrics.flake_rate,
            auto_quarantined: false,
            review_required: false,
            last_run,
            notes: None,
        }
    }

    /// Policy-created entry. Always flagged for review.
    pub fn automatic(scenario: &str, reason: &str, metrics: &FlakeMetrics, last_run: Option<DateTime<Utc>>) -> Self {
        Self {
            scenario: scenario.to_string(),
            quarantined_at: Utc::now(),
            reason: reason.to_string(),
            flake_rate: metrics.flake_rate,
            auto_quarantined: true,
            review_required: true,
            last_run,
            notes: None,
        }
    }

    /// Text shown when a batch skips this scenario.
    pub fn note(&self) -> &str {
        self.notes.as_deref().unwrap_or(&self.reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Quarantine,
    Unquarantine,
    Flag,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Quarantine => write!(f, "quarantine"),
            ActionKind::Unquarantine => write!(f, "unquarantine"),
            ActionKind::Flag => write!(f, "flag"),
        }
    }
}

/// A state transition taken while recording a run. Returned, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineAction {
    pub action: ActionKind,
    pub scenario: String,
    pub reason: String,
    pub metrics: FlakeMetrics,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of evaluating the policy for one recorded run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PolicyDecision {
    Quarantine { reason: String },
    Unquarantine { reason: String },
    Flag { reason: String },
}

impl PolicyDecision {
    pub(crate) fn kind(&self) -> ActionKind {
        match self {
            PolicyDecision::Quarantine { .. } => ActionKind::Quarantine,
            PolicyDecision::Unquarantine { .. } => ActionKind::Unquarantine,
            PolicyDecision::Flag { .. } => ActionKind::Flag,
        }
    }

    pub(crate) fn reason(&self) -> &str {
        match self {
            PolicyDecision::Quarantine { reason }
            | PolicyDecision::Unquarantine { reason }
            | PolicyDecision::Flag { reason } => reason,
        }
    }
}

/// Evaluate the quarantine policy. At most one branch fires, and none
/// before `min_runs` windowed runs exist.
///
/// 1. not quarantined + auto-quarantine + (flake rate or streak trigger) → quarantine
/// 2. auto entry + auto-unquarantine + success rate recovered → unquarantine
/// 3. auto-quarantine disabled + flaky + not quarantined → flag
pub(crate) fn evaluate(
    config: &DetectorConfig,
    metrics: &FlakeMetrics,
    existing: Option<&QuarantineEntry>,
) -> Option<PolicyDecision> {
    if !metrics.has_min_runs(config) {
        return None;
    }

    match existing {
        None if config.auto_quarantine => quarantine_trigger(config, metrics)
            .map(|reason| PolicyDecision::Quarantine { reason }),
        Some(entry)
            if entry.auto_quarantined
                && config.auto_unquarantine
                && metrics.success_rate >= config.unquarantine_threshold =>
        {
            Some(PolicyDecision::Unquarantine {
                reason: format!(
                    "success rate {:.0}% >= recovery threshold {:.0}% over last {} runs",
                    metrics.success_rate * 100.0,
                    config.unquarantine_threshold * 100.0,
                    metrics.window_runs
                ),
            })
        }
        None if metrics.is_flaky => Some(PolicyDecision::Flag {
            reason: format!(
                "flake rate {:.0}% >= threshold {:.0}% (auto-quarantine disabled)",
                metrics.flake_rate * 100.0,
                config.flake_threshold * 100.0
            ),
        }),
        _ => None,
    }
}

fn quarantine_trigger(config: &DetectorConfig, metrics: &FlakeMetrics) -> Option<String> {
    if metrics.flake_rate >= config.flake_threshold {
        return Some(format!(
            "flake rate {:.0}% >= threshold {:.0}% over last {} runs",
            metrics.flake_rate * 100.0,
            config.flake_threshold * 100.0,
            metrics.window_runs
        ));
    }
    let streak_limit = config.consecutive_failures_threshold;
    if streak_limit > 0 && metrics.consecutive_failures >= streak_limit {
        return Some(format!(
            "{} consecutive failures >= threshold {}",
            metrics.consecutive_failures, streak_limit
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(window_runs: u32, flake_rate: f64) -> FlakeMetrics {
        FlakeMetrics {
            scenario: "s".into(),
            window_runs,
            flake_rate,
            success_rate: 1.0 - flake_rate,
            is_flaky: window_runs >= 3 && flake_rate >= 0.3,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_decision_below_min_runs() {
        let cfg = DetectorConfig::default();
        assert_eq!(evaluate(&cfg, &metrics(2, 1.0), None), None);
    }

    #[test]
    fn test_quarantine_on_flake_rate() {
        let cfg = DetectorConfig::default();
        let d = evaluate(&cfg, &metrics(3, 1.0), None).unwrap();
        assert_eq!(d.kind(), ActionKind::Quarantine);
        assert!(d.reason().contains("flake rate"));
    }

    #[test]
    fn test_quarantine_on_consecutive_failures() {
        let cfg = DetectorConfig {
            flake_threshold: 0.9,
            consecutive_failures_threshold: 2,
            ..Default::default()
        };
        let mut m = metrics(5, 0.4);
        m.consecutive_failures = 2;
        let d = evaluate(&cfg, &m, None).unwrap();
        assert_eq!(d.kind(), ActionKind::Quarantine);
        assert!(d.reason().contains("consecutive failures"));
    }

    #[test]
    fn test_manual_entry_never_recovers() {
        let cfg = DetectorConfig {
            auto_unquarantine: true,
            ..Default::default()
        };
        let entry = QuarantineEntry::manual("s", "ops", &FlakeMetrics::default(), None);
        assert_eq!(evaluate(&cfg, &metrics(10, 0.0), Some(&entry)), None);
    }

    #[test]
    fn test_auto_entry_recovers() {
        let cfg = DetectorConfig {
            auto_unquarantine: true,
            ..Default::default()
        };
        let entry = QuarantineEntry::automatic("s", "flaky", &FlakeMetrics::default(), None);
        let d = evaluate(&cfg, &metrics(10, 0.1), Some(&entry)).unwrap();
        assert_eq!(d.kind(), ActionKind::Unquarantine);
    }

    #[test]
    fn test_flag_when_auto_quarantine_disabled() {
        let cfg = DetectorConfig {
            auto_quarantine: false,
            ..Default::default()
        };
        let d = evaluate(&cfg, &metrics(4, 0.5), None).unwrap();
        assert_eq!(d.kind(), ActionKind::Flag);
        assert_eq!(evaluate(&cfg, &metrics(4, 0.1), None), None);
    }

    #[test]
    fn test_no_flag_when_already_quarantined() {
        let cfg = DetectorConfig {
            auto_quarantine: false,
            ..Default::default()
        };
        let entry = QuarantineEntry::manual("s", "ops", &FlakeMetrics::default(), None);
        assert_eq!(evaluate(&cfg, &metrics(4, 0.5), Some(&entry)), None);
    }
}
