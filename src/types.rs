//! Shared scenario-level types: execution status and observation severities.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity of an observation reported by a scenario run.
///
/// Variants are declared most severe first, so the derived `Ord` sorts
/// `P0` before `P3` and "highest severity" is the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    P0,
    P1,
    P2,
    P3,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::P0 => write!(f, "P0"),
            Severity::P1 => write!(f, "P1"),
            Severity::P2 => write!(f, "P2"),
            Severity::P3 => write!(f, "P3"),
        }
    }
}

/// Observation counts keyed by severity.
pub type ObservationCounts = BTreeMap<Severity, u32>;

/// Worst severity with a non-zero count, `P3` when there is none.
pub fn highest_severity(observations: &ObservationCounts) -> Severity {
    observations
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(severity, _)| *severity)
        .min()
        .unwrap_or(Severity::P3)
}

/// Total number of observations across all severities.
pub fn count_observations(observations: &ObservationCounts) -> u64 {
    observations.values().map(|c| u64::from(*c)).sum()
}

/// Add every count in `from` into `into`.
pub fn merge_observations(into: &mut ObservationCounts, from: &ObservationCounts) {
    for (severity, count) in from {
        *into.entry(*severity).or_insert(0) += count;
    }
}

/// Lifecycle status of a scenario inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    #[default]
    Pending,
    Running,
    Passed,
    Failed,
    Error,
    Skipped,
    Retrying,
}

impl ScenarioStatus {
    /// `failed` or `error`.
    pub fn is_failure(self) -> bool {
        matches!(self, ScenarioStatus::Failed | ScenarioStatus::Error)
    }

    /// Whether the status is a final verdict rather than an in-progress state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScenarioStatus::Passed
                | ScenarioStatus::Failed
                | ScenarioStatus::Error
                | ScenarioStatus::Skipped
        )
    }
}

impl std::fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScenarioStatus::Pending => "pending",
            ScenarioStatus::Running => "running",
            ScenarioStatus::Passed => "passed",
            ScenarioStatus::Failed => "failed",
            ScenarioStatus::Error => "error",
            ScenarioStatus::Skipped => "skipped",
            ScenarioStatus::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_severity_defaults_to_p3() {
        assert_eq!(highest_severity(&ObservationCounts::new()), Severity::P3);
    }

    #[test]
    fn test_highest_severity_picks_worst_present() {
        let mut obs = ObservationCounts::new();
        obs.insert(Severity::P2, 4);
        obs.insert(Severity::P1, 1);
        obs.insert(Severity::P0, 0);
        assert_eq!(highest_severity(&obs), Severity::P1);
    }

    #[test]
    fn test_terminal_statuses() {
        for s in [
            ScenarioStatus::Passed,
            ScenarioStatus::Failed,
            ScenarioStatus::Error,
            ScenarioStatus::Skipped,
        ] {
            assert!(s.is_terminal(), "{s}");
        }
        for s in [ScenarioStatus::Pending, ScenarioStatus::Running, ScenarioStatus::Retrying] {
            assert!(!s.is_terminal(), "{s}");
        }
        assert!(!ScenarioStatus::Skipped.is_failure());
    }

    #[test]
    fn test_merge_and_count() {
        let mut total = ObservationCounts::new();
        let mut a = ObservationCounts::new();
        a.insert(Severity::P1, 2);
        let mut b = ObservationCounts::new();
        b.insert(Severity::P1, 1);
        b.insert(Severity::P3, 5);
        merge_observations(&mut total, &a);
        merge_observations(&mut total, &b);
        assert_eq!(total.get(&Severity::P1), Some(&3));
        assert_eq!(count_observations(&total), 8);
    }

    #[test]
    fn test_severity_map_serializes_with_string_keys() {
        let mut obs = ObservationCounts::new();
        obs.insert(Severity::P0, 1);
        let json = serde_json::to_string(&obs).unwrap();
        assert_eq!(json, r#"{"P0":1}"#);
    }
}
