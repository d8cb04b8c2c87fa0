//! Baseline comparison between two batch results.

use crate::scheduler::result::{BatchResult, ScenarioResult};
use crate::types::{count_observations, highest_severity, ScenarioStatus, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonItem {
    pub scenario: String,
    pub description: String,
    pub severity: Severity,
    pub run_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub baseline_id: String,
    pub fixed: Vec<ComparisonItem>,
    pub new_issues: Vec<ComparisonItem>,
    pub recurring: Vec<ComparisonItem>,
    /// `fixed - new_issues`. Positive means the batch improved.
    pub regression_score: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Passed,
    Failing,
}

fn side(status: ScenarioStatus) -> Option<Side> {
    match status {
        ScenarioStatus::Passed => Some(Side::Passed),
        ScenarioStatus::Failed | ScenarioStatus::Error => Some(Side::Failing),
        _ => None,
    }
}

/// Diff `current` against `baseline` over scenarios present in both.
///
/// Results follow `current`'s order. Pairs where either side did not reach
/// a pass/fail verdict are left out.
pub fn compare(current: &BatchResult, baseline: &BatchResult) -> Comparison {
    let by_name: HashMap<&str, &ScenarioResult> = baseline
        .results
        .iter()
        .map(|r| (r.name.as_str(), r))
        .collect();

    let mut comparison = Comparison {
        baseline_id: baseline.id.clone(),
        ..Default::default()
    };

    for cur in &current.results {
        let Some(base) = by_name.get(cur.name.as_str()) else {
            continue;
        };
        let (Some(was), Some(now)) = (side(base.status), side(cur.status)) else {
            continue;
        };

        match (was, now) {
            (Side::Failing, Side::Passed) => comparison.fixed.push(item(
                cur,
                format!("{} in baseline, passed now", base.status),
                highest_severity(&base.observations),
            )),
            (Side::Passed, Side::Failing) => comparison.new_issues.push(item(
                cur,
                format!("passed in baseline, {} now", cur.status),
                highest_severity(&cur.observations),
            )),
            (Side::Failing, Side::Failing) => comparison.recurring.push(item(
                cur,
                format!("{} in baseline, still {}", base.status, cur.status),
                highest_severity(&cur.observations),
            )),
            (Side::Passed, Side::Passed) => {
                let before = count_observations(&base.observations);
                let after = count_observations(&cur.observations);
                if after > before {
                    comparison.new_issues.push(item(
                        cur,
                        format!("observations increased from {before} to {after}"),
                        highest_severity(&cur.observations),
                    ));
                } else if after < before {
                    comparison.fixed.push(item(
                        cur,
                        format!("observations decreased from {before} to {after}"),
                        highest_severity(&base.observations),
                    ));
                }
            }
        }
    }

    comparison.regression_score = comparison.fixed.len() as i64 - comparison.new_issues.len() as i64;
    comparison
}

fn item(current: &ScenarioResult, description: String, severity: Severity) -> ComparisonItem {
    ComparisonItem {
        scenario: current.name.clone(),
        description,
        severity,
        run_count: current.run_count(),
    }
}
