use crate::detect::{ActionKind, QuarantineAction};
use crate::scheduler::result::{BatchSummary, ScenarioResult};
use crate::types::{merge_observations, ScenarioStatus};
use std::collections::HashSet;

/// Tally results and classify the detector actions a batch produced.
///
/// `previously_quarantined` holds scenarios that were already quarantined
/// when the batch was filtered; together with this batch's auto-quarantines
/// they are excluded from `new_quarantine_candidates`.
pub fn summarize(
    results: &[ScenarioResult],
    actions: &[QuarantineAction],
    previously_quarantined: &HashSet<String>,
) -> BatchSummary {
    let mut summary = BatchSummary::default();

    for r in results {
        match r.status {
            ScenarioStatus::Passed => summary.passed += 1,
            ScenarioStatus::Failed => summary.failed += 1,
            ScenarioStatus::Error => summary.errors += 1,
            ScenarioStatus::Skipped => summary.skipped += 1,
            _ => {}
        }
        merge_observations(&mut summary.observations, &r.observations);
        summary.total_retries += u64::from(r.retry_count);
    }

    let counted = summary.passed + summary.failed + summary.errors;
    if counted > 0 {
        summary.flake_rate = (summary.failed + summary.errors) as f64 / counted as f64;
    }

    for a in actions {
        let bucket = match a.action {
            ActionKind::Quarantine => &mut summary.auto_quarantined,
            ActionKind::Unquarantine => &mut summary.auto_unquarantined,
            ActionKind::Flag => &mut summary.flaky_scenarios,
        };
        if !bucket.contains(&a.scenario) {
            bucket.push(a.scenario.clone());
        }
    }

    summary.new_quarantine_candidates = results
        .iter()
        .filter(|r| r.status.is_failure())
        .filter(|r| !previously_quarantined.contains(&r.name))
        .filter(|r| !summary.auto_quarantined.contains(&r.name))
        .map(|r| r.name.clone())
        .collect();

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FlakeMetrics;
    use crate::scheduler::discovery::Scenario;
    use crate::types::Severity;
    use chrono::Utc;

    fn result(name: &str, status: ScenarioStatus) -> ScenarioResult {
        let mut r = ScenarioResult::pending(&Scenario::new(name, format!("{name}.yaml")));
        r.status = status;
        r
    }

    fn action(kind: ActionKind, scenario: &str) -> QuarantineAction {
        QuarantineAction {
            action: kind,
            scenario: scenario.to_string(),
            reason: String::new(),
            metrics: FlakeMetrics::default(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_counts_and_flake_rate_exclude_skips() {
        let mut failing = result("b", ScenarioStatus::Failed);
        failing.retry_count = 2;
        failing.observations.insert(Severity::P1, 1);
        let mut passing = result("a", ScenarioStatus::Passed);
        passing.observations.insert(Severity::P1, 2);
        let results = vec![
            passing,
            failing,
            result("c", ScenarioStatus::Error),
            result("d", ScenarioStatus::Passed),
            result("e", ScenarioStatus::Skipped),
        ];
        let s = summarize(&results, &[], &HashSet::new());
        assert_eq!((s.passed, s.failed, s.errors, s.skipped), (2, 1, 1, 1));
        assert!((s.flake_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(s.total_retries, 2);
        assert_eq!(s.observations.get(&Severity::P1), Some(&3));
    }

    #[test]
    fn test_all_skipped_has_zero_flake_rate() {
        let s = summarize(&[result("a", ScenarioStatus::Skipped)], &[], &HashSet::new());
        assert_eq!(s.flake_rate, 0.0);
    }

    #[test]
    fn test_actions_classified_and_candidates_computed() {
        let results = vec![
            result("auto", ScenarioStatus::Failed),
            result("known", ScenarioStatus::Error),
            result("fresh", ScenarioStatus::Failed),
            result("fine", ScenarioStatus::Passed),
        ];
        let actions = vec![
            action(ActionKind::Quarantine, "auto"),
            action(ActionKind::Unquarantine, "fine"),
            action(ActionKind::Flag, "fresh"),
        ];
        let previously: HashSet<String> = ["known".to_string()].into_iter().collect();
        let s = summarize(&results, &actions, &previously);
        assert_eq!(s.auto_quarantined, vec!["auto"]);
        assert_eq!(s.auto_unquarantined, vec!["fine"]);
        assert_eq!(s.flaky_scenarios, vec!["fresh"]);
        assert_eq!(s.new_quarantine_candidates, vec!["fresh"]);
    }
}
