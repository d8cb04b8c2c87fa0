use crate::detect::history::{Outcome, OutcomeClass, RunRecord, ScenarioHistory};
use crate::detect::DetectorConfig;
use serde::{Deserialize, Serialize};

/// Windowed view over a scenario's history. Derived on demand, never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlakeMetrics {
    pub scenario: String,
    pub window_runs: u32,
    pub window_passes: u32,
    pub window_failures: u32,
    pub window_errors: u32,
    pub flake_rate: f64,
    pub success_rate: f64,
    pub avg_retries: f64,
    pub avg_duration_ms: f64,
    pub consecutive_failures: u32,
    pub consecutive_passes: u32,
    pub last_outcome: Option<Outcome>,
    pub total_runs: u64,
    pub is_flaky: bool,
    pub is_stable: bool,
}

impl FlakeMetrics {
    /// Compute metrics over the newest `config.window_size` runs.
    ///
    /// `is_flaky` and `is_stable` stay false until `window_runs >= min_runs`.
    pub fn compute(
        scenario: &str,
        history: Option<&ScenarioHistory>,
        config: &DetectorConfig,
    ) -> Self {
        let Some(history) = history else {
            return Self {
                scenario: scenario.to_string(),
                ..Default::default()
            };
        };

        let counted: Vec<(&RunRecord, OutcomeClass)> = history
            .window(config.window_size)
            .iter()
            .map(|r| (r, r.class()))
            .filter(|(_, class)| *class != OutcomeClass::Uncounted)
            .collect();

        let mut metrics = Self {
            scenario: scenario.to_string(),
            consecutive_failures: history.consecutive_failures,
            consecutive_passes: history.consecutive_passes,
            last_outcome: history.last_outcome(),
            total_runs: history.total_runs,
            ..Default::default()
        };

        for (_, class) in &counted {
            match class {
                OutcomeClass::Pass => metrics.window_passes += 1,
                OutcomeClass::Failure => metrics.window_failures += 1,
                OutcomeClass::Error => metrics.window_errors += 1,
                OutcomeClass::Uncounted => {}
            }
        }
        metrics.window_runs = counted.len() as u32;

        if metrics.window_runs > 0 {
            let runs = f64::from(metrics.window_runs);
            metrics.flake_rate =
                f64::from(metrics.window_failures + metrics.window_errors) / runs;
            metrics.success_rate = f64::from(metrics.window_passes) / runs;
            metrics.avg_retries = mean(counted.iter().map(|(r, _)| f64::from(r.retry_count)));
            metrics.avg_duration_ms = mean(counted.iter().map(|(r, _)| r.duration_ms as f64));
        }

        if metrics.window_runs >= config.min_runs {
            metrics.is_flaky = metrics.flake_rate >= config.flake_threshold;
            metrics.is_stable = metrics.success_rate >= config.unquarantine_threshold;
        }

        metrics
    }

    /// Whether enough windowed runs exist for classification.
    pub fn has_min_runs(&self, config: &DetectorConfig) -> bool {
        self.window_runs >= config.min_runs
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window: usize, min_runs: u32, threshold: f64) -> DetectorConfig {
        DetectorConfig {
            window_size: window,
            min_runs,
            flake_threshold: threshold,
            ..Default::default()
        }
    }

    fn history(outcomes: &[Outcome]) -> ScenarioHistory {
        let mut h = ScenarioHistory::new("s");
        for o in outcomes {
            h.append(RunRecord::new(*o).with_duration_ms(100).with_retries(1), 100);
        }
        h
    }

    #[test]
    fn test_two_passes_two_fails_is_flaky() {
        let cfg = config(5, 3, 0.3);
        let h = history(&[Outcome::Pass, Outcome::Pass, Outcome::Fail, Outcome::Fail]);
        let m = FlakeMetrics::compute("s", Some(&h), &cfg);
        assert_eq!(m.window_runs, 4);
        assert!((m.flake_rate - 0.5).abs() < f64::EPSILON);
        assert!(m.is_flaky);
    }

    #[test]
    fn test_below_min_runs_never_classified() {
        let cfg = config(5, 3, 0.3);
        let h = history(&[Outcome::Pass, Outcome::Pass]);
        let m = FlakeMetrics::compute("s", Some(&h), &cfg);
        assert!(!m.is_flaky);
        assert!(!m.is_stable);

        let h = history(&[Outcome::Fail, Outcome::Fail]);
        let m = FlakeMetrics::compute("s", Some(&h), &cfg);
        assert!((m.flake_rate - 1.0).abs() < f64::EPSILON);
        assert!(!m.is_flaky);
        assert!(!m.is_stable);
    }

    #[test]
    fn test_window_only_covers_newest_runs() {
        let cfg = config(3, 3, 0.3);
        let h = history(&[
            Outcome::Fail,
            Outcome::Fail,
            Outcome::Fail,
            Outcome::Pass,
            Outcome::Pass,
            Outcome::Pass,
        ]);
        let m = FlakeMetrics::compute("s", Some(&h), &cfg);
        assert_eq!(m.window_runs, 3);
        assert_eq!(m.flake_rate, 0.0);
        assert!(m.is_stable);
        assert_eq!(m.total_runs, 6);
    }

    #[test]
    fn test_skips_not_counted_in_window() {
        let cfg = config(5, 3, 0.3);
        let h = history(&[Outcome::Pass, Outcome::Skip, Outcome::Fail]);
        let m = FlakeMetrics::compute("s", Some(&h), &cfg);
        assert_eq!(m.window_runs, 2);
        assert_eq!(m.last_outcome, Some(Outcome::Fail));
        assert!(!m.is_flaky);
    }

    #[test]
    fn test_unknown_scenario_zero_value() {
        let m = FlakeMetrics::compute("ghost", None, &DetectorConfig::default());
        assert_eq!(m.scenario, "ghost");
        assert_eq!(m.window_runs, 0);
        assert!(!m.is_flaky && !m.is_stable);
        assert!(m.last_outcome.is_none());
    }

    #[test]
    fn test_averages() {
        let cfg = config(10, 1, 0.3);
        let h = history(&[Outcome::Pass, Outcome::Pass]);
        let m = FlakeMetrics::compute("s", Some(&h), &cfg);
        assert_eq!(m.avg_duration_ms, 100.0);
        assert_eq!(m.avg_retries, 1.0);
    }
}
