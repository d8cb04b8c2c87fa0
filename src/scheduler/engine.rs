use crate::detect::{FlakeDetector, InfraErrorPredicate, Outcome, PersistFailure, QuarantineAction, RunRecord};
use crate::executor::{ExecutionOutcome, RunParams, ScenarioExecutor};
use crate::scheduler::discovery::Scenario;
use crate::scheduler::result::ScenarioResult;
use crate::scheduler::{BatchError, SKIP_CANCELLED, SKIP_STOPPED};
use crate::types::ScenarioStatus;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything a worker needs to run one scenario and record its outcome.
pub(crate) struct WorkerPool {
    pub detector: Arc<FlakeDetector>,
    pub executor: Arc<dyn ScenarioExecutor>,
    pub classifier: Arc<dyn InfraErrorPredicate>,
    pub batch_id: String,
    pub batch_dir: PathBuf,
    pub convoy: Option<String>,
    pub stop_on_fail: bool,
}

struct Job {
    slot: usize,
    scenario: Scenario,
    result: ScenarioResult,
}

struct Completed {
    slot: usize,
    result: ScenarioResult,
    actions: Vec<QuarantineAction>,
}

struct Shared {
    pool: WorkerPool,
    queue: Mutex<mpsc::UnboundedReceiver<Job>>,
    stop: AtomicBool,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Execute `runnable` slots of `results` on `min(max(parallel, 1), runnable)`
    /// workers and write each final result back into its slot.
    ///
    /// The queue is filled and closed before any worker starts. Workers check
    /// cancellation, then the stop flag, before each dispatch; work already
    /// in flight always runs to completion.
    pub(crate) async fn run(
        self,
        scenarios: &[Scenario],
        results: &mut [ScenarioResult],
        runnable: &[usize],
        parallel: usize,
        cancel: CancellationToken,
    ) -> Result<Vec<QuarantineAction>, BatchError> {
        if runnable.is_empty() {
            return Ok(Vec::new());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for &slot in runnable {
            let job = Job {
                slot,
                scenario: scenarios[slot].clone(),
                result: results[slot].clone(),
            };
            if tx.send(job).is_err() {
                break;
            }
        }
        drop(tx);

        let workers = parallel.max(1).min(runnable.len());
        let shared = Arc::new(Shared {
            pool: self,
            queue: Mutex::new(rx),
            stop: AtomicBool::new(false),
            cancel,
        });

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let shared = Arc::clone(&shared);
            set.spawn(async move { shared.work(worker).await });
        }

        let mut completed = Vec::with_capacity(runnable.len());
        while let Some(joined) = set.join_next().await {
            completed.extend(joined??);
        }

        completed.sort_by_key(|c| c.slot);
        let mut actions = Vec::new();
        for c in completed {
            results[c.slot] = c.result;
            actions.extend(c.actions);
        }
        Ok(actions)
    }

    async fn execute(&self, scenario: &Scenario, result: &mut ScenarioResult) {
        let artifact_dir = self.batch_dir.join(&scenario.name);
        if let Err(e) = tokio::fs::create_dir_all(&artifact_dir).await {
            warn!(scenario = %scenario.name, error = %e, "could not create artifact directory");
        }
        result.artifact_dir = Some(artifact_dir.clone());
        result.status = ScenarioStatus::Running;

        let params = RunParams {
            batch_id: self.batch_id.clone(),
            artifact_dir,
            convoy: self.convoy.clone(),
        };

        debug!(scenario = %scenario.name, "dispatching scenario");
        let started = Instant::now();
        match self.executor.execute(scenario, &params).await {
            Ok(outcome) => apply_outcome(result, outcome),
            Err(e) => {
                result.status = ScenarioStatus::Error;
                result.error = Some(format!("{e:#}"));
            }
        }
        if result.duration_ms == 0 {
            result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        }

        info!(
            scenario = %result.name,
            status = %result.status,
            duration_ms = result.duration_ms,
            retries = result.retry_count,
            "scenario finished"
        );
    }

    fn run_record(&self, result: &ScenarioResult) -> RunRecord {
        let (outcome, error_type, infra) = match result.status {
            ScenarioStatus::Passed => (Outcome::Pass, None, false),
            ScenarioStatus::Failed => (Outcome::Fail, Some("assertion"), false),
            ScenarioStatus::Skipped => (Outcome::Skip, None, false),
            ScenarioStatus::Error
            | ScenarioStatus::Pending
            | ScenarioStatus::Running
            | ScenarioStatus::Retrying => {
                let infra = result
                    .error
                    .as_deref()
                    .is_some_and(|e| self.classifier.is_infra_error(e));
                let kind = if infra { "infrastructure" } else { "execution" };
                (Outcome::Error, Some(kind), infra)
            }
        };

        let mut record = RunRecord::new(outcome)
            .with_duration_ms(result.duration_ms)
            .with_retries(result.retry_count)
            .with_batch(self.batch_id.clone())
            .with_infrastructure_error(infra);
        if let Some(kind) = error_type {
            record = record.with_error_type(kind);
        }
        record
    }

    async fn record(&self, result: &ScenarioResult) -> Result<Vec<QuarantineAction>, BatchError> {
        let record = self.run_record(result);
        let detector = Arc::clone(&self.detector);
        let name = result.name.clone();
        let recorded = tokio::task::spawn_blocking(move || detector.record_run(&name, record)).await?;
        match recorded {
            Ok(actions) => Ok(actions),
            Err(PersistFailure { actions, source }) => {
                warn!(scenario = %result.name, error = %source, "run recorded in memory but not persisted");
                Ok(actions)
            }
        }
    }
}

impl Shared {
    async fn work(&self, worker: usize) -> Result<Vec<Completed>, BatchError> {
        let mut done = Vec::new();
        loop {
            let next = self.queue.lock().await.recv().await;
            let Some(Job { slot, scenario, mut result }) = next else {
                break;
            };

            if self.cancel.is_cancelled() {
                result.mark_skipped(SKIP_CANCELLED);
                done.push(Completed { slot, result, actions: Vec::new() });
                continue;
            }
            if self.stop.load(Ordering::SeqCst) {
                result.mark_skipped(SKIP_STOPPED);
                done.push(Completed { slot, result, actions: Vec::new() });
                continue;
            }

            self.pool.execute(&scenario, &mut result).await;

            if self.pool.stop_on_fail
                && result.status.is_failure()
                && !self.stop.swap(true, Ordering::SeqCst)
            {
                warn!(scenario = %result.name, "stop-on-fail triggered, remaining scenarios will be skipped");
            }

            let actions = self.pool.record(&result).await?;
            done.push(Completed { slot, result, actions });
        }
        debug!(worker, completed = done.len(), "worker drained queue");
        Ok(done)
    }
}

fn apply_outcome(result: &mut ScenarioResult, outcome: ExecutionOutcome) {
    result.duration_ms = outcome.duration_ms.unwrap_or(0);
    result.observations = outcome.observations;
    result.retry_count = outcome.retry_count;
    result.criteria_met = outcome.criteria_met;
    result.criteria_total = outcome.criteria_total;

    match outcome.status {
        ScenarioStatus::Skipped => {
            result.mark_skipped(outcome.error.unwrap_or_else(|| "skipped by executor".to_string()));
        }
        status if status.is_terminal() => {
            result.status = status;
            result.error = outcome.error;
        }
        other => {
            result.status = ScenarioStatus::Error;
            result.error = Some(match outcome.error {
                Some(e) => format!("executor reported non-final status {other}: {e}"),
                None => format!("executor reported non-final status {other}"),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn pending(name: &str) -> ScenarioResult {
        ScenarioResult::pending(&Scenario::new(name, format!("{name}.yaml")))
    }

    #[test]
    fn test_apply_outcome_copies_fields() {
        let mut r = pending("a");
        let mut outcome = ExecutionOutcome::failed("cart total mismatch");
        outcome.duration_ms = Some(1200);
        outcome.retry_count = 2;
        outcome.observations.insert(Severity::P1, 1);
        apply_outcome(&mut r, outcome);
        assert_eq!(r.status, ScenarioStatus::Failed);
        assert_eq!(r.duration_ms, 1200);
        assert_eq!(r.retry_count, 2);
        assert_eq!(r.error.as_deref(), Some("cart total mismatch"));
    }

    #[test]
    fn test_apply_non_final_status_becomes_error() {
        let mut r = pending("a");
        apply_outcome(
            &mut r,
            ExecutionOutcome {
                status: ScenarioStatus::Retrying,
                ..Default::default()
            },
        );
        assert_eq!(r.status, ScenarioStatus::Error);
        assert!(r.error.unwrap().contains("retrying"));
    }

    #[test]
    fn test_apply_executor_skip_keeps_reason() {
        let mut r = pending("a");
        apply_outcome(
            &mut r,
            ExecutionOutcome {
                status: ScenarioStatus::Skipped,
                error: Some("feature flag off".into()),
                ..Default::default()
            },
        );
        assert_eq!(r.status, ScenarioStatus::Skipped);
        assert_eq!(r.skip_reason.as_deref(), Some("feature flag off"));
    }
}
