//! External-process executor: spawn, parse JSON stdout, enforce timeouts.

use super::{ExecutionOutcome, RunParams, ScenarioExecutor};
use crate::scheduler::discovery::Scenario;
use anyhow::{Context, Result};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Runs `<program> <args..> <scenario path>` and reads one JSON object from stdout.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl ScenarioExecutor for CommandExecutor {
    async fn execute(&self, scenario: &Scenario, params: &RunParams) -> Result<ExecutionOutcome> {
        let started = Instant::now();

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&scenario.path)
            .env("FLAKEGUARD_BATCH_ID", &params.batch_id)
            .env("FLAKEGUARD_ARTIFACT_DIR", &params.artifact_dir)
            .env("FLAKEGUARD_SCENARIO", &scenario.name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(convoy) = &params.convoy {
            cmd.env("FLAKEGUARD_CONVOY", convoy);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.program))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(out) => out.with_context(|| format!("Failed to wait for {}", self.program))?,
            Err(_) => {
                warn!(scenario = %scenario.name, timeout_secs = self.timeout.as_secs(), "executor timed out");
                let mut outcome =
                    ExecutionOutcome::error(format!("timeout after {}s", self.timeout.as_secs()));
                outcome.duration_ms = Some(elapsed_ms(started));
                return Ok(outcome);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(scenario = %scenario.name, code = ?output.status.code(), "executor finished");

        let mut outcome = match parse_output(&stdout) {
            Ok(outcome) => outcome,
            Err(e) => {
                let detail = if stderr.trim().is_empty() {
                    format!("unparseable executor output ({e}), exit status {}", output.status)
                } else {
                    stderr.trim().to_string()
                };
                ExecutionOutcome::error(detail)
            }
        };
        if outcome.duration_ms.is_none() {
            outcome.duration_ms = Some(elapsed_ms(started));
        }
        Ok(outcome)
    }

    fn program(&self) -> Option<&str> {
        Some(&self.program)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Parse executor stdout. Executors that also log to stdout are tolerated:
/// when the whole output is not one JSON object, the last line that is
/// one wins.
pub fn parse_output(stdout: &str) -> Result<ExecutionOutcome> {
    let trimmed = stdout.trim();
    if let Ok(outcome) = serde_json::from_str::<ExecutionOutcome>(trimmed) {
        return Ok(outcome);
    }
    trimmed
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str::<ExecutionOutcome>(l).ok())
        .context("no JSON result object in executor output")
}
