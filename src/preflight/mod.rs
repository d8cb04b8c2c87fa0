//! Preflight gate run once before a batch executes anything.

pub mod disk;

use crate::scheduler::BatchConfig;
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Default free-space floor: 500 MiB.
pub const DEFAULT_MIN_FREE_MB: u64 = 500;

#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub passed: bool,
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn from_checks(checks: Vec<CheckResult>) -> Self {
        let passed = checks.iter().all(|c| c.status != CheckStatus::Fail);
        Self { passed, checks }
    }

    pub fn failed_checks(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .map(|c| format!("{}: {}", c.name, c.details))
            .collect()
    }
}

/// Result for a single preflight check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: String,
    pub remediation: Option<String>,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            details: details.into(),
            remediation: None,
        }
    }

    fn remediation(mut self, hint: impl Into<String>) -> Self {
        self.remediation = Some(hint.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Fail,
    Warning,
    Skipped,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "PASS"),
            CheckStatus::Fail => write!(f, "FAIL"),
            CheckStatus::Warning => write!(f, "WARN"),
            CheckStatus::Skipped => write!(f, "SKIP"),
        }
    }
}

#[async_trait::async_trait]
pub trait PreflightChecker: Send + Sync {
    async fn check(&self, config: &BatchConfig) -> PreflightReport;
}

/// Output directory, free disk space, executor program.
#[derive(Debug, Clone)]
pub struct StandardPreflight {
    min_free_bytes: u64,
    program: Option<String>,
}

impl StandardPreflight {
    pub fn new(min_free_mb: u64, program: Option<String>) -> Self {
        Self {
            min_free_bytes: min_free_mb * 1024 * 1024,
            program,
        }
    }
}

impl Default for StandardPreflight {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_FREE_MB, None)
    }
}

#[async_trait::async_trait]
impl PreflightChecker for StandardPreflight {
    async fn check(&self, config: &BatchConfig) -> PreflightReport {
        info!(output_dir = %config.output_dir.display(), "running preflight checks");

        let mut checks = vec![check_output_dir(&config.output_dir)];

        // df needs the directory to exist
        if checks[0].status == CheckStatus::Pass {
            checks.push(self.check_disk(&config.output_dir).await);
        } else {
            checks.push(CheckResult::new(
                "Disk space",
                CheckStatus::Skipped,
                "output directory unavailable",
            ));
        }
        checks.push(self.check_program());

        let report = PreflightReport::from_checks(checks);
        info!(passed = report.passed, "preflight complete");
        report
    }
}

impl StandardPreflight {
    async fn check_disk(&self, dir: &Path) -> CheckResult {
        const NAME: &str = "Disk space";
        match disk::available_bytes(dir).await {
            Ok(avail) if avail < self.min_free_bytes => CheckResult::new(
                NAME,
                CheckStatus::Fail,
                format!(
                    "{} free, need {}",
                    disk::format_bytes(avail),
                    disk::format_bytes(self.min_free_bytes)
                ),
            )
            .remediation("Free space or point --output-dir at a larger volume."),
            Ok(avail) => CheckResult::new(NAME, CheckStatus::Pass, format!("{} free", disk::format_bytes(avail))),
            Err(e) => CheckResult::new(NAME, CheckStatus::Warning, format!("could not determine free space: {e}")),
        }
    }

    fn check_program(&self) -> CheckResult {
        const NAME: &str = "Executor";
        let Some(program) = &self.program else {
            return CheckResult::new(NAME, CheckStatus::Skipped, "no external executor configured");
        };
        match which::which(program) {
            Ok(path) => CheckResult::new(NAME, CheckStatus::Pass, format!("{}", path.display())),
            Err(e) => CheckResult::new(NAME, CheckStatus::Fail, format!("'{program}' not found: {e}"))
                .remediation("Install the executor or set executor.program in flakeguard.toml."),
        }
    }
}

fn check_output_dir(dir: &Path) -> CheckResult {
    const NAME: &str = "Output directory";
    if let Err(e) = std::fs::create_dir_all(dir) {
        return CheckResult::new(NAME, CheckStatus::Fail, format!("cannot create {}: {e}", dir.display()))
            .remediation("Check permissions or choose another --output-dir.");
    }
    let probe = dir.join(format!(".flakeguard-preflight-{}", std::process::id()));
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            CheckResult::new(NAME, CheckStatus::Pass, format!("{} is writable", dir.display()))
        }
        Err(e) => CheckResult::new(NAME, CheckStatus::Fail, format!("{} is not writable: {e}", dir.display()))
            .remediation("Check permissions or choose another --output-dir."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> BatchConfig {
        BatchConfig {
            output_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_writable_dir_without_program_passes() {
        let dir = tempfile::TempDir::new().unwrap();
        let checker = StandardPreflight::new(0, None);
        let report = checker.check(&config(&dir.path().join("out"))).await;
        assert!(report.passed, "{:?}", report.checks);
        assert_eq!(report.checks[0].status, CheckStatus::Pass);
        assert_eq!(report.checks[2].status, CheckStatus::Skipped);
        assert!(dir.path().join("out").is_dir());
    }

    #[tokio::test]
    async fn test_missing_program_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let checker = StandardPreflight::new(0, Some("flakeguard-no-such-executor".into()));
        let report = checker.check(&config(dir.path())).await;
        assert!(!report.passed);
        let failed = report.failed_checks();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].starts_with("Executor"));
    }

    #[test]
    fn test_report_passes_with_warnings() {
        let report = PreflightReport::from_checks(vec![
            CheckResult::new("a", CheckStatus::Pass, ""),
            CheckResult::new("b", CheckStatus::Warning, ""),
        ]);
        assert!(report.passed);
    }
}
