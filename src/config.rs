//! TOML configuration for flakeguard.
//!
//! Every section is optional and falls back to compiled-in defaults. The
//! file is located via `--config`, then `FLAKEGUARD_CONFIG`, then
//! `./flakeguard.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::detect::{DetectorConfig, MarkerClassifier};
use crate::preflight::DEFAULT_MIN_FREE_MB;
use crate::scheduler::BatchConfig;

pub const CONFIG_ENV: &str = "FLAKEGUARD_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "flakeguard.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlakeguardConfig {
    #[serde(default)]
    pub detector: DetectorConfig,
    /// Defaults for `flakeguard run`; command-line flags override.
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub preflight: PreflightConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl FlakeguardConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Resolve configuration, in order:
    /// 1. `explicit` (the `--config` flag).
    /// 2. The path in `FLAKEGUARD_CONFIG`.
    /// 3. `./flakeguard.toml`, if present.
    /// 4. Compiled-in defaults.
    ///
    /// Runs before logging is initialized, so a file that is named but
    /// cannot be loaded is an error rather than a warning.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, ConfigSource)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, ConfigSource::File(path.to_path_buf())));
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            let config = Self::load(&path).with_context(|| format!("{CONFIG_ENV} is set"))?;
            return Ok((config, ConfigSource::File(path)));
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Ok((Self::load(local)?, ConfigSource::File(local.to_path_buf())));
        }

        Ok((Self::default(), ConfigSource::Defaults))
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// External scenario executor invoked as `<program> <args..> <scenario path>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Per-scenario wall-clock limit.
    pub timeout_secs: u64,
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: "flakeguard-runner".to_string(),
            args: Vec::new(),
            timeout_secs: 600,
        }
    }
}

// ---------------------------------------------------------------------------
// Preflight
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    /// Minimum free space on the output volume, in MiB.
    pub min_free_mb: u64,
    /// Require the executor program to resolve on `PATH`.
    pub check_executor: bool,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            min_free_mb: DEFAULT_MIN_FREE_MB,
            check_executor: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Detector state: history and quarantine entries.
    pub state_file: PathBuf,
    /// Hand-maintained quarantine list.
    pub quarantine_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from(".flakeguard/state.json"),
            quarantine_file: PathBuf::from(".flakeguard/quarantine.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Markers added to the built-in infrastructure-error list.
    pub extra_markers: Vec<String>,
    /// Use only `extra_markers`, dropping the built-in list.
    pub replace_defaults: bool,
}

impl ClassifierConfig {
    pub fn build(&self) -> MarkerClassifier {
        if self.replace_defaults {
            MarkerClassifier::new(&self.extra_markers)
        } else {
            MarkerClassifier::with_extra(&self.extra_markers)
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::InfraErrorPredicate;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = FlakeguardConfig::default();

        assert_eq!(cfg.detector.window_size, 10);
        assert_eq!(cfg.detector.min_runs, 3);
        assert!(cfg.detector.auto_quarantine);
        assert!(!cfg.detector.auto_unquarantine);

        assert_eq!(cfg.batch.parallel, 4);
        assert!(!cfg.batch.stop_on_fail);

        assert_eq!(cfg.executor.timeout_secs, 600);
        assert_eq!(cfg.preflight.min_free_mb, 500);
        assert_eq!(cfg.storage.state_file, PathBuf::from(".flakeguard/state.json"));
        assert!(cfg.classifier.extra_markers.is_empty());
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[detector]
window_size = 20
flake_threshold = 0.25
auto_unquarantine = true
consecutive_failures_threshold = 4

[batch]
pattern = "e2e/scenarios"
parallel = 8
stop_on_fail = true
exclude_tags = ["slow"]
output_dir = "/tmp/runs"

[executor]
program = "npx"
args = ["e2e-runner", "--json"]
timeout_secs = 300

[preflight]
min_free_mb = 2048
check_executor = false

[storage]
state_file = "/var/lib/flakeguard/state.json"

[classifier]
extra_markers = ["selenium grid", "ETIMEDOUT"]

[logging]
level = "debug"
format = "json"
"#;

        let cfg: FlakeguardConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.detector.window_size, 20);
        assert!(cfg.detector.auto_unquarantine);
        assert_eq!(cfg.detector.consecutive_failures_threshold, 4);
        assert_eq!(cfg.detector.min_runs, 3);
        assert_eq!(cfg.batch.pattern, "e2e/scenarios");
        assert_eq!(cfg.batch.exclude_tags, vec!["slow"]);
        assert_eq!(cfg.batch.output_dir, PathBuf::from("/tmp/runs"));
        assert_eq!(cfg.executor.args, vec!["e2e-runner", "--json"]);
        assert_eq!(cfg.executor.timeout(), Duration::from_secs(300));
        assert!(!cfg.preflight.check_executor);
        assert_eq!(
            cfg.storage.quarantine_file,
            PathBuf::from(".flakeguard/quarantine.json")
        );
        assert_eq!(cfg.logging.format, LogFormat::Json);

        let classifier = cfg.classifier.build();
        assert!(classifier.is_infra_error("connect ETIMEDOUT 10.0.0.1:443"));
        assert!(classifier.is_infra_error("Playwright browser closed"));
    }

    #[test]
    fn test_replace_default_markers() {
        let cfg = ClassifierConfig {
            extra_markers: vec!["grid down".into()],
            replace_defaults: true,
        };
        let c = cfg.build();
        assert!(c.is_infra_error("GRID DOWN"));
        assert!(!c.is_infra_error("timeout"));
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: FlakeguardConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, FlakeguardConfig::default());
    }

    #[test]
    fn test_resolve_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("flakeguard.toml");
        std::fs::write(&path, "[batch]\nparallel = 2\n").unwrap();

        let (cfg, source) = FlakeguardConfig::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.batch.parallel, 2);
        assert_eq!(source, ConfigSource::File(path));
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = FlakeguardConfig::load(Path::new("/nonexistent/path/flakeguard.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = FlakeguardConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: FlakeguardConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(cfg, roundtripped);
    }
}
