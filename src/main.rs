use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use flakeguard::config::{ConfigSource, FlakeguardConfig};
use flakeguard::detect::FlakeDetector;
use flakeguard::executor::CommandExecutor;
use flakeguard::preflight::{PreflightChecker, StandardPreflight};
use flakeguard::quarantine::QuarantineList;
use flakeguard::scheduler::{BatchConfig, BatchError, BatchScheduler};
use flakeguard::storage::ManifestStore;
use flakeguard::{logging, report};

#[derive(Parser)]
#[command(
    name = "flakeguard",
    about = "Flaky-scenario detection and quarantine for end-to-end test suites",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $FLAKEGUARD_CONFIG, then ./flakeguard.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON output for machine parsing
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and manage quarantined scenarios
    Quarantine {
        #[command(subcommand)]
        action: QuarantineCmd,
    },

    /// Show flake metrics for one scenario or all of them
    Metrics {
        /// Scenario name
        scenario: Option<String>,

        /// Only scenarios currently classified as flaky
        #[arg(long)]
        flaky: bool,
    },

    /// Show recorded runs for a scenario, newest first
    History {
        scenario: String,

        /// Number of runs to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Forget all recorded runs for a scenario
    ClearHistory { scenario: String },

    /// Run a batch of scenarios
    Run(RunArgs),

    /// List recent batch manifests
    Batches {
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Run preflight checks without executing anything
    Preflight {
        /// Output directory to check
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum QuarantineCmd {
    /// List detector and hand-maintained quarantine entries
    List,

    /// Quarantine a scenario manually
    Add {
        scenario: String,

        #[arg(long)]
        reason: String,

        /// Add to the hand-maintained list instead of the detector
        #[arg(long)]
        list: bool,
    },

    /// Release a scenario from both the detector and the list
    Remove { scenario: String },

    /// Show one quarantine entry
    Show { scenario: String },

    /// Attach notes to an existing detector entry
    Annotate { scenario: String, notes: String },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Glob pattern or directory of scenario files
    #[arg(long)]
    pattern: Option<String>,

    /// Number of concurrent workers
    #[arg(long)]
    parallel: Option<usize>,

    /// Skip remaining scenarios after the first failure
    #[arg(long)]
    stop_on_fail: bool,

    /// Only run scenarios with this tag (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Skip scenarios with this tag (repeatable)
    #[arg(long = "exclude-tag")]
    exclude_tags: Vec<String>,

    /// Run quarantined scenarios too
    #[arg(long)]
    include_quarantined: bool,

    /// Baseline batch id to compare against
    #[arg(long)]
    compare_to: Option<String>,

    #[arg(long)]
    skip_preflight: bool,

    /// Where batch manifests and artifacts are written
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Free-form label passed to the executor and stored in the manifest
    #[arg(long)]
    convoy: Option<String>,
}

impl RunArgs {
    fn apply(self, mut batch: BatchConfig) -> BatchConfig {
        if let Some(pattern) = self.pattern {
            batch.pattern = pattern;
        }
        if let Some(parallel) = self.parallel {
            batch.parallel = parallel;
        }
        if let Some(dir) = self.output_dir {
            batch.output_dir = dir;
        }
        if !self.tags.is_empty() {
            batch.filter_tags = self.tags;
        }
        if !self.exclude_tags.is_empty() {
            batch.exclude_tags = self.exclude_tags;
        }
        batch.stop_on_fail |= self.stop_on_fail;
        batch.include_quarantined |= self.include_quarantined;
        batch.skip_preflight |= self.skip_preflight;
        batch.compare_to = self.compare_to.or(batch.compare_to);
        batch.convoy = self.convoy.or(batch.convoy);
        batch
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_detector(cfg: &FlakeguardConfig) -> Result<FlakeDetector> {
    let path = &cfg.storage.state_file;
    let detector = FlakeDetector::open(path, cfg.detector.clone())
        .with_context(|| format!("Failed to load detector state from {}", path.display()))?;
    tracing::debug!(
        path = ?detector.path(),
        window = detector.config().window_size,
        threshold = detector.config().flake_threshold,
        "detector state loaded"
    );
    Ok(detector)
}

fn open_list(cfg: &FlakeguardConfig) -> Result<QuarantineList> {
    let path = &cfg.storage.quarantine_file;
    QuarantineList::open(path)
        .with_context(|| format!("Failed to load quarantine list from {}", path.display()))
}

fn preflight_checker(cfg: &FlakeguardConfig) -> StandardPreflight {
    let program = cfg
        .preflight
        .check_executor
        .then(|| cfg.executor.program.clone());
    StandardPreflight::new(cfg.preflight.min_free_mb, program)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let (cfg, source) = FlakeguardConfig::resolve(cli.config.as_deref())?;
    logging::init(&cfg.logging)?;
    match &source {
        ConfigSource::File(path) => tracing::debug!(path = %path.display(), "loaded configuration"),
        ConfigSource::Defaults => tracing::debug!("no config file found, using compiled-in defaults"),
    }

    match cli.command {
        Commands::Quarantine { action } => quarantine_command(&cfg, action, cli.json)?,
        Commands::Metrics { scenario, flaky } => {
            let detector = open_detector(&cfg)?;
            match scenario {
                Some(name) => {
                    let m = detector.metrics(&name);
                    if cli.json {
                        print_json(&m)?;
                    } else {
                        print!("{}", report::format_metrics_detail(&m));
                    }
                }
                None => {
                    let all = if flaky {
                        detector.flaky_scenarios()
                    } else {
                        detector.all_metrics()
                    };
                    if cli.json {
                        print_json(&all)?;
                    } else {
                        print!("{}", report::format_metrics_table(&all));
                    }
                }
            }
        }
        Commands::History { scenario, limit } => {
            let detector = open_detector(&cfg)?;
            match detector.history(&scenario) {
                Some(h) if cli.json => print_json(&h)?,
                Some(h) => print!("{}", report::format_history(&h, limit)),
                None if cli.json => println!("null"),
                None => println!("No history for '{}'.", scenario),
            }
        }
        Commands::ClearHistory { scenario } => {
            let detector = open_detector(&cfg)?;
            if detector.clear_history(&scenario)? {
                println!("History for '{}' cleared.", scenario);
            } else {
                println!("No history for '{}'.", scenario);
            }
        }
        Commands::Run(args) => return run_batch(&cfg, args, cli.json).await,
        Commands::Batches { limit } => {
            let store = ManifestStore::new(&cfg.batch.output_dir);
            tracing::debug!(root = %store.root().display(), limit, "listing batch manifests");
            let batches = store.list_recent(limit)?;
            if cli.json {
                print_json(&batches)?;
            } else {
                print!("{}", report::format_batches(&batches));
            }
        }
        Commands::Preflight { output_dir } => {
            let mut batch = cfg.batch.clone();
            if let Some(dir) = output_dir {
                batch.output_dir = dir;
            }
            let report = preflight_checker(&cfg).check(&batch).await;
            if cli.json {
                print_json(&report)?;
            } else {
                print!("{}", report::format_preflight(&report));
            }
            if !report.passed {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn quarantine_command(cfg: &FlakeguardConfig, action: QuarantineCmd, json: bool) -> Result<()> {
    let detector = open_detector(cfg)?;
    let list = open_list(cfg)?;

    match action {
        QuarantineCmd::List => {
            let entries = detector.list_quarantined();
            let listed = list.list();
            if json {
                print_json(&serde_json::json!({ "detector": entries, "list": listed }))?;
            } else {
                print!("{}", report::format_quarantine_table(&entries, &listed));
            }
        }
        QuarantineCmd::Add { scenario, reason, list: to_list } => {
            if to_list {
                list.add(&scenario, &reason)?;
                println!("Scenario '{}' added to quarantine list.", scenario);
            } else {
                detector.quarantine(&scenario, &reason)?;
                println!("Scenario '{}' quarantined.", scenario);
            }
        }
        QuarantineCmd::Remove { scenario } => {
            let from_detector = detector.unquarantine(&scenario)?;
            let from_list = list.remove(&scenario)?;
            if from_detector || from_list {
                println!("Scenario '{}' released.", scenario);
            } else {
                println!("Scenario '{}' was not quarantined.", scenario);
            }
        }
        QuarantineCmd::Show { scenario } => match detector.quarantine_entry(&scenario) {
            Some(entry) if json => print_json(&entry)?,
            Some(entry) => print!("{}", report::format_quarantine_entry(&entry)),
            None => match list.list().into_iter().find(|l| l.scenario == scenario) {
                Some(listed) if json => print_json(&listed)?,
                Some(listed) => println!("{} (quarantine list): {}", listed.scenario, listed.note),
                None => println!("Scenario '{}' is not quarantined.", scenario),
            },
        },
        QuarantineCmd::Annotate { scenario, notes } => {
            if detector.annotate(&scenario, &notes)? {
                println!("Notes updated for '{}'.", scenario);
            } else {
                println!("Scenario '{}' is not quarantined.", scenario);
            }
        }
    }
    Ok(())
}

async fn run_batch(cfg: &FlakeguardConfig, args: RunArgs, json: bool) -> Result<ExitCode> {
    let batch = args.apply(cfg.batch.clone());
    tracing::info!(pattern = %batch.pattern, parallel = batch.parallel, "Running batch");

    let detector = Arc::new(open_detector(cfg)?);
    let list = Arc::new(open_list(cfg)?);
    let executor = Arc::new(CommandExecutor::new(
        cfg.executor.program.clone(),
        cfg.executor.args.clone(),
        cfg.executor.timeout(),
    ));

    let scheduler = BatchScheduler::new(detector, executor)
        .with_lookup(list)
        .with_classifier(Arc::new(cfg.classifier.build()))
        .with_preflight(Arc::new(preflight_checker(cfg)));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight scenarios");
            on_signal.cancel();
        }
    });

    let result = match scheduler.run(batch, cancel).await {
        Ok(result) => result,
        Err(BatchError::PreflightFailed { failed }) => {
            eprintln!("Preflight failed:");
            for f in &failed {
                eprintln!(" - {}", f);
            }
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        print_json(&result)?;
    } else {
        print!("{}", report::format_batch(&result));
    }

    if result.summary.has_failures() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
