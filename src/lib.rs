//! flakeguard -- flaky-scenario detection and concurrent batch execution.
//!
//! This crate provides run-history tracking, windowed flake metrics, the
//! automatic quarantine state machine, a bounded batch scheduler, and
//! baseline comparison between batches.

pub mod analysis;
pub mod config;
pub mod detect;
pub mod executor;
pub mod logging;
pub mod preflight;
pub mod quarantine;
pub mod report;
pub mod scheduler;
pub mod storage;
pub mod types;

pub use crate::detect::{DetectorConfig, FlakeDetector};
pub use crate::scheduler::{BatchConfig, BatchResult, BatchScheduler};
