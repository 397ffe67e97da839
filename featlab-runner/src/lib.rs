//! FeatLab runner: batch orchestration on top of `featlab-core`.
//!
//! This crate drives the materialization pipeline:
//! - TOML run configuration with a normalized ticker universe
//! - Per-ticker state machine (assemble, validate, single-flush upsert)
//! - Rate-limit circuit breaker and wall-clock deadline
//! - Progress file with rolling-window ETA
//! - Cross-ticker merge and the `last_run.json` ledger
//! - Deterministic synthetic assembler for demos and tests

pub mod config;
pub mod entity;
pub mod guard;
pub mod orchestrator;
pub mod progress;
pub mod stats;
pub mod synthetic;

pub use config::{ConfigError, RunConfig};
pub use entity::{process_ticker, PacingSettings, StopReason, TickerOutcome};
pub use guard::{RateLimitBreaker, RunDeadline, Sleeper, ThreadSleeper};
pub use orchestrator::{run_batch, BatchReport, RunError, RunLedger};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use stats::RunStats;
pub use synthetic::SyntheticAssembler;
