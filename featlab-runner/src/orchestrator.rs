//! Batch orchestrator: wires config, state machine, guards, progress
//! and the merge step into one run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use featlab_core::assemble::RowAssembler;
use featlab_core::store::{merge_all_tickers, DataLayout, MergeOutcome, StoreError};
use featlab_core::validate::ValidatorConfig;

use crate::config::{ConfigError, RunConfig};
use crate::entity::{process_ticker, PacingSettings, StopReason};
use crate::guard::{RunDeadline, Sleeper};
use crate::progress::ProgressTracker;
use crate::stats::RunStats;

/// Errors from the orchestrator.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Shape of `status/last_run.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLedger {
    pub finished_at: chrono::NaiveDateTime,
    pub start_year: i32,
    pub end_year: i32,
    pub overwrite_mode: String,
    pub stats: RunStats,
    /// Whether each ticker of the universe has a history file after the
    /// run, keyed by symbol.
    pub tickers: BTreeMap<String, bool>,
    /// Stop reasons, one per affected ticker, plus the deadline if it
    /// fired.
    pub stop_reasons: Vec<String>,
    pub merge: String,
}

/// Complete result of one batch run.
#[derive(Debug)]
pub struct BatchReport {
    pub stats: RunStats,
    /// Every early stop, in the order it happened. Ticker-scoped aborts
    /// (rate-limit storm, fatal provider error) and at most one deadline.
    pub stops: Vec<StopReason>,
    pub merge: MergeOutcome,
    /// Tagged log lines from every ticker, in processing order.
    pub logs: Vec<String>,
}

impl BatchReport {
    /// True when any snapshot hard-failed. Guard stops are informational
    /// and do not make a run hard-fail.
    pub fn hard_failed(&self) -> bool {
        self.stats.any_hard_failure()
    }

    pub fn deadline_hit(&self) -> bool {
        self.stops.iter().any(StopReason::stops_run)
    }
}

fn merge_outcome_label(outcome: &MergeOutcome) -> String {
    match outcome {
        MergeOutcome::Merged { tickers, rows } => {
            format!("merged {tickers} tickers, {rows} rows")
        }
        MergeOutcome::SkippedFresh => "skipped, combined table fresh".to_string(),
        MergeOutcome::NoSources => "no history files".to_string(),
    }
}

/// Run the whole batch: every ticker over every snapshot date, then the
/// cross-ticker merge, then the run ledger.
///
/// Ticker order is the normalized config order and never changes with
/// outcomes. A ticker-scoped abort moves on to the next ticker; only
/// the deadline ends the loop. Everything already persisted stays
/// persisted either way.
pub fn run_batch(
    config: &RunConfig,
    assembler: &mut dyn RowAssembler,
    sleeper: &mut dyn Sleeper,
) -> Result<BatchReport, RunError> {
    config.validate()?;
    let layout = DataLayout::new(&config.data_dir);
    layout.ensure_dirs()?;

    let universe = config.universe()?;
    let dates = config.snapshot_dates();
    let settings = PacingSettings {
        sleep_between_calls: config.sleep_between_calls,
        max_retries: config.max_retries,
        retry_base_sleep: config.retry_base_sleep,
        max_consecutive_rate_limits: config.max_consecutive_rate_limits,
    };
    let validator = ValidatorConfig::default();
    let deadline = RunDeadline::from_minutes(config.max_run_minutes);
    let mut progress = ProgressTracker::new(&layout, universe.len(), dates.len());

    let mut stats = RunStats::default();
    let mut logs: Vec<String> = Vec::new();
    let mut stops: Vec<StopReason> = Vec::new();

    for ticker in &universe {
        let outcome = process_ticker(
            ticker,
            &dates,
            assembler,
            &layout,
            &settings,
            config.overwrite_mode,
            &validator,
            &deadline,
            &mut stats,
            &mut progress,
            sleeper,
        )?;
        for line in &outcome.logs {
            println!("{line}");
        }
        logs.extend(outcome.logs);
        progress.advance_by(&layout, 0, ticker.as_str(), &stats)?;

        if let Some(reason) = outcome.stop {
            let run_level = reason.stops_run();
            stops.push(reason);
            if run_level {
                break;
            }
        }
    }

    let merge = merge_all_tickers(&layout, config.force_merge)?;
    let merge_line = format!("[INFO] merge: {}", merge_outcome_label(&merge));
    println!("{merge_line}");
    logs.push(merge_line);
    let summary_line = format!("[INFO] run summary: {}", stats.summary_line());
    println!("{summary_line}");
    logs.push(summary_line);

    let tickers: BTreeMap<String, bool> = universe
        .iter()
        .map(|t| (t.as_str().to_string(), layout.history_path(t).exists()))
        .collect();

    let ledger = RunLedger {
        finished_at: chrono::Local::now().naive_local(),
        start_year: config.start_year,
        end_year: config.end_year,
        overwrite_mode: config.overwrite_mode.as_str().to_string(),
        stats: stats.clone(),
        tickers,
        stop_reasons: stops.iter().map(StopReason::describe).collect(),
        merge: merge_outcome_label(&merge),
    };
    let json = serde_json::to_string_pretty(&ledger)
        .map_err(|e| StoreError::Frame(format!("ledger serialization: {e}")))?;
    std::fs::write(layout.last_run_path(), json).map_err(StoreError::Io)?;

    Ok(BatchReport {
        stats,
        stops,
        merge,
        logs,
    })
}
