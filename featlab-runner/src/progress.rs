//! Progress file with per-task counters and a rolling-rate ETA.
//!
//! One task is one (ticker, snapshot date) pair. The state machine
//! advances the tracker after every finished task and the orchestrator
//! refreshes the file after every ticker, so `status/progress.json`
//! tracks a long batch at task granularity. The ETA is derived from the
//! completion rate over a trailing window rather than the whole run, so
//! early slow tickers do not poison the estimate.

use std::collections::VecDeque;
use std::fs;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use featlab_core::store::{DataLayout, StoreError};

use crate::stats::RunStats;

/// Trailing window used for the completion rate.
pub const RATE_WINDOW: Duration = Duration::from_secs(120);

/// Shape of `status/progress.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub started_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
    /// Tasks finished so far, whatever their outcome.
    pub done: usize,
    /// Planned tasks: tickers x snapshot dates.
    pub total: usize,
    pub tickers: usize,
    pub dates_per_ticker: usize,
    pub percent: f64,
    /// None until enough samples exist to estimate a rate.
    pub eta_seconds: Option<u64>,
    /// Snapshots persisted so far (clean plus flagged).
    pub processed: u64,
    pub flagged: u64,
    pub failed: u64,
    pub current_ticker: Option<String>,
}

/// Tracks completion and writes the progress file.
pub struct ProgressTracker {
    tickers: usize,
    dates_per_ticker: usize,
    total: usize,
    done: usize,
    started_at: chrono::NaiveDateTime,
    samples: VecDeque<(Instant, usize)>,
}

impl ProgressTracker {
    /// A tracker for `tickers` tickers with `dates_per_ticker` snapshot
    /// dates each. If a progress file from an earlier run exists, its
    /// start time is kept so restarts show true elapsed.
    pub fn new(layout: &DataLayout, tickers: usize, dates_per_ticker: usize) -> Self {
        let started_at = fs::read_to_string(layout.progress_path())
            .ok()
            .and_then(|s| serde_json::from_str::<ProgressSnapshot>(&s).ok())
            .map(|p| p.started_at)
            .unwrap_or_else(|| chrono::Local::now().naive_local());

        Self {
            tickers,
            dates_per_ticker,
            total: tickers * dates_per_ticker,
            done: 0,
            started_at,
            samples: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while self
            .samples
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > RATE_WINDOW)
        {
            // Keep at least one sample outside the window as the rate anchor.
            if self.samples.len() <= 2 {
                break;
            }
            self.samples.pop_front();
        }
    }

    fn eta_seconds(&self, now: Instant) -> Option<u64> {
        let (anchor_at, anchor_done) = *self.samples.front()?;
        if self.samples.len() < 2 {
            return None;
        }
        let elapsed = now.duration_since(anchor_at).as_secs_f64();
        let advanced = self.done.saturating_sub(anchor_done);
        if elapsed <= 0.0 || advanced == 0 {
            return None;
        }
        let rate = advanced as f64 / elapsed;
        let remaining = self.total.saturating_sub(self.done) as f64;
        Some((remaining / rate).round() as u64)
    }

    /// Record one finished task and rewrite the progress file.
    pub fn advance(
        &mut self,
        layout: &DataLayout,
        current_ticker: &str,
        stats: &RunStats,
    ) -> Result<ProgressSnapshot, StoreError> {
        self.advance_by(layout, 1, current_ticker, stats)
    }

    /// Record `by` finished tasks and rewrite the progress file. A zero
    /// `by` refreshes the file without adding a rate sample.
    pub fn advance_by(
        &mut self,
        layout: &DataLayout,
        by: usize,
        current_ticker: &str,
        stats: &RunStats,
    ) -> Result<ProgressSnapshot, StoreError> {
        let now = Instant::now();
        self.done = (self.done + by).min(self.total);
        if by > 0 {
            self.samples.push_back((now, self.done));
            self.prune(now);
        }

        let snapshot = ProgressSnapshot {
            started_at: self.started_at,
            updated_at: chrono::Local::now().naive_local(),
            done: self.done,
            total: self.total,
            tickers: self.tickers,
            dates_per_ticker: self.dates_per_ticker,
            percent: if self.total == 0 {
                100.0
            } else {
                100.0 * self.done as f64 / self.total as f64
            },
            eta_seconds: self.eta_seconds(now),
            processed: stats.persisted(),
            flagged: stats.flagged,
            failed: stats.failed,
            current_ticker: Some(current_ticker.to_string()),
        };

        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| StoreError::Frame(format!("progress serialization: {e}")))?;
        fs::write(layout.progress_path(), json)?;
        Ok(snapshot)
    }
}
