//! Per-ticker processing state machine.
//!
//! For one ticker, walk its snapshot dates in order, assemble and
//! validate each row, and flush everything that survived in a single
//! history upsert at the end. The batch is flushed on every exit path,
//! so a deadline or breaker abort never loses assembled rows.
//!
//! Per-date consultation order: deadline check, skip-if-present, then
//! the retry loop. Error handling inside the loop:
//! - rate limited: retried in place with a linearly growing pause; the
//!   per-ticker breaker aborts the ticker once the streak hits its limit
//! - transient (server/network/other): exponential backoff up to the
//!   retry budget, then the date hard-fails and iteration continues
//! - auth/plan: the date hard-fails and the rest of this ticker's dates
//!   are abandoned; the run moves on to the next ticker
//! - insufficient history: the date is dropped and counted as skipped
//! - contract violation: the date hard-fails without retry

use std::time::Duration;

use chrono::NaiveDate;

use featlab_core::assemble::{AssembleError, RowAssembler};
use featlab_core::store::{upsert_history, upsert_static, DataLayout, OverwriteMode, StoreError};
use featlab_core::validate::{validate, Validated, ValidatorConfig};
use featlab_core::{FeatureRow, StaticRow, Ticker};

use crate::guard::{RateLimitBreaker, RunDeadline, Sleeper};
use crate::progress::ProgressTracker;
use crate::stats::RunStats;

/// Why processing stopped early. Only `Deadline` stops the whole run;
/// the other two abandon the current ticker and move on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Wall-clock budget exhausted; the run winds down.
    Deadline,
    /// Too many consecutive rate-limited responses for this ticker.
    RateLimitStorm,
    /// Credentials or plan rejected for this ticker's data.
    FatalProvider(String),
}

impl StopReason {
    pub fn describe(&self) -> String {
        match self {
            StopReason::Deadline => "wall-clock budget exhausted".to_string(),
            StopReason::RateLimitStorm => "consecutive rate-limit threshold reached".to_string(),
            StopReason::FatalProvider(msg) => format!("fatal provider error: {msg}"),
        }
    }

    /// Deadline is the only run-level stop.
    pub fn stops_run(&self) -> bool {
        matches!(self, StopReason::Deadline)
    }
}

/// Timing and guard knobs the state machine needs from the run config.
#[derive(Debug, Clone, Copy)]
pub struct PacingSettings {
    pub sleep_between_calls: f64,
    pub max_retries: u32,
    pub retry_base_sleep: f64,
    pub max_consecutive_rate_limits: u32,
}

/// What happened while processing one ticker.
#[derive(Debug)]
pub struct TickerOutcome {
    /// Tagged log lines, in event order.
    pub logs: Vec<String>,
    /// True when the ticker's history file content changed.
    pub changed: bool,
    /// Set when processing stopped before the last snapshot date.
    pub stop: Option<StopReason>,
}

/// Most recent row strictly before `as_of`. When a pending row and an
/// on-disk row share the winning date, the pending row wins: it is what
/// the upsert will persist.
fn most_recent_prior<'a>(
    existing: &'a [FeatureRow],
    pending: &'a [FeatureRow],
    as_of: NaiveDate,
) -> Option<&'a FeatureRow> {
    let best_pending = pending
        .iter()
        .filter(|r| r.as_of < as_of)
        .max_by_key(|r| r.as_of);
    let best_existing = existing
        .iter()
        .filter(|r| r.as_of < as_of)
        .max_by_key(|r| r.as_of);
    match (best_pending, best_existing) {
        (Some(p), Some(e)) if e.as_of > p.as_of => Some(e),
        (Some(p), _) => Some(p),
        (None, e) => e,
    }
}

fn transient_backoff(settings: &PacingSettings, attempt: u32) -> Duration {
    Duration::from_secs_f64(settings.retry_base_sleep * f64::from(1u32 << attempt.min(16)))
}

/// Process one ticker over its snapshot dates.
///
/// In `Skip` mode a ticker with an existing history file is left
/// untouched; in `Append` mode individual dates already on disk are
/// skipped without a provider call. Everything assembled is flushed in
/// one upsert before returning, whatever the exit path.
#[allow(clippy::too_many_arguments)]
pub fn process_ticker(
    ticker: &Ticker,
    dates: &[NaiveDate],
    assembler: &mut dyn RowAssembler,
    layout: &DataLayout,
    settings: &PacingSettings,
    mode: OverwriteMode,
    validator: &ValidatorConfig,
    deadline: &RunDeadline,
    stats: &mut RunStats,
    progress: &mut ProgressTracker,
    sleeper: &mut dyn Sleeper,
) -> Result<TickerOutcome, StoreError> {
    let mut logs: Vec<String> = Vec::new();
    let history_path = layout.history_path(ticker);

    if mode == OverwriteMode::Skip && history_path.exists() {
        stats.skipped += 1;
        logs.push(format!("[SKIP] {ticker}: history file exists, skip mode"));
        progress.advance_by(layout, dates.len(), ticker.as_str(), stats)?;
        return Ok(TickerOutcome {
            logs,
            changed: false,
            stop: None,
        });
    }

    // Overwrite discards the old table, so it provides no trend context.
    let existing = if mode == OverwriteMode::Overwrite {
        Vec::new()
    } else {
        featlab_core::store::load_history_rows(&history_path)?
    };
    let mut breaker = RateLimitBreaker::new(settings.max_consecutive_rate_limits);
    let mut pending: Vec<FeatureRow> = Vec::new();
    let mut static_row: Option<StaticRow> = None;
    let mut stop: Option<StopReason> = None;

    'dates: for &as_of in dates {
        if deadline.expired() {
            logs.push(format!(
                "[INFO] {ticker}: stopping at {as_of}, {}",
                StopReason::Deadline.describe()
            ));
            stop = Some(StopReason::Deadline);
            break 'dates;
        }

        if mode == OverwriteMode::Append && existing.iter().any(|r| r.as_of == as_of) {
            stats.skipped += 1;
            logs.push(format!("[SKIP] {ticker} {as_of}: already present"));
            progress.advance(layout, ticker.as_str(), stats)?;
            continue 'dates;
        }

        let mut transient_attempts = 0u32;
        loop {
            match assembler.assemble(ticker, as_of) {
                Ok(assembled) => {
                    breaker.record_success();
                    if let Err(e) = assembled.check_contract(ticker, as_of) {
                        stats.failed += 1;
                        logs.push(format!("[FAIL] {ticker} {as_of}: {e}"));
                        progress.advance(layout, ticker.as_str(), stats)?;
                        continue 'dates;
                    }
                    if static_row.is_none() {
                        static_row = assembled.static_row.clone();
                    }

                    let prior = most_recent_prior(&existing, &pending, as_of);
                    let outcome = validate(assembled.dynamic, prior, validator);
                    match &outcome {
                        Validated::Ok(_) => {
                            stats.ok += 1;
                            logs.push(format!("[OK] {ticker} {as_of}"));
                        }
                        Validated::Flagged(_, violations) => {
                            stats.flagged += 1;
                            logs.push(format!(
                                "[FLAGGED] {ticker} {as_of}: {}",
                                violations.join("; ")
                            ));
                            layout.write_audit_note(ticker, as_of, violations)?;
                        }
                    }
                    pending.push(outcome.into_stamped_row());
                    progress.advance(layout, ticker.as_str(), stats)?;
                    sleeper.sleep(Duration::from_secs_f64(settings.sleep_between_calls));
                    continue 'dates;
                }
                Err(AssembleError::InsufficientHistory { .. }) => {
                    stats.skipped += 1;
                    logs.push(format!("[SKIP] {ticker} {as_of}: insufficient history"));
                    progress.advance(layout, ticker.as_str(), stats)?;
                    continue 'dates;
                }
                Err(AssembleError::Contract(msg)) => {
                    stats.failed += 1;
                    logs.push(format!("[FAIL] {ticker} {as_of}: contract violation: {msg}"));
                    progress.advance(layout, ticker.as_str(), stats)?;
                    continue 'dates;
                }
                Err(AssembleError::Provider(e)) if e.is_fatal() => {
                    stats.failed += 1;
                    logs.push(format!("[FAIL] {ticker} {as_of}: {e}"));
                    progress.advance(layout, ticker.as_str(), stats)?;
                    stop = Some(StopReason::FatalProvider(e.to_string()));
                    break 'dates;
                }
                Err(AssembleError::Provider(e)) if e.is_rate_limit() => {
                    if breaker.record_rate_limit() {
                        logs.push(format!(
                            "[INFO] {ticker} {as_of}: {}",
                            StopReason::RateLimitStorm.describe()
                        ));
                        stop = Some(StopReason::RateLimitStorm);
                        break 'dates;
                    }
                    sleeper.sleep(breaker.backoff());
                    // Same date, same attempt budget: throttling is not a failure.
                }
                Err(AssembleError::Provider(e)) => {
                    if transient_attempts >= settings.max_retries {
                        stats.failed += 1;
                        logs.push(format!(
                            "[FAIL] {ticker} {as_of}: {e} ({} retries exhausted)",
                            settings.max_retries
                        ));
                        progress.advance(layout, ticker.as_str(), stats)?;
                        continue 'dates;
                    }
                    sleeper.sleep(transient_backoff(settings, transient_attempts));
                    transient_attempts += 1;
                }
            }
        }
    }

    let upsert = upsert_history(&history_path, &pending, mode)?;
    if let Some(row) = &static_row {
        if !row.is_empty() {
            upsert_static(layout, std::slice::from_ref(row))?;
        }
    }
    if upsert.changed {
        stats.record_changed(ticker.as_str());
    }

    Ok(TickerOutcome {
        logs,
        changed: upsert.changed,
        stop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use featlab_core::assemble::{AssembledRow, ProviderError};
    use featlab_core::ValidationStatus;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    struct RecordingSleeper(Vec<Duration>);
    impl Sleeper for RecordingSleeper {
        fn sleep(&mut self, d: Duration) {
            self.0.push(d);
        }
    }

    /// Scripted assembler: pops one result per call.
    struct Scripted {
        script: VecDeque<Result<AssembledRow, AssembleError>>,
    }
    impl RowAssembler for Scripted {
        fn assemble(
            &mut self,
            ticker: &Ticker,
            as_of: NaiveDate,
        ) -> Result<AssembledRow, AssembleError> {
            self.script.pop_front().unwrap_or_else(|| {
                Err(AssembleError::InsufficientHistory {
                    ticker: ticker.clone(),
                    as_of,
                })
            })
        }
    }

    fn good_row(ticker: &str, as_of: NaiveDate) -> Result<AssembledRow, AssembleError> {
        let mut row = FeatureRow::new(Ticker::new(ticker), as_of);
        row.set("pe_ratio", 18.0);
        Ok(AssembledRow {
            dynamic: row,
            static_row: None,
            sector: None,
        })
    }

    fn settings() -> PacingSettings {
        PacingSettings {
            sleep_between_calls: 0.0,
            max_retries: 2,
            retry_base_sleep: 1.0,
            max_consecutive_rate_limits: 6,
        }
    }

    fn date(y: i32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, 12, 31).unwrap()
    }

    fn run(
        layout: &DataLayout,
        ticker: &Ticker,
        dates: &[NaiveDate],
        assembler: &mut Scripted,
        mode: OverwriteMode,
        stats: &mut RunStats,
        sleeper: &mut RecordingSleeper,
    ) -> TickerOutcome {
        let mut progress = ProgressTracker::new(layout, 1, dates.len());
        process_ticker(
            ticker,
            dates,
            assembler,
            layout,
            &settings(),
            mode,
            &ValidatorConfig::default(),
            &RunDeadline::unlimited(),
            stats,
            &mut progress,
            sleeper,
        )
        .unwrap()
    }

    #[test]
    fn rate_limits_retry_in_place_then_succeed() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_dirs().unwrap();

        let t = Ticker::new("AAA");
        let mut assembler = Scripted {
            script: VecDeque::from(vec![
                Err(ProviderError::RateLimited("429".into()).into()),
                Err(ProviderError::RateLimited("429".into()).into()),
                good_row("AAA", date(2022)),
            ]),
        };
        let mut stats = RunStats::default();
        let mut sleeper = RecordingSleeper(Vec::new());

        let out = run(
            &layout,
            &t,
            &[date(2022)],
            &mut assembler,
            OverwriteMode::Append,
            &mut stats,
            &mut sleeper,
        );

        assert!(out.stop.is_none());
        assert_eq!(stats.ok, 1);
        assert_eq!(stats.failed, 0);
        // Linear throttle pauses: 2s then 4s.
        assert_eq!(sleeper.0[0], Duration::from_secs(2));
        assert_eq!(sleeper.0[1], Duration::from_secs(4));
    }

    #[test]
    fn breaker_trip_aborts_ticker_and_flushes_pending() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_dirs().unwrap();

        let t = Ticker::new("AAA");
        let mut script: Vec<Result<AssembledRow, AssembleError>> =
            vec![good_row("AAA", date(2021))];
        for _ in 0..6 {
            script.push(Err(ProviderError::RateLimited("429".into()).into()));
        }
        let mut assembler = Scripted {
            script: script.into(),
        };
        let mut stats = RunStats::default();
        let mut sleeper = RecordingSleeper(Vec::new());

        let out = run(
            &layout,
            &t,
            &[date(2021), date(2022), date(2023)],
            &mut assembler,
            OverwriteMode::Append,
            &mut stats,
            &mut sleeper,
        );

        assert_eq!(out.stop, Some(StopReason::RateLimitStorm));
        assert!(!out.stop.unwrap().stops_run());
        // Informational stop, not a hard failure.
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.ok, 1);
        // The 2021 row made it to disk despite the storm.
        let rows = featlab_core::store::load_history_rows(&layout.history_path(&t)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].as_of, date(2021));
    }

    #[test]
    fn append_mode_skips_dates_already_on_disk() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_dirs().unwrap();

        let t = Ticker::new("AAA");
        // Seed the 2021 snapshot.
        let mut assembler = Scripted {
            script: VecDeque::from(vec![good_row("AAA", date(2021))]),
        };
        let mut stats = RunStats::default();
        let mut sleeper = RecordingSleeper(Vec::new());
        run(
            &layout,
            &t,
            &[date(2021)],
            &mut assembler,
            OverwriteMode::Append,
            &mut stats,
            &mut sleeper,
        );

        // Re-run over both years: only 2022 reaches the assembler.
        let mut assembler = Scripted {
            script: VecDeque::from(vec![good_row("AAA", date(2022))]),
        };
        let mut stats = RunStats::default();
        let out = run(
            &layout,
            &t,
            &[date(2021), date(2022)],
            &mut assembler,
            OverwriteMode::Append,
            &mut stats,
            &mut sleeper,
        );

        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.ok, 1);
        assert!(out.logs.iter().any(|l| l.contains("already present")));
        let rows = featlab_core::store::load_history_rows(&layout.history_path(&t)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].as_of, date(2021));
        assert_eq!(rows[1].as_of, date(2022));
    }

    #[test]
    fn transient_errors_exhaust_retry_budget_then_fail() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_dirs().unwrap();

        let t = Ticker::new("AAA");
        let mut assembler = Scripted {
            script: VecDeque::from(vec![
                Err(ProviderError::Server("502".into()).into()),
                Err(ProviderError::Server("502".into()).into()),
                Err(ProviderError::Server("502".into()).into()),
            ]),
        };
        let mut stats = RunStats::default();
        let mut sleeper = RecordingSleeper(Vec::new());

        let out = run(
            &layout,
            &t,
            &[date(2022)],
            &mut assembler,
            OverwriteMode::Append,
            &mut stats,
            &mut sleeper,
        );

        assert!(out.stop.is_none());
        assert_eq!(stats.failed, 1);
        assert!(out.logs.iter().any(|l| l.starts_with("[FAIL]")));
        // Exponential pauses: 1s then 2s.
        assert_eq!(sleeper.0[0], Duration::from_secs(1));
        assert_eq!(sleeper.0[1], Duration::from_secs(2));
    }

    #[test]
    fn fatal_provider_error_abandons_remaining_dates() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_dirs().unwrap();

        let t = Ticker::new("AAA");
        let mut assembler = Scripted {
            script: VecDeque::from(vec![Err(ProviderError::Auth("bad key".into()).into())]),
        };
        let mut stats = RunStats::default();
        let mut sleeper = RecordingSleeper(Vec::new());

        let out = run(
            &layout,
            &t,
            &[date(2021), date(2022)],
            &mut assembler,
            OverwriteMode::Append,
            &mut stats,
            &mut sleeper,
        );

        assert!(matches!(&out.stop, Some(StopReason::FatalProvider(_))));
        assert!(!out.stop.unwrap().stops_run());
        // A fatal provider error is a hard failure.
        assert_eq!(stats.failed, 1);
        assert!(stats.any_hard_failure());
    }

    #[test]
    fn prior_row_tie_prefers_the_current_runs_row() {
        let mut disk = FeatureRow::new(Ticker::new("AAA"), date(2021));
        disk.set("dividend_yield", 0.5);
        let mut fresh = FeatureRow::new(Ticker::new("AAA"), date(2021));
        fresh.set("dividend_yield", 0.01);

        let existing = vec![disk];
        let pending = vec![fresh];
        let prior = most_recent_prior(&existing, &pending, date(2022)).unwrap();
        assert_eq!(prior.get_f64("dividend_yield"), Some(0.01));

        // A strictly newer on-disk row still wins.
        let mut newer = FeatureRow::new(Ticker::new("AAA"), date(2023));
        newer.set("dividend_yield", 0.03);
        let existing = vec![newer];
        let prior = most_recent_prior(&existing, &pending, date(2024)).unwrap();
        assert_eq!(prior.get_f64("dividend_yield"), Some(0.03));
    }

    #[test]
    fn progress_tracks_every_snapshot_date() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_dirs().unwrap();

        let t = Ticker::new("AAA");
        let mut assembler = Scripted {
            script: VecDeque::from(vec![good_row("AAA", date(2021)), good_row("AAA", date(2022))]),
        };
        let mut stats = RunStats::default();
        let mut sleeper = RecordingSleeper(Vec::new());
        let mut progress = ProgressTracker::new(&layout, 1, 2);

        process_ticker(
            &t,
            &[date(2021), date(2022)],
            &mut assembler,
            &layout,
            &settings(),
            OverwriteMode::Append,
            &ValidatorConfig::default(),
            &RunDeadline::unlimited(),
            &mut stats,
            &mut progress,
            &mut sleeper,
        )
        .unwrap();

        let snap: crate::progress::ProgressSnapshot = serde_json::from_str(
            &std::fs::read_to_string(layout.progress_path()).unwrap(),
        )
        .unwrap();
        assert_eq!(snap.done, 2);
        assert_eq!(snap.total, 2);
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.failed, 0);
    }

    #[test]
    fn flagged_rows_are_persisted_with_audit_note() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_dirs().unwrap();

        let t = Ticker::new("AAA");
        let mut row = FeatureRow::new(t.clone(), date(2022));
        row.set("dividend_yield", 999.0);
        let mut assembler = Scripted {
            script: VecDeque::from(vec![Ok(AssembledRow {
                dynamic: row,
                static_row: None,
                sector: None,
            })]),
        };
        let mut stats = RunStats::default();
        let mut sleeper = RecordingSleeper(Vec::new());

        run(
            &layout,
            &t,
            &[date(2022)],
            &mut assembler,
            OverwriteMode::Append,
            &mut stats,
            &mut sleeper,
        );

        assert_eq!(stats.flagged, 1);
        let rows = featlab_core::store::load_history_rows(&layout.history_path(&t)).unwrap();
        assert_eq!(rows[0].status, Some(ValidationStatus::Flagged));
        assert!(layout.audit_path(&t, date(2022)).exists());
    }

    #[test]
    fn skip_mode_leaves_existing_file_untouched() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_dirs().unwrap();

        let t = Ticker::new("AAA");
        let mut assembler = Scripted {
            script: VecDeque::from(vec![good_row("AAA", date(2021))]),
        };
        let mut stats = RunStats::default();
        let mut sleeper = RecordingSleeper(Vec::new());
        run(
            &layout,
            &t,
            &[date(2021)],
            &mut assembler,
            OverwriteMode::Append,
            &mut stats,
            &mut sleeper,
        );

        // Second pass in skip mode does not even call the assembler.
        let mut assembler = Scripted {
            script: VecDeque::new(),
        };
        let mut stats = RunStats::default();
        let out = run(
            &layout,
            &t,
            &[date(2021), date(2022)],
            &mut assembler,
            OverwriteMode::Skip,
            &mut stats,
            &mut sleeper,
        );
        assert_eq!(stats.skipped, 1);
        assert!(!out.changed);
    }

    #[test]
    fn jump_check_sees_rows_pending_in_the_same_run() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_dirs().unwrap();

        let t = Ticker::new("AAA");
        let mut prev = FeatureRow::new(t.clone(), date(2021));
        prev.set("dividend_yield", 0.01);
        let mut cur = FeatureRow::new(t.clone(), date(2022));
        cur.set("dividend_yield", 0.2); // 20x jump, limit is 10x

        let mut assembler = Scripted {
            script: VecDeque::from(vec![
                Ok(AssembledRow {
                    dynamic: prev,
                    static_row: None,
                    sector: None,
                }),
                Ok(AssembledRow {
                    dynamic: cur,
                    static_row: None,
                    sector: None,
                }),
            ]),
        };
        let mut stats = RunStats::default();
        let mut sleeper = RecordingSleeper(Vec::new());

        run(
            &layout,
            &t,
            &[date(2021), date(2022)],
            &mut assembler,
            OverwriteMode::Append,
            &mut stats,
            &mut sleeper,
        );

        assert_eq!(stats.ok, 1);
        assert_eq!(stats.flagged, 1);
    }

    #[test]
    fn expired_deadline_stops_before_any_call() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_dirs().unwrap();

        let t = Ticker::new("AAA");
        let mut assembler = Scripted {
            script: VecDeque::from(vec![good_row("AAA", date(2021))]),
        };
        let mut stats = RunStats::default();
        let mut sleeper = RecordingSleeper(Vec::new());
        let deadline = RunDeadline::from_minutes(1e-9);
        std::thread::sleep(Duration::from_millis(1));
        let mut progress = ProgressTracker::new(&layout, 1, 1);

        let out = process_ticker(
            &t,
            &[date(2021)],
            &mut assembler,
            &layout,
            &settings(),
            OverwriteMode::Append,
            &ValidatorConfig::default(),
            &deadline,
            &mut stats,
            &mut progress,
            &mut sleeper,
        )
        .unwrap();

        assert_eq!(out.stop, Some(StopReason::Deadline));
        assert!(out.stop.unwrap().stops_run());
        assert_eq!(stats.ok, 0);
        assert!(!layout.history_path(&t).exists());
    }
}
