//! Run counters and outcome tags.

use serde::{Deserialize, Serialize};

/// Per-run counters, one increment per (ticker, snapshot date) except
/// `changed_tickers`, which tracks tickers whose file content changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStats {
    pub ok: u64,
    pub skipped: u64,
    pub flagged: u64,
    pub failed: u64,
    pub changed_tickers: Vec<String>,
}

impl RunStats {
    /// Snapshots persisted this run (clean plus flagged).
    pub fn persisted(&self) -> u64 {
        self.ok + self.flagged
    }

    /// True when at least one snapshot hard-failed. Informational stops
    /// (deadline, rate-limit storm) never count here.
    pub fn any_hard_failure(&self) -> bool {
        self.failed > 0
    }

    pub fn record_changed(&mut self, ticker: &str) {
        if !self.changed_tickers.iter().any(|t| t == ticker) {
            self.changed_tickers.push(ticker.to_string());
        }
    }

    pub fn summary_line(&self) -> String {
        format!(
            "ok={} skipped={} flagged={} failed={} changed={}",
            self.ok,
            self.skipped,
            self.flagged,
            self.failed,
            self.changed_tickers.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_tickers_dedup() {
        let mut s = RunStats::default();
        s.record_changed("AAA");
        s.record_changed("BBB");
        s.record_changed("AAA");
        assert_eq!(s.changed_tickers, vec!["AAA", "BBB"]);
    }

    #[test]
    fn hard_failure_only_counts_failed() {
        let mut s = RunStats::default();
        s.skipped = 5;
        s.flagged = 2;
        assert!(!s.any_hard_failure());
        s.failed = 1;
        assert!(s.any_hard_failure());
    }
}
