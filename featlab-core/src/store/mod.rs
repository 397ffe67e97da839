//! Parquet persistence layer.
//!
//! Layout under the data root:
//! - `tickers_history/{TICKER}.parquet` and `tickers_history/features_all.parquet`
//! - `tickers_static/static_info.parquet` and `tickers_static/static_onehot.parquet`
//! - `_audit/{TICKER}_{as_of}.txt`
//! - `status/progress.json` and `status/last_run.json`
//!
//! All parquet writes are atomic (write to .tmp, rename into place) and
//! idempotent: re-running over existing data never duplicates rows and
//! skips rewriting files whose content would not change.

mod combine;
mod history;
mod layout;
mod parquet;
mod static_info;

pub use combine::{merge_all_tickers, MergeOutcome};
pub use history::{load_history, load_history_rows, upsert_history, UpsertOutcome};
pub use layout::DataLayout;
pub use parquet::{read_parquet_if_exists, write_parquet_atomic};
pub use static_info::upsert_static;

use thiserror::Error;

/// How an upsert treats snapshot dates already present on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteMode {
    /// Merge: new rows win on conflicting dates, other rows are kept.
    Append,
    /// Replace the ticker's file with only the new rows.
    Overwrite,
    /// Leave tickers that already have a history file untouched.
    Skip,
}

impl OverwriteMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "append" => Some(OverwriteMode::Append),
            "overwrite" => Some(OverwriteMode::Overwrite),
            "skip" => Some(OverwriteMode::Skip),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverwriteMode::Append => "append",
            OverwriteMode::Overwrite => "overwrite",
            OverwriteMode::Skip => "skip",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("frame error: {0}")]
    Frame(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
