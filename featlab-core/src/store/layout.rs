//! Directory layout of a feature data root.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::domain::Ticker;

use super::StoreError;

/// File name of the cross-ticker combined table inside `tickers_history/`.
pub const COMBINED_FILE: &str = "features_all.parquet";

/// Paths under one data root. Creating the layout does not touch disk;
/// call [`DataLayout::ensure_dirs`] before writing.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join("tickers_history")
    }

    pub fn static_dir(&self) -> PathBuf {
        self.root.join("tickers_static")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("_audit")
    }

    pub fn status_dir(&self) -> PathBuf {
        self.root.join("status")
    }

    pub fn history_path(&self, ticker: &Ticker) -> PathBuf {
        self.history_dir().join(format!("{ticker}.parquet"))
    }

    pub fn combined_path(&self) -> PathBuf {
        self.history_dir().join(COMBINED_FILE)
    }

    pub fn static_info_path(&self) -> PathBuf {
        self.static_dir().join("static_info.parquet")
    }

    pub fn static_onehot_path(&self) -> PathBuf {
        self.static_dir().join("static_onehot.parquet")
    }

    pub fn audit_path(&self, ticker: &Ticker, as_of: NaiveDate) -> PathBuf {
        self.audit_dir().join(format!("{ticker}_{as_of}.txt"))
    }

    pub fn progress_path(&self) -> PathBuf {
        self.status_dir().join("progress.json")
    }

    pub fn last_run_path(&self) -> PathBuf {
        self.status_dir().join("last_run.json")
    }

    /// Create every directory of the layout.
    pub fn ensure_dirs(&self) -> Result<(), StoreError> {
        for dir in [
            self.history_dir(),
            self.static_dir(),
            self.audit_dir(),
            self.status_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Per-ticker history files, excluding the combined table. Sorted by
    /// file name so merge order is deterministic.
    pub fn list_history_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.history_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some(COMBINED_FILE) {
                continue;
            }
            files.push(path);
        }
        files.sort();
        Ok(files)
    }

    /// Write a plain-text audit note for one flagged snapshot.
    pub fn write_audit_note(
        &self,
        ticker: &Ticker,
        as_of: NaiveDate,
        lines: &[String],
    ) -> Result<(), StoreError> {
        let body = lines.join("\n") + "\n";
        fs::write(self.audit_path(ticker, as_of), body)?;
        Ok(())
    }
}
