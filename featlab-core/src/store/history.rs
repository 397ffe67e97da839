//! Per-ticker history table: one row per snapshot date.
//!
//! Upserts reconcile schemas between the file on disk and the incoming
//! batch (column union, dtype promotion), dedupe by snapshot date with
//! the incoming rows winning, and sort by date ascending. A file whose
//! merged content equals what is already on disk is not rewritten, so
//! file modification times keep meaning "content last changed here".

use std::path::Path;

use polars::prelude::*;

use crate::domain::{FeatureRow, COL_AS_OF};
use crate::frame::{
    ensure_validation_columns, fill_missing_columns, normalize_numeric, ordered_union,
    reconcile_dtypes, rows_from_frame, rows_to_frame,
};

use super::parquet::{read_parquet_if_exists, write_parquet_atomic};
use super::{OverwriteMode, StoreError};

/// Result of one history upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// True when the file content changed (including first creation).
    pub changed: bool,
    /// Row count of the table after the upsert.
    pub rows: usize,
}

fn frame_err(e: PolarsError) -> StoreError {
    StoreError::Frame(e.to_string())
}

/// Read a ticker's history table, if present.
pub fn load_history(path: &Path) -> Result<Option<DataFrame>, StoreError> {
    read_parquet_if_exists(path)
}

/// Read a ticker's history back as typed rows, oldest first.
pub fn load_history_rows(path: &Path) -> Result<Vec<FeatureRow>, StoreError> {
    match read_parquet_if_exists(path)? {
        None => Ok(Vec::new()),
        Some(df) => {
            let mut rows = rows_from_frame(&df).map_err(frame_err)?;
            rows.sort_by_key(|r| r.as_of);
            Ok(rows)
        }
    }
}

fn dedup_sort_by_date(df: DataFrame) -> Result<DataFrame, StoreError> {
    df.lazy()
        .unique_stable(
            Some(vec![COL_AS_OF.into()]),
            UniqueKeepStrategy::Last,
        )
        .sort(
            [COL_AS_OF],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()
        .map_err(frame_err)
}

/// Upsert a batch of rows into one ticker's history file.
///
/// Incoming numeric features are rounded and narrowed to the history
/// storage type before merging, so idempotent re-runs compare equal.
/// `Skip` mode must be resolved by the caller before any rows are
/// assembled; reaching here with it is a logic error and merges anyway.
pub fn upsert_history(
    path: &Path,
    rows: &[FeatureRow],
    mode: OverwriteMode,
) -> Result<UpsertOutcome, StoreError> {
    if rows.is_empty() {
        let existing = read_parquet_if_exists(path)?;
        return Ok(UpsertOutcome {
            changed: false,
            rows: existing.map_or(0, |df| df.height()),
        });
    }

    let incoming = rows_to_frame(rows).map_err(frame_err)?;
    let incoming = normalize_numeric(&incoming).map_err(frame_err)?;

    let existing = match mode {
        OverwriteMode::Overwrite => None,
        _ => read_parquet_if_exists(path)?,
    };

    let merged = match &existing {
        None => dedup_sort_by_date(incoming)?,
        Some(old) => {
            let old = ensure_validation_columns(old).map_err(frame_err)?;
            let all = ordered_union(&[&old, &incoming]);
            let old = fill_missing_columns(&old, &all).map_err(frame_err)?;
            let new = fill_missing_columns(&incoming, &all).map_err(frame_err)?;
            let (mut old, new) = reconcile_dtypes(old, new).map_err(frame_err)?;
            // Incoming rows stacked last so keep-last dedup prefers them.
            old.vstack_mut(&new).map_err(frame_err)?;
            dedup_sort_by_date(old)?
        }
    };

    let changed = match read_parquet_if_exists(path)? {
        None => true,
        Some(on_disk) => {
            on_disk.shape() != merged.shape() || !on_disk.equals_missing(&merged)
        }
    };

    if changed {
        write_parquet_atomic(&merged, path)?;
    }
    Ok(UpsertOutcome {
        changed,
        rows: merged.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Ticker, ValidationStatus};
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn date(y: i32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, 12, 31).unwrap()
    }

    fn row(y: i32, feature: &str, v: f64) -> FeatureRow {
        let mut r = FeatureRow::new(Ticker::new("AAA"), date(y));
        r.set(feature, v);
        r.stamp(ValidationStatus::Ok, vec![]);
        r
    }

    fn path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("AAA.parquet")
    }

    #[test]
    fn first_upsert_creates_sorted_table() {
        let dir = tempdir().unwrap();
        let p = path(&dir);
        let out = upsert_history(
            &p,
            &[row(2022, "pe_ratio", 18.0), row(2021, "pe_ratio", 15.0)],
            OverwriteMode::Append,
        )
        .unwrap();
        assert!(out.changed);
        assert_eq!(out.rows, 2);

        let back = load_history_rows(&p).unwrap();
        assert_eq!(back[0].as_of, date(2021));
        assert_eq!(back[1].as_of, date(2022));
    }

    #[test]
    fn reupsert_of_identical_rows_is_unchanged() {
        let dir = tempdir().unwrap();
        let p = path(&dir);
        let rows = vec![row(2021, "pe_ratio", 15.12), row(2022, "pe_ratio", 18.0)];
        let first = upsert_history(&p, &rows, OverwriteMode::Append).unwrap();
        assert!(first.changed);

        let second = upsert_history(&p, &rows, OverwriteMode::Append).unwrap();
        assert!(!second.changed);
        assert_eq!(second.rows, 2);
    }

    #[test]
    fn conflicting_date_prefers_incoming_row() {
        let dir = tempdir().unwrap();
        let p = path(&dir);
        upsert_history(&p, &[row(2021, "pe_ratio", 15.0)], OverwriteMode::Append).unwrap();
        upsert_history(&p, &[row(2021, "pe_ratio", 16.0)], OverwriteMode::Append).unwrap();

        let back = load_history_rows(&p).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].get_f64("pe_ratio"), Some(16.0));
    }

    #[test]
    fn schema_union_fills_missing_with_null() {
        let dir = tempdir().unwrap();
        let p = path(&dir);
        let mut a = FeatureRow::new(Ticker::new("AAA"), date(2021));
        a.set("alpha", 1.0).set("beta", 2.0);
        a.stamp(ValidationStatus::Ok, vec![]);
        let mut b = FeatureRow::new(Ticker::new("AAA"), date(2022));
        b.set("beta", 3.0).set("gamma", 4.0);
        b.stamp(ValidationStatus::Ok, vec![]);

        upsert_history(&p, &[a], OverwriteMode::Append).unwrap();
        upsert_history(&p, &[b], OverwriteMode::Append).unwrap();

        let back = load_history_rows(&p).unwrap();
        assert_eq!(back.len(), 2);
        assert!(back[0].get("gamma").unwrap().is_null());
        assert!(back[1].get("alpha").unwrap().is_null());
        assert_eq!(back[1].get_f64("beta"), Some(3.0));
    }

    #[test]
    fn overwrite_replaces_whole_file() {
        let dir = tempdir().unwrap();
        let p = path(&dir);
        upsert_history(
            &p,
            &[row(2020, "pe_ratio", 10.0), row(2021, "pe_ratio", 11.0)],
            OverwriteMode::Append,
        )
        .unwrap();
        let out =
            upsert_history(&p, &[row(2022, "pe_ratio", 12.0)], OverwriteMode::Overwrite).unwrap();
        assert!(out.changed);
        assert_eq!(out.rows, 1);
    }

    #[test]
    fn numeric_features_are_rounded_to_storage_precision() {
        let dir = tempdir().unwrap();
        let p = path(&dir);
        upsert_history(&p, &[row(2022, "pe_ratio", 18.5678)], OverwriteMode::Append).unwrap();
        let back = load_history_rows(&p).unwrap();
        let v = back[0].get_f64("pe_ratio").unwrap();
        assert!((v - 18.57).abs() < 1e-3);
    }

    #[test]
    fn empty_batch_reports_existing_size() {
        let dir = tempdir().unwrap();
        let p = path(&dir);
        upsert_history(&p, &[row(2022, "pe_ratio", 18.0)], OverwriteMode::Append).unwrap();
        let out = upsert_history(&p, &[], OverwriteMode::Append).unwrap();
        assert!(!out.changed);
        assert_eq!(out.rows, 1);
    }
}
