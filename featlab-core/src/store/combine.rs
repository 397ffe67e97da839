//! Cross-ticker combined table.
//!
//! Stacks every per-ticker history file into `features_all.parquet` with
//! the superset of all columns, sorted by (ticker, as_of). The combined
//! file is skipped when it is already newer than every source file, so
//! repeated runs that change nothing do not rewrite it.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use polars::prelude::*;

use crate::domain::{COL_AS_OF, COL_TICKER};
use crate::frame::{ensure_validation_columns, fill_missing_columns, ordered_union, reconcile_dtypes};
use crate::schema::is_numeric;

use super::layout::DataLayout;
use super::parquet::{read_parquet_if_exists, write_parquet_atomic};
use super::StoreError;

/// What the merge did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Combined table rewritten from `tickers` source files.
    Merged { tickers: usize, rows: usize },
    /// Combined table is newer than every source; nothing rewritten.
    SkippedFresh,
    /// No per-ticker history files exist yet.
    NoSources,
}

fn frame_err(e: PolarsError) -> StoreError {
    StoreError::Frame(e.to_string())
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// True when the combined file exists and is at least as new as every
/// source file.
fn combined_is_fresh(combined: &Path, sources: &[std::path::PathBuf]) -> bool {
    let Some(combined_at) = mtime(combined) else {
        return false;
    };
    sources
        .iter()
        .all(|src| mtime(src).is_some_and(|at| at <= combined_at))
}

/// Widen integer feature columns so a table mixing per-ticker integer
/// and float schemas stays numeric instead of falling back to text.
fn widen_integers(df: DataFrame) -> Result<DataFrame, StoreError> {
    let mut out = df;
    let names: Vec<String> = out
        .get_columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    for name in names {
        let dt = out.column(&name).map_err(frame_err)?.dtype().clone();
        if is_numeric(&dt) && !dt.is_float() {
            let cast = out
                .column(&name)
                .map_err(frame_err)?
                .cast(&DataType::Float64)
                .map_err(frame_err)?;
            out.with_column(cast).map_err(frame_err)?;
        }
    }
    Ok(out)
}

/// Rebuild `features_all.parquet` from the per-ticker files.
///
/// With `force` false the rebuild is skipped when the combined file is
/// already newer than every source.
pub fn merge_all_tickers(layout: &DataLayout, force: bool) -> Result<MergeOutcome, StoreError> {
    let sources = layout.list_history_files()?;
    if sources.is_empty() {
        return Ok(MergeOutcome::NoSources);
    }

    let combined_path = layout.combined_path();
    if !force && combined_is_fresh(&combined_path, &sources) {
        return Ok(MergeOutcome::SkippedFresh);
    }

    let mut frames = Vec::with_capacity(sources.len());
    for src in &sources {
        let df = read_parquet_if_exists(src)?.ok_or_else(|| {
            StoreError::Parquet(format!("source vanished during merge: {}", src.display()))
        })?;
        frames.push(ensure_validation_columns(&df).map_err(frame_err)?);
    }

    let refs: Vec<&DataFrame> = frames.iter().collect();
    let all = ordered_union(&refs);

    let mut merged: Option<DataFrame> = None;
    for df in frames {
        let df = fill_missing_columns(&df, &all).map_err(frame_err)?;
        let df = widen_integers(df)?;
        merged = Some(match merged {
            None => df,
            Some(acc) => {
                let (mut acc, df) = reconcile_dtypes(acc, df).map_err(frame_err)?;
                acc.vstack_mut(&df).map_err(frame_err)?;
                acc
            }
        });
    }
    // sources is non-empty, so merged is always Some here
    let merged = merged.ok_or_else(|| StoreError::Frame("no frames to merge".into()))?;

    let merged = merged
        .lazy()
        .sort(
            [COL_TICKER, COL_AS_OF],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()
        .map_err(frame_err)?;

    write_parquet_atomic(&merged, &combined_path)?;
    Ok(MergeOutcome::Merged {
        tickers: sources.len(),
        rows: merged.height(),
    })
}
