//! Static per-ticker table plus its one-hot projection.
//!
//! `static_info.parquet` holds one row per ticker with labels and
//! indicator columns. `static_onehot.parquet` is derived from it on
//! every upsert: ticker plus the indicator columns only, with absent
//! indicators filled as 0 and stored as Int8. A ticker that never saw a
//! given sector simply gets 0 in that sector's column.

use polars::prelude::*;

use crate::domain::{StaticRow, COL_TICKER, ONE_HOT_PREFIXES};
use crate::frame::{fill_missing_columns, ordered_union, reconcile_dtypes, static_rows_to_frame};

use super::layout::DataLayout;
use super::parquet::{read_parquet_if_exists, write_parquet_atomic};
use super::StoreError;

fn frame_err(e: PolarsError) -> StoreError {
    StoreError::Frame(e.to_string())
}

fn is_one_hot(name: &str) -> bool {
    ONE_HOT_PREFIXES.iter().any(|p| name.starts_with(p))
}

fn dedup_sort_by_ticker(df: DataFrame) -> Result<DataFrame, StoreError> {
    df.lazy()
        .unique_stable(
            Some(vec![COL_TICKER.into()]),
            UniqueKeepStrategy::Last,
        )
        .sort(
            [COL_TICKER],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()
        .map_err(frame_err)
}

/// Derive the one-hot projection: ticker plus indicator columns, with
/// nulls (tickers that predate a column) filled as 0.
fn one_hot_projection(df: &DataFrame) -> Result<DataFrame, StoreError> {
    let mut columns = vec![df.column(COL_TICKER).map_err(frame_err)?.clone()];
    for col in df.get_columns() {
        if !is_one_hot(col.name().as_str()) {
            continue;
        }
        let wide = col.cast(&DataType::Int64).map_err(frame_err)?;
        let ca = wide.i64().map_err(frame_err)?;
        let filled: Vec<i8> = ca
            .into_iter()
            .map(|opt| opt.map_or(0, |v| if v != 0 { 1 } else { 0 }))
            .collect();
        columns.push(
            Column::new(col.name().clone(), filled)
                .cast(&DataType::Int8)
                .map_err(frame_err)?,
        );
    }
    DataFrame::new(columns).map_err(frame_err)
}

/// Upsert static rows: merge with the table on disk (one row per ticker,
/// incoming rows win), then rewrite the one-hot projection.
pub fn upsert_static(layout: &DataLayout, rows: &[StaticRow]) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }

    let incoming = static_rows_to_frame(rows).map_err(frame_err)?;
    let merged = match read_parquet_if_exists(&layout.static_info_path())? {
        None => dedup_sort_by_ticker(incoming)?,
        Some(old) => {
            let all = ordered_union(&[&old, &incoming]);
            let old = fill_missing_columns(&old, &all).map_err(frame_err)?;
            let new = fill_missing_columns(&incoming, &all).map_err(frame_err)?;
            let (mut old, new) = reconcile_dtypes(old, new).map_err(frame_err)?;
            old.vstack_mut(&new).map_err(frame_err)?;
            dedup_sort_by_ticker(old)?
        }
    };

    write_parquet_atomic(&merged, &layout.static_info_path())?;
    write_parquet_atomic(&one_hot_projection(&merged)?, &layout.static_onehot_path())?;
    Ok(())
}
