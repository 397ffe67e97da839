//! Row ⇄ DataFrame bridge and frame-level reconciliation helpers.
//!
//! Feature rows live as typed maps while they move through the state
//! machine and the validator; they only become Polars frames at the
//! persistence boundary. Everything here preserves row counts: missing
//! columns are added as all-null, never by dropping rows.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use polars::prelude::*;

use crate::domain::{
    FeatureRow, StaticRow, Ticker, ValidationStatus, Value, COL_AS_OF, COL_STATUS, COL_TICKER,
    COL_VIOLATIONS,
};
use crate::schema::{is_numeric, promote};

/// History tables round numeric features to this many decimals before
/// persisting. Matches the compact storage the table consumers expect.
pub const ROUND_DECIMALS: i32 = 2;

/// Numeric storage type for history tables.
pub const HISTORY_NUMERIC_DTYPE: DataType = DataType::Float32;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
}

fn date_to_days(d: NaiveDate) -> i32 {
    (d - epoch()).num_days() as i32
}

fn days_to_date(days: i32) -> NaiveDate {
    epoch() + chrono::Duration::days(days as i64)
}

/// The narrowest dtype that can hold a single value.
fn value_dtype(v: &Value) -> DataType {
    match v {
        Value::Null => DataType::Null,
        Value::Float(_) => DataType::Float64,
        Value::Int(_) => DataType::Int64,
        Value::Bool(_) => DataType::Boolean,
        Value::Text(_) => DataType::String,
    }
}

fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Float(x) => Some(*x),
        Value::Int(x) => Some(*x as f64),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn value_to_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Int(x) => Some(*x),
        Value::Bool(b) => Some(if *b { 1 } else { 0 }),
        _ => None,
    }
}

fn value_to_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::Text(s) => Some(s.clone()),
        Value::Float(x) => Some(x.to_string()),
        Value::Int(x) => Some(x.to_string()),
        Value::Bool(b) => Some(b.to_string()),
    }
}

/// Build one column from per-row values, promoting to a common dtype.
fn values_to_column(name: &str, values: &[&Value]) -> PolarsResult<Column> {
    let target = values
        .iter()
        .fold(DataType::Null, |acc, v| promote(&acc, &value_dtype(v)));

    let col = match target {
        DataType::Null => Column::full_null(name.into(), values.len(), &DataType::Null),
        DataType::Boolean => {
            let vals: Vec<Option<bool>> = values
                .iter()
                .map(|v| match v {
                    Value::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect();
            Column::new(name.into(), vals)
        }
        DataType::Int64 => {
            let vals: Vec<Option<i64>> = values.iter().map(|v| value_to_i64(v)).collect();
            Column::new(name.into(), vals)
        }
        DataType::Float64 => {
            let vals: Vec<Option<f64>> = values.iter().map(|v| value_to_f64(v)).collect();
            Column::new(name.into(), vals)
        }
        _ => {
            let vals: Vec<Option<String>> = values.iter().map(|v| value_to_text(v)).collect();
            Column::new(name.into(), vals)
        }
    };
    Ok(col)
}

/// Convert a batch of dynamic rows into a frame:
/// `ticker`, `as_of`, sorted feature columns, then validation columns.
pub fn rows_to_frame(rows: &[FeatureRow]) -> PolarsResult<DataFrame> {
    if rows.is_empty() {
        return Err(PolarsError::ComputeError("no rows to convert".into()));
    }

    let feature_names: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.values.keys().map(String::as_str))
        .collect();

    let tickers: Vec<String> = rows.iter().map(|r| r.ticker.as_str().to_string()).collect();
    let as_of_days: Vec<i32> = rows.iter().map(|r| date_to_days(r.as_of)).collect();
    let statuses: Vec<String> = rows
        .iter()
        .map(|r| r.status.map(|s| s.as_str().to_string()).unwrap_or_default())
        .collect();
    let violations: Vec<String> = rows.iter().map(|r| r.violations_joined()).collect();

    let mut columns = vec![
        Column::new(COL_TICKER.into(), tickers),
        Column::new(COL_AS_OF.into(), as_of_days).cast(&DataType::Date)?,
    ];

    for name in feature_names {
        let vals: Vec<&Value> = rows
            .iter()
            .map(|r| r.values.get(name).unwrap_or(&Value::Null))
            .collect();
        columns.push(values_to_column(name, &vals)?);
    }

    columns.push(Column::new(COL_STATUS.into(), statuses));
    columns.push(Column::new(COL_VIOLATIONS.into(), violations));

    DataFrame::new(columns)
}

/// Convert static rows into a frame: `ticker` plus sorted attribute columns.
pub fn static_rows_to_frame(rows: &[StaticRow]) -> PolarsResult<DataFrame> {
    if rows.is_empty() {
        return Err(PolarsError::ComputeError("no static rows to convert".into()));
    }

    let names: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.values.keys().map(String::as_str))
        .collect();

    let tickers: Vec<String> = rows.iter().map(|r| r.ticker.as_str().to_string()).collect();
    let mut columns = vec![Column::new(COL_TICKER.into(), tickers)];

    for name in names {
        let vals: Vec<&Value> = rows
            .iter()
            .map(|r| r.values.get(name).unwrap_or(&Value::Null))
            .collect();
        columns.push(values_to_column(name, &vals)?);
    }

    DataFrame::new(columns)
}

fn anyvalue_to_value(av: &AnyValue) -> Value {
    match av {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(*b),
        AnyValue::String(s) => Value::Text((*s).to_string()),
        AnyValue::StringOwned(s) => Value::Text(s.to_string()),
        AnyValue::Int8(v) => Value::Int(*v as i64),
        AnyValue::Int16(v) => Value::Int(*v as i64),
        AnyValue::Int32(v) => Value::Int(*v as i64),
        AnyValue::Int64(v) => Value::Int(*v),
        AnyValue::UInt8(v) => Value::Int(*v as i64),
        AnyValue::UInt16(v) => Value::Int(*v as i64),
        AnyValue::UInt32(v) => Value::Int(*v as i64),
        AnyValue::UInt64(v) => Value::Int(*v as i64),
        AnyValue::Float32(v) => Value::Float(*v as f64),
        AnyValue::Float64(v) => Value::Float(*v),
        _ => Value::Null,
    }
}

/// Read dynamic rows back from a history frame. Tolerates legacy tables
/// without validation columns (status comes back as None).
pub fn rows_from_frame(df: &DataFrame) -> PolarsResult<Vec<FeatureRow>> {
    let names: Vec<String> = df
        .get_columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    if !names.iter().any(|n| n == COL_TICKER) || !names.iter().any(|n| n == COL_AS_OF) {
        return Err(PolarsError::ComputeError(
            format!("history frame missing '{COL_TICKER}'/'{COL_AS_OF}' columns").into(),
        ));
    }

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let record = df
            .get(i)
            .ok_or_else(|| PolarsError::ComputeError(format!("row {i} out of range").into()))?;

        let mut ticker: Option<Ticker> = None;
        let mut as_of: Option<NaiveDate> = None;
        let mut status: Option<ValidationStatus> = None;
        let mut violations: Vec<String> = Vec::new();
        let mut values = std::collections::BTreeMap::new();

        for (name, av) in names.iter().zip(record.iter()) {
            match name.as_str() {
                COL_TICKER => {
                    if let Value::Text(s) = anyvalue_to_value(av) {
                        ticker = Some(Ticker::new(&s));
                    }
                }
                COL_AS_OF => {
                    if let AnyValue::Date(days) = av {
                        as_of = Some(days_to_date(*days));
                    }
                }
                COL_STATUS => {
                    if let Value::Text(s) = anyvalue_to_value(av) {
                        status = ValidationStatus::parse(&s);
                    }
                }
                COL_VIOLATIONS => {
                    if let Value::Text(s) = anyvalue_to_value(av) {
                        violations = s
                            .split(';')
                            .filter(|p| !p.is_empty())
                            .map(str::to_string)
                            .collect();
                    }
                }
                _ => {
                    values.insert(name.clone(), anyvalue_to_value(av));
                }
            }
        }

        let (ticker, as_of) = match (ticker, as_of) {
            (Some(t), Some(d)) => (t, d),
            _ => {
                return Err(PolarsError::ComputeError(
                    format!("row {i} has null ticker or as_of").into(),
                ))
            }
        };
        rows.push(FeatureRow {
            ticker,
            as_of,
            values,
            status,
            violations,
        });
    }
    Ok(rows)
}

/// Ordered union of column names across frames: identifier columns first,
/// validation columns last, the rest sorted.
pub fn ordered_union(frames: &[&DataFrame]) -> Vec<String> {
    let mut all: BTreeSet<String> = BTreeSet::new();
    for df in frames {
        for c in df.get_columns() {
            all.insert(c.name().to_string());
        }
    }

    let mut out = Vec::with_capacity(all.len());
    for fixed in [COL_TICKER, COL_AS_OF] {
        if all.remove(fixed) {
            out.push(fixed.to_string());
        }
    }
    let has_status = all.remove(COL_STATUS);
    let has_violations = all.remove(COL_VIOLATIONS);
    out.extend(all);
    if has_status {
        out.push(COL_STATUS.to_string());
    }
    if has_violations {
        out.push(COL_VIOLATIONS.to_string());
    }
    out
}

/// Add any missing columns as all-null (same height) and reorder to `all`.
pub fn fill_missing_columns(df: &DataFrame, all: &[String]) -> PolarsResult<DataFrame> {
    let mut out = df.clone();
    let present: BTreeSet<String> = df
        .get_columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    for name in all {
        if !present.contains(name) {
            out.with_column(Column::full_null(
                name.as_str().into(),
                df.height(),
                &DataType::Null,
            ))?;
        }
    }
    out.select(all.iter().map(String::as_str))
}

/// Cast every column the two frames disagree on to the promoted dtype.
/// Both frames must already share the same column set.
pub fn reconcile_dtypes(
    mut a: DataFrame,
    mut b: DataFrame,
) -> PolarsResult<(DataFrame, DataFrame)> {
    let names: Vec<String> = a
        .get_columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    for name in &names {
        let da = a.column(name)?.dtype().clone();
        let db = b.column(name)?.dtype().clone();
        if da == db {
            continue;
        }
        let target = promote(&da, &db);
        if da != target {
            let cast = a.column(name)?.cast(&target)?;
            a.with_column(cast)?;
        }
        if db != target {
            let cast = b.column(name)?.cast(&target)?;
            b.with_column(cast)?;
        }
    }
    Ok((a, b))
}

/// Round numeric columns to [`ROUND_DECIMALS`] and cast them to the
/// compact history storage type. Dates, booleans and text pass through.
pub fn normalize_numeric(df: &DataFrame) -> PolarsResult<DataFrame> {
    let factor = 10f64.powi(ROUND_DECIMALS);
    let mut columns = Vec::with_capacity(df.width());
    for col in df.get_columns() {
        if is_numeric(col.dtype()) {
            let wide = col.cast(&DataType::Float64)?;
            let ca = wide.f64()?;
            let rounded: Vec<Option<f64>> = ca
                .into_iter()
                .map(|opt| opt.map(|v| (v * factor).round() / factor))
                .collect();
            columns.push(
                Column::new(col.name().clone(), rounded).cast(&HISTORY_NUMERIC_DTYPE)?,
            );
        } else {
            columns.push(col.clone());
        }
    }
    DataFrame::new(columns)
}

/// Guarantee `validation_status`/`violations` exist as non-null strings,
/// even for legacy tables written before these columns existed.
pub fn ensure_validation_columns(df: &DataFrame) -> PolarsResult<DataFrame> {
    let mut out = df.clone();
    for name in [COL_STATUS, COL_VIOLATIONS] {
        let filled: Vec<String> = match out.column(name) {
            Ok(col) => {
                let strs = col.cast(&DataType::String)?;
                let ca = strs.str()?;
                ca.into_iter()
                    .map(|opt| opt.unwrap_or_default().to_string())
                    .collect()
            }
            Err(_) => vec![String::new(); out.height()],
        };
        out.with_column(Column::new(name.into(), filled))?;
    }
    Ok(out)
}
