//! Dtype promotion for schema reconciliation.
//!
//! Every merge path (history upsert, static upsert, cross-ticker combine)
//! has to agree on a column type when two tables disagree. This is a
//! single total function over the types featlab actually persists
//! (null, boolean, integers, floats, strings) rather than ad hoc
//! branching at each call site.
//!
//! Lattice rules:
//! - equal types promote to themselves; Null is the identity
//! - String absorbs everything
//! - numeric × numeric promotes to the wider numeric; unsigned integers
//!   are first widened to the next signed type that can hold them
//! - mixing a 64-bit integer with a float forces Float64
//! - Boolean × numeric promotes to the numeric (booleans read as 0/1)
//! - anything else (temporal types meeting a mismatched type) falls back
//!   to String, keeping the function total

use polars::prelude::DataType;

/// True for the integer and float dtypes featlab treats as numeric.
pub fn is_numeric(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Widen unsigned integers to the next signed type that holds their range.
/// UInt64 has no signed container, so it becomes Float64.
fn widen_unsigned(dt: &DataType) -> DataType {
    match dt {
        DataType::UInt8 => DataType::Int16,
        DataType::UInt16 => DataType::Int32,
        DataType::UInt32 => DataType::Int64,
        DataType::UInt64 => DataType::Float64,
        other => other.clone(),
    }
}

/// Rank of a (signed-or-float) numeric type in the promotion lattice.
fn rank(dt: &DataType) -> u8 {
    match dt {
        DataType::Int8 => 0,
        DataType::Int16 => 1,
        DataType::Int32 => 2,
        DataType::Int64 => 3,
        DataType::Float32 => 4,
        DataType::Float64 => 5,
        _ => u8::MAX,
    }
}

/// Total promotion function: the common type two columns merge into.
///
/// Commutative and idempotent; Null is the identity element.
pub fn promote(a: &DataType, b: &DataType) -> DataType {
    if a == b {
        return a.clone();
    }
    if matches!(a, DataType::Null) {
        return b.clone();
    }
    if matches!(b, DataType::Null) {
        return a.clone();
    }
    if matches!(a, DataType::String) || matches!(b, DataType::String) {
        return DataType::String;
    }

    match (is_numeric(a), is_numeric(b)) {
        (true, true) => {
            let wa = widen_unsigned(a);
            let wb = widen_unsigned(b);
            // Int64 cannot be represented exactly in Float32; force Float64.
            let int64_float_mix = (wa == DataType::Int64 && wb.is_float())
                || (wb == DataType::Int64 && wa.is_float());
            if int64_float_mix {
                return DataType::Float64;
            }
            if rank(&wa) >= rank(&wb) {
                wa
            } else {
                wb
            }
        }
        (true, false) if matches!(b, DataType::Boolean) => widen_unsigned(a),
        (false, true) if matches!(a, DataType::Boolean) => widen_unsigned(b),
        _ => DataType::String,
    }
}
