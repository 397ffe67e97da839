//! Core domain types: tickers, column values, dynamic and static feature rows.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Column name of the ticker identifier in persisted tables.
pub const COL_TICKER: &str = "ticker";
/// Column name of the snapshot date in history tables.
pub const COL_AS_OF: &str = "as_of";
/// Column carrying the validation status (`ok` / `flagged`, empty for legacy rows).
pub const COL_STATUS: &str = "validation_status";
/// Column carrying the semicolon-joined violation list.
pub const COL_VIOLATIONS: &str = "violations";

/// Prefixes that mark one-hot indicator columns in the static table.
pub const ONE_HOT_PREFIXES: [&str; 2] = ["sector_", "country_"];

/// Ticker symbol. Trimmed and upper-cased on construction so the same
/// symbol always maps to the same history file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Ticker {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Normalize a raw symbol list into a run universe: trim, upper-case,
/// drop empties, dedup keeping the first occurrence. Order is preserved;
/// the orchestrator never reorders tickers by outcome.
pub fn normalize_universe<I, S>(raw: I) -> Vec<Ticker>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for s in raw {
        let t = Ticker::new(s.as_ref());
        if t.is_empty() || !seen.insert(t.clone()) {
            continue;
        }
        out.push(t);
    }
    out
}

/// A single cell value in a feature table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value. Booleans and text are not numbers here.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Option<f64>> for Value {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Value::Null, Value::Float)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Outcome of soft validation, persisted as a string column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Ok,
    Flagged,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Ok => "ok",
            ValidationStatus::Flagged => "flagged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(ValidationStatus::Ok),
            "flagged" => Some(ValidationStatus::Flagged),
            _ => None,
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ticker/snapshot feature vector plus validation metadata.
///
/// Created by a row assembler, possibly mutated by the validator
/// (unstable ratios nullified), persisted by the history store. Rows are
/// only ever appended or upserted by snapshot date, never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub ticker: Ticker,
    pub as_of: NaiveDate,
    pub values: BTreeMap<String, Value>,
    /// None until the validator has run (or for legacy rows read from disk).
    pub status: Option<ValidationStatus>,
    pub violations: Vec<String>,
}

impl FeatureRow {
    pub fn new(ticker: Ticker, as_of: NaiveDate) -> Self {
        Self {
            ticker,
            as_of,
            values: BTreeMap::new(),
            status: None,
            violations: Vec::new(),
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Value::as_f64)
    }

    /// True if at least one feature carries a non-null value.
    pub fn has_any_feature(&self) -> bool {
        self.values.values().any(|v| !v.is_null())
    }

    /// Stamp the validation outcome onto the row.
    pub fn stamp(&mut self, status: ValidationStatus, violations: Vec<String>) {
        self.status = Some(status);
        self.violations = violations;
    }

    /// Semicolon-joined violation list, as persisted.
    pub fn violations_joined(&self) -> String {
        self.violations.join(";")
    }
}

/// Slowly-varying per-ticker attributes (sector/country one-hot flags,
/// labels). At most one logical row per ticker in the static table.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticRow {
    pub ticker: Ticker,
    pub values: BTreeMap<String, Value>,
}

impl StaticRow {
    pub fn new(ticker: Ticker) -> Self {
        Self {
            ticker,
            values: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
