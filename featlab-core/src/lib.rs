//! FeatLab core: domain types, validation, schema reconciliation, parquet store.
//!
//! This crate contains the data layer of the feature materialization pipeline:
//! - Domain types (tickers, values, dynamic and static feature rows)
//! - Dtype promotion lattice for schema reconciliation
//! - Row ⇄ DataFrame bridge with column ordering and storage normalization
//! - Soft validation engine (denominator guards, ranges, jump checks)
//! - Row assembler trait with the provider error taxonomy
//! - Idempotent parquet store (per-ticker history, static tables, combined table)

pub mod assemble;
pub mod domain;
pub mod frame;
pub mod schema;
pub mod store;
pub mod validate;

pub use assemble::{AssembleError, AssembledRow, ProviderError, RowAssembler};
pub use domain::{FeatureRow, StaticRow, Ticker, ValidationStatus, Value};
pub use store::{DataLayout, MergeOutcome, OverwriteMode, StoreError, UpsertOutcome};
pub use validate::{Validated, ValidatorConfig};
