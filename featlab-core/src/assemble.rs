//! Row assembly seam: the trait the runner drives, plus the error
//! taxonomy that decides retry, abort and skip behavior.
//!
//! An assembler produces one feature vector per (ticker, snapshot date).
//! How it gets the numbers is its own business; the state machine only
//! looks at the error classification.

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{FeatureRow, StaticRow, Ticker};

/// Upstream provider failures, classified by how the batch should react.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Credentials rejected. No later call for this ticker can succeed;
    /// its remaining dates are abandoned.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The account's plan does not cover the requested data. The ticker
    /// is abandoned.
    #[error("plan does not permit request: {0}")]
    Plan(String),

    /// Throttled. Retried in place until the circuit breaker trips.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Upstream 5xx-class failure. Retried with backoff.
    #[error("server error: {0}")]
    Server(String),

    /// Transport-level failure. Retried with backoff.
    #[error("network error: {0}")]
    Network(String),

    /// Anything else. Retried with backoff.
    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Fatal errors hard-fail the current date, abandon the ticker's
    /// remaining dates, and let the run continue with the next ticker.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProviderError::Auth(_) | ProviderError::Plan(_))
    }

    /// Rate limits feed the circuit breaker instead of the retry budget.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }
}

/// What went wrong assembling one (ticker, snapshot date) row.
#[derive(Debug, Error)]
pub enum AssembleError {
    /// Not enough trailing history exists at this date to compute the
    /// feature set. Expected for young listings; the date is dropped.
    #[error("{ticker}: insufficient history at {as_of}")]
    InsufficientHistory { ticker: Ticker, as_of: NaiveDate },

    /// The assembled row violates the output contract (wrong identifier,
    /// no features). Not retryable; counts as a soft failure.
    #[error("contract violation: {0}")]
    Contract(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// One assembled snapshot: the dynamic row, optionally a static row the
/// first time this ticker is seen, and the sector label for audit logs.
#[derive(Debug, Clone)]
pub struct AssembledRow {
    pub dynamic: FeatureRow,
    pub static_row: Option<StaticRow>,
    pub sector: Option<String>,
}

impl AssembledRow {
    /// Enforce the output contract: identifiers must match the request
    /// and the row must carry at least one non-null feature.
    pub fn check_contract(&self, ticker: &Ticker, as_of: NaiveDate) -> Result<(), AssembleError> {
        if &self.dynamic.ticker != ticker {
            return Err(AssembleError::Contract(format!(
                "row ticker {} does not match requested {ticker}",
                self.dynamic.ticker
            )));
        }
        if self.dynamic.as_of != as_of {
            return Err(AssembleError::Contract(format!(
                "{ticker}: row date {} does not match requested {as_of}",
                self.dynamic.as_of
            )));
        }
        if !self.dynamic.has_any_feature() {
            return Err(AssembleError::Contract(format!(
                "{ticker} {as_of}: assembled row carries no features"
            )));
        }
        Ok(())
    }
}

/// Source of feature rows. `&mut self` so implementations can carry
/// caches or call counters.
pub trait RowAssembler {
    fn assemble(&mut self, ticker: &Ticker, as_of: NaiveDate) -> Result<AssembledRow, AssembleError>;
}
