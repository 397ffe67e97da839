//! Serializable batch run configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use featlab_core::domain::normalize_universe;
use featlab_core::store::OverwriteMode;
use featlab_core::Ticker;

/// Errors from loading or validating a run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_sleep_between_calls() -> f64 {
    0.25
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_sleep() -> f64 {
    2.0
}
fn default_overwrite_mode() -> OverwriteMode {
    OverwriteMode::Append
}
fn default_max_consecutive_rate_limits() -> u32 {
    6
}
fn default_max_run_minutes() -> f64 {
    60.0
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("features_data")
}

/// Configuration of one batch run.
///
/// Tickers come either inline (`tickers`) or from a newline-separated
/// file (`tickers_file`); inline wins when both are set. The symbol list
/// is normalized (trimmed, upper-cased, deduped) before use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub tickers_file: Option<PathBuf>,

    /// First and last snapshot year, inclusive. One snapshot per year,
    /// taken at December 31.
    pub start_year: i32,
    pub end_year: i32,

    /// Seconds to pause between successful provider calls.
    #[serde(default = "default_sleep_between_calls")]
    pub sleep_between_calls: f64,

    /// Retry budget for transient provider errors, per snapshot date.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential backoff for transient retries, seconds.
    #[serde(default = "default_retry_base_sleep")]
    pub retry_base_sleep: f64,

    #[serde(default = "default_overwrite_mode")]
    pub overwrite_mode: OverwriteMode,

    /// Rebuild the combined table even when no ticker changed.
    #[serde(default)]
    pub force_merge: bool,

    /// Exit non-zero when any snapshot hard-failed.
    #[serde(default)]
    pub strict: bool,

    /// Consecutive rate-limited responses before the current ticker aborts.
    #[serde(default = "default_max_consecutive_rate_limits")]
    pub max_consecutive_rate_limits: u32,

    /// Wall-clock budget for the whole run, minutes. Zero disables it.
    #[serde(default = "default_max_run_minutes")]
    pub max_run_minutes: f64,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl RunConfig {
    /// Load a run configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_year > self.end_year {
            return Err(ConfigError::Invalid(format!(
                "start_year {} is after end_year {}",
                self.start_year, self.end_year
            )));
        }
        if self.tickers.is_empty() && self.tickers_file.is_none() {
            return Err(ConfigError::Invalid(
                "no tickers: set `tickers` or `tickers_file`".into(),
            ));
        }
        if self.sleep_between_calls < 0.0 || self.retry_base_sleep < 0.0 {
            return Err(ConfigError::Invalid("sleep values must be >= 0".into()));
        }
        if self.max_run_minutes < 0.0 {
            return Err(ConfigError::Invalid("max_run_minutes must be >= 0".into()));
        }
        if self.max_consecutive_rate_limits == 0 {
            return Err(ConfigError::Invalid(
                "max_consecutive_rate_limits must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolve and normalize the run universe.
    pub fn universe(&self) -> Result<Vec<Ticker>, ConfigError> {
        let raw: Vec<String> = if !self.tickers.is_empty() {
            self.tickers.clone()
        } else if let Some(path) = &self.tickers_file {
            std::fs::read_to_string(path)?
                .lines()
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };
        let universe = normalize_universe(raw);
        if universe.is_empty() {
            return Err(ConfigError::Invalid("ticker universe is empty".into()));
        }
        Ok(universe)
    }

    /// Snapshot dates of the run: December 31 of each year in range.
    pub fn snapshot_dates(&self) -> Vec<chrono::NaiveDate> {
        (self.start_year..=self.end_year)
            .filter_map(|y| chrono::NaiveDate::from_ymd_opt(y, 12, 31))
            .collect()
    }
}
