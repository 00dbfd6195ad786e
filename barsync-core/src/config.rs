//! Synchronizer configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! store_root = "data"
//! start_date = "1990-12-19"
//! periods = ["day", "week", "mon"]
//! adjustments = ["qfq"]
//! pacing_ms = 200
//! repair_window_days = 30
//!
//! [retry]
//! max_attempts = 3
//! delay_ms = 5000
//! max_delay_ms = 60000
//!
//! [source]
//! base_url = "https://push2his.eastmoney.com"
//! list_base_url = "https://push2.eastmoney.com"
//! timeout_secs = 30
//! ```

use crate::data::retry::{RetryError, RetryPolicy};
use crate::data::storage::StorageError;
use crate::domain::{AdjustmentType, InstrumentError, Period};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that abort a run before any target is processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid instrument code '{code}': {source}")]
    InvalidCode {
        code: String,
        #[source]
        source: InstrumentError,
    },

    #[error("cannot enumerate stored instruments: {0}")]
    Discovery(#[from] StorageError),

    #[error("cannot list upstream instruments: {0}")]
    Listing(#[from] RetryError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per upstream call, first one included.
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 5_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// HTTP settings of the kline provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Host of the kline (history) endpoint.
    pub base_url: String,
    /// Host of the instrument listing endpoint.
    pub list_base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://push2his.eastmoney.com".into(),
            list_base_url: "https://push2.eastmoney.com".into(),
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub store_root: PathBuf,
    /// First date of a full download.
    pub start_date: NaiveDate,
    pub periods: Vec<Period>,
    pub adjustments: Vec<AdjustmentType>,
    pub retry: RetryConfig,
    /// Minimum spacing between upstream requests.
    pub pacing_ms: u64,
    pub repair_window_days: u32,
    pub source: SourceConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from("data"),
            start_date: NaiveDate::from_ymd_opt(1990, 12, 19).unwrap_or_default(),
            periods: vec![Period::Day, Period::Week, Period::Month],
            adjustments: vec![AdjustmentType::Forward],
            retry: RetryConfig::default(),
            pacing_ms: 200,
            repair_window_days: 30,
            source: SourceConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: SyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject unusable settings and drop duplicate periods/adjustments.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        dedup_in_order(&mut self.periods);
        dedup_in_order(&mut self.adjustments);

        if self.periods.is_empty() {
            return Err(ConfigError::Invalid("at least one period is required".into()));
        }
        if self.adjustments.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one adjustment type is required".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.max_delay_ms < self.retry.delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.max_delay_ms ({}) is smaller than retry.delay_ms ({})",
                self.retry.max_delay_ms, self.retry.delay_ms
            )));
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::Invalid("source.timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

fn dedup_in_order<T: PartialEq + Copy>(items: &mut Vec<T>) {
    let mut seen: Vec<T> = Vec::with_capacity(items.len());
    items.retain(|item| {
        if seen.contains(item) {
            false
        } else {
            seen.push(*item);
            true
        }
    });
}
