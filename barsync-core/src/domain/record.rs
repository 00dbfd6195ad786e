//! One stored bar.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One bar as stored in a partition.
///
/// `time` is the bar's timestamp; day/week/month bars sit at midnight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
    pub turnover_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("{field} is not finite ({value})")]
    NonFinite { field: &'static str, value: f64 },

    #[error("{field} is negative ({value})")]
    NegativePrice { field: &'static str, value: f64 },

    #[error("unparsable timestamp '{0}'")]
    BadTime(String),

    #[error("unparsable {field} '{value}'")]
    BadNumber { field: &'static str, value: String },
}

impl Record {
    /// A bar at midnight of `date`; the usual shape for day/week/month data.
    pub fn daily(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time: date.and_time(NaiveTime::MIN),
            open,
            high,
            low,
            close,
            volume,
            turnover: 0.0,
            turnover_rate: 0.0,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.time.date()
    }

    /// Field-level validity: every number finite, no negative price.
    pub fn validate(&self) -> Result<(), RecordError> {
        let numbers = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
            ("turnover", self.turnover),
            ("turnover_rate", self.turnover_rate),
        ];
        for (field, value) in numbers {
            if !value.is_finite() {
                return Err(RecordError::NonFinite { field, value });
            }
        }
        for &(field, value) in &numbers[..4] {
            if value < 0.0 {
                return Err(RecordError::NegativePrice { field, value });
            }
        }
        Ok(())
    }
}

/// Parse a stored or upstream timestamp.
///
/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD` and either followed by `HH:MM` or
/// `HH:MM:SS`.
pub fn parse_time(raw: &str) -> Result<NaiveDateTime, RecordError> {
    let normalized = raw.trim().replace('/', "-");
    if let Ok(date) = NaiveDate::parse_from_str(&normalized, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&normalized, fmt).ok())
        .ok_or_else(|| RecordError::BadTime(raw.to_string()))
}

/// Parse a numeric cell; empty cells read as zero.
pub fn parse_number(field: &'static str, raw: &str) -> Result<f64, RecordError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }
    trimmed.parse::<f64>().map_err(|_| RecordError::BadNumber {
        field,
        value: raw.to_string(),
    })
}
