//! Series coordinates: bar period and price adjustment.
//!
//! Both enums double as on-disk directory names, so their string tokens are
//! part of the storage format and must never change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Bar granularity.
///
/// Intraday periods are the closed set of 5/15/30/60 minute bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "week")]
    Week,
    #[serde(rename = "mon")]
    Month,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "30m")]
    Min30,
    #[serde(rename = "60m")]
    Min60,
}

impl Period {
    pub const ALL: [Period; 7] = [
        Period::Day,
        Period::Week,
        Period::Month,
        Period::Min5,
        Period::Min15,
        Period::Min30,
        Period::Min60,
    ];

    /// Directory / CLI token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "mon",
            Period::Min5 => "5m",
            Period::Min15 => "15m",
            Period::Min30 => "30m",
            Period::Min60 => "60m",
        }
    }

    /// Bar length in minutes for intraday periods, `None` otherwise.
    pub fn minutes(&self) -> Option<u32> {
        match self {
            Period::Min5 => Some(5),
            Period::Min15 => Some(15),
            Period::Min30 => Some(30),
            Period::Min60 => Some(60),
            Period::Day | Period::Week | Period::Month => None,
        }
    }

    pub fn is_intraday(&self) -> bool {
        self.minutes().is_some()
    }

    /// Week and month bars keep changing until their period closes.
    pub fn is_calendar_aggregate(&self) -> bool {
        matches!(self, Period::Week | Period::Month)
    }

    /// The `chrono` format used for the `time` column of this period.
    pub fn time_format(&self) -> &'static str {
        if self.is_intraday() {
            "%Y-%m-%d %H:%M"
        } else {
            "%Y-%m-%d"
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = SeriesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase();
        Period::ALL
            .into_iter()
            .find(|p| p.as_str() == token)
            .or(match token.as_str() {
                "month" => Some(Period::Month),
                _ => None,
            })
            .ok_or(SeriesError::UnknownPeriod(s.to_string()))
    }
}

/// Price adjustment applied by the upstream provider.
///
/// Partitions of different adjustment types are fully isolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AdjustmentType {
    /// Forward-adjusted (前复权).
    #[serde(rename = "qfq")]
    Forward,
    /// Backward-adjusted (后复权).
    #[serde(rename = "hfq")]
    Backward,
    #[serde(rename = "none")]
    Unadjusted,
}

impl AdjustmentType {
    pub const ALL: [AdjustmentType; 3] = [
        AdjustmentType::Forward,
        AdjustmentType::Backward,
        AdjustmentType::Unadjusted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentType::Forward => "qfq",
            AdjustmentType::Backward => "hfq",
            AdjustmentType::Unadjusted => "none",
        }
    }
}

impl fmt::Display for AdjustmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdjustmentType {
    type Err = SeriesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase();
        AdjustmentType::ALL
            .into_iter()
            .find(|a| a.as_str() == token)
            .ok_or(SeriesError::UnknownAdjustment(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeriesError {
    #[error("unknown period '{0}' (expected day, week, mon, 5m, 15m, 30m, 60m)")]
    UnknownPeriod(String),

    #[error("unknown adjustment type '{0}' (expected qfq, hfq, none)")]
    UnknownAdjustment(String),
}

/// Parse a comma-separated list, e.g. `day,week,mon`.
pub fn parse_list<T>(list: &str) -> Result<Vec<T>, SeriesError>
where
    T: FromStr<Err = SeriesError> + PartialEq,
{
    let mut out: Vec<T> = Vec::new();
    for token in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let value = token.parse()?;
        if !out.contains(&value) {
            out.push(value);
        }
    }
    Ok(out)
}
