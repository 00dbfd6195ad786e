//! Source adapter trait and the classified upstream error.
//!
//! Every upstream provider sits behind [`SourceAdapter`]. Failures are
//! classified at this boundary into transient and fatal, and every retry
//! decision downstream hinges on [`FetchError::class`].

use crate::domain::{AdjustmentType, Instrument, MarketKind, Period, Record, Target};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed calendar-date interval `[start, end]`, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Parameters of one upstream query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub instrument: Instrument,
    pub period: Period,
    pub adjustment: AdjustmentType,
    pub range: DateRange,
}

impl FetchRequest {
    /// Build a request, rejecting an inverted range.
    pub fn new(target: &Target, range: DateRange) -> Result<Self, FetchError> {
        if range.is_empty() {
            return Err(FetchError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }
        Ok(Self {
            instrument: target.instrument.clone(),
            period: target.period,
            adjustment: target.adjustment,
            range,
        })
    }

    /// The series this request reads, e.g. `sh.000001 day qfq`.
    pub fn series(&self) -> String {
        format!("{} {} {}", self.instrument, self.period, self.adjustment)
    }
}

/// Whether retrying the same call can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    Transient,
    Fatal,
}

/// Upstream failure, classified by [`FetchError::class`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rate limited by provider")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("malformed or truncated payload: {0}")]
    MalformedPayload(String),

    #[error("upstream unavailable (HTTP {status})")]
    UpstreamUnavailable { status: u16 },

    #[error("unknown instrument: {code}")]
    UnknownInstrument { code: String },

    #[error("unsupported combination: period {period}, adjustment {adjustment}")]
    Unsupported {
        period: Period,
        adjustment: AdjustmentType,
    },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("provider refused the client (HTTP 403)")]
    Blocked,

    /// The circuit breaker is open; the provider is not contacted.
    #[error("provider cooling down, {retry_after_secs}s remaining")]
    CoolingDown { retry_after_secs: u64 },

    #[error("invalid date range {start}..={end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl FetchError {
    pub fn class(&self) -> FailureClass {
        match self {
            FetchError::Timeout(_)
            | FetchError::Transport(_)
            | FetchError::RateLimited { .. }
            | FetchError::MalformedPayload(_)
            | FetchError::UpstreamUnavailable { .. }
            | FetchError::CoolingDown { .. } => FailureClass::Transient,
            FetchError::UnknownInstrument { .. }
            | FetchError::Unsupported { .. }
            | FetchError::AuthenticationFailed(_)
            | FetchError::Blocked
            | FetchError::InvalidRange { .. }
            | FetchError::Rejected(_) => FailureClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    /// Upstream's own back-off hint, if it sent one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            FetchError::RateLimited { retry_after_secs } => *retry_after_secs,
            FetchError::CoolingDown { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Uniform capability over an upstream provider.
///
/// Implementations return bars ascending by time, values exactly as the
/// provider sent them; validation happens downstream. The range is the
/// closed interval described by [`DateRange`].
pub trait SourceAdapter: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch bars for one instrument/period/adjustment over a date range.
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError>;

    /// Whether this provider can serve the period/adjustment pair at all.
    fn supports(&self, _period: Period, _adjustment: AdjustmentType) -> bool {
        true
    }

    /// Every instrument the provider knows of, restricted to `kinds` unless
    /// it is empty.
    fn list_instruments(&self, _kinds: &[MarketKind]) -> Result<Vec<Instrument>, FetchError> {
        Err(FetchError::Rejected(format!(
            "{} cannot list instruments",
            self.name()
        )))
    }
}
