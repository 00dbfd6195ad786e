//! Bounded retry around a single upstream call, plus request pacing.
//!
//! A fatal failure short-circuits on the first attempt. A transient failure
//! is retried with exponential backoff until `max_attempts` is reached, at
//! which point it surfaces as [`RetryError::Exhausted`].

use super::provider::{FetchError, FetchRequest, SourceAdapter};
use crate::domain::{Instrument, MarketKind, Record};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Outcome of a retried call that never succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    /// Non-retryable failure; no further attempts were made.
    #[error("{0}")]
    Fatal(FetchError),

    /// Every attempt failed transiently.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: FetchError },
}

/// One attempt as observed by the policy.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// 1-based.
    pub attempt: u32,
    pub elapsed: Duration,
    pub error: Option<FetchError>,
}

/// Result of [`RetryPolicy::execute`] together with its attempt log.
#[derive(Debug)]
pub struct Retried<T> {
    pub attempts: u32,
    pub log: Vec<AttemptRecord>,
    pub result: Result<T, RetryError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Wait before the attempt following failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exp);
        let hinted = retry_after_secs
            .map(Duration::from_secs)
            .map_or(backoff, |hint| backoff.max(hint));
        hinted.min(self.max_delay)
    }

    pub fn execute<T, F>(&self, mut operation: F) -> Retried<T>
    where
        F: FnMut() -> Result<T, FetchError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut log = Vec::with_capacity(max_attempts as usize);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let outcome = operation();
            let elapsed = started.elapsed();

            let err = match outcome {
                Ok(value) => {
                    tracing::debug!(attempt, ?elapsed, "upstream call succeeded");
                    log.push(AttemptRecord {
                        attempt,
                        elapsed,
                        error: None,
                    });
                    return Retried {
                        attempts: attempt,
                        log,
                        result: Ok(value),
                    };
                }
                Err(err) => err,
            };

            log.push(AttemptRecord {
                attempt,
                elapsed,
                error: Some(err.clone()),
            });

            if !err.is_transient() {
                tracing::debug!(attempt, error = %err, "fatal upstream failure, not retrying");
                return Retried {
                    attempts: attempt,
                    log,
                    result: Err(RetryError::Fatal(err)),
                };
            }

            if attempt >= max_attempts {
                tracing::warn!(attempt, error = %err, "retries exhausted");
                return Retried {
                    attempts: attempt,
                    log,
                    result: Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    }),
                };
            }

            let delay = self.delay_after(attempt, err.retry_after_secs());
            tracing::warn!(attempt, ?delay, error = %err, "transient upstream failure, retrying");
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
    }
}

/// Minimum spacing between successive upstream calls.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Block until `interval` has passed since the previous call, then stamp.
    pub fn wait(&self) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = *last {
            let since = prev.elapsed();
            if since < self.interval {
                std::thread::sleep(self.interval - since);
            }
        }
        *last = Some(Instant::now());
    }
}

/// A source adapter wrapped in retry and pacing.
pub struct Fetcher {
    source: Arc<dyn SourceAdapter>,
    policy: RetryPolicy,
    pacer: Pacer,
}

impl Fetcher {
    pub fn new(source: Arc<dyn SourceAdapter>, policy: RetryPolicy, pacing: Duration) -> Self {
        Self {
            source,
            policy,
            pacer: Pacer::new(pacing),
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn fetch(&self, request: &FetchRequest) -> Retried<Vec<Record>> {
        if !self.source.supports(request.period, request.adjustment) {
            return Retried {
                attempts: 0,
                log: Vec::new(),
                result: Err(RetryError::Fatal(FetchError::Unsupported {
                    period: request.period,
                    adjustment: request.adjustment,
                })),
            };
        }
        self.policy.execute(|| {
            self.pacer.wait();
            tracing::debug!(
                source = self.source.name(),
                code = request.instrument.code(),
                period = %request.period,
                adjustment = %request.adjustment,
                range = %request.range,
                "fetching"
            );
            self.source.fetch(request)
        })
    }

    /// The upstream instrument universe, under the same retry and pacing.
    pub fn list_instruments(&self, kinds: &[MarketKind]) -> Retried<Vec<Instrument>> {
        self.policy.execute(|| {
            self.pacer.wait();
            tracing::debug!(source = self.source.name(), ?kinds, "listing instruments");
            self.source.list_instruments(kinds)
        })
    }
}
