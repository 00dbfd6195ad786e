//! Per-run statistics and per-target outcomes.

use super::provider::FetchError;
use super::retry::RetryError;
use super::storage::StorageError;
use crate::domain::Target;
use std::time::Duration;
use thiserror::Error;

/// Why a target failed. Recorded, never propagated out of a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("upstream refused: {0}")]
    FatalUpstream(FetchError),

    #[error("upstream failed after {attempts} attempts: {last}")]
    FatalAfterRetries { attempts: u32, last: FetchError },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage failed: {0}")]
    Storage(String),
}

impl From<RetryError> for FailureReason {
    fn from(e: RetryError) -> Self {
        match e {
            RetryError::Fatal(err) => FailureReason::FatalUpstream(err),
            RetryError::Exhausted { attempts, last } => {
                FailureReason::FatalAfterRetries { attempts, last }
            }
        }
    }
}

impl From<StorageError> for FailureReason {
    fn from(e: StorageError) -> Self {
        if e.is_validation() {
            FailureReason::Validation(e.to_string())
        } else {
            FailureReason::Storage(e.to_string())
        }
    }
}

/// What happened to one target.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetOutcome {
    /// Full fetch written as a fresh partition.
    Written { records: usize },
    /// Incremental fetch appended.
    Appended { records: usize },
    /// Nothing new upstream.
    UpToDate,
    /// Upstream had no data for a partition that does not exist yet.
    Empty,
    /// Already satisfied locally; no upstream call made.
    Skipped,
    /// Repair found missing rows and replaced the partition.
    Rebuilt { records: usize },
    /// Repair found the trailing window complete.
    Intact,
    Failed(FailureReason),
}

impl TargetOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TargetOutcome::Failed(_))
    }

    pub fn new_records(&self) -> usize {
        match self {
            TargetOutcome::Written { records }
            | TargetOutcome::Appended { records }
            | TargetOutcome::Rebuilt { records } => *records,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetReport {
    pub target: Target,
    pub outcome: TargetOutcome,
    /// Upstream attempts spent on this target.
    pub attempts: u32,
    pub dropped_invalid: usize,
    pub dropped_unordered: usize,
    pub dropped_overlap: usize,
}

impl TargetReport {
    pub fn new(target: Target, outcome: TargetOutcome) -> Self {
        Self {
            target,
            outcome,
            attempts: 0,
            dropped_invalid: 0,
            dropped_unordered: 0,
            dropped_overlap: 0,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    pub target: Target,
    pub reason: FailureReason,
}

/// Aggregate of one run. `succeeded` includes skipped and up-to-date
/// targets; the finer counters break it down.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStatistics {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub up_to_date: usize,
    pub empty: usize,
    pub rebuilt: usize,
    pub intact: usize,
    pub new_records: usize,
    pub dropped_invalid: usize,
    pub dropped_unordered: usize,
    pub dropped_overlap: usize,
    pub upstream_attempts: u32,
    pub cancelled: bool,
    pub failures: Vec<TargetFailure>,
    pub elapsed: Duration,
}

impl RunStatistics {
    pub fn record(&mut self, report: &TargetReport) {
        self.attempted += 1;
        self.upstream_attempts += report.attempts;
        self.dropped_invalid += report.dropped_invalid;
        self.dropped_unordered += report.dropped_unordered;
        self.dropped_overlap += report.dropped_overlap;
        self.new_records += report.outcome.new_records();

        match &report.outcome {
            TargetOutcome::Failed(reason) => {
                self.failed += 1;
                self.failures.push(TargetFailure {
                    target: report.target.clone(),
                    reason: reason.clone(),
                });
                return;
            }
            TargetOutcome::Skipped => self.skipped += 1,
            TargetOutcome::UpToDate => self.up_to_date += 1,
            TargetOutcome::Empty => self.empty += 1,
            TargetOutcome::Rebuilt { .. } => self.rebuilt += 1,
            TargetOutcome::Intact => self.intact += 1,
            TargetOutcome::Written { .. } | TargetOutcome::Appended { .. } => {}
        }
        self.succeeded += 1;
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn dropped(&self) -> usize {
        self.dropped_invalid + self.dropped_unordered + self.dropped_overlap
    }

    pub fn log_summary(&self) {
        tracing::info!(
            attempted = self.attempted,
            succeeded = self.succeeded,
            failed = self.failed,
            skipped = self.skipped,
            up_to_date = self.up_to_date,
            new_records = self.new_records,
            dropped = self.dropped(),
            upstream_attempts = self.upstream_attempts,
            cancelled = self.cancelled,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "run finished"
        );
        for failure in &self.failures {
            tracing::error!(target_series = %failure.target, reason = %failure.reason, "target failed");
        }
    }
}
