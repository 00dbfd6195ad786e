//! Run driver and the top-level orchestrator.
//!
//! Targets are processed strictly one at a time. Concurrent requests against
//! the same provider get the client blocked, so throughput is traded for a
//! single in-flight request.

use super::download::Downloader;
use super::provider::{DateRange, SourceAdapter};
use super::repair::Repairer;
use super::retry::Fetcher;
use super::stats::{RunStatistics, TargetOutcome, TargetReport};
use super::storage::PartitionStore;
use super::targets::TargetSpec;
use super::update::Updater;
use crate::config::{ConfigError, SyncConfig};
use crate::domain::{AdjustmentType, Period, Target};
use chrono::{Local, NaiveDate};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Progress callbacks for a run.
pub trait SyncProgress {
    fn on_start(&self, target: &Target, index: usize, total: usize);

    fn on_complete(&self, report: &TargetReport, index: usize, total: usize);

    fn on_batch_complete(&self, stats: &RunStatistics);
}

/// Progress sink that reports nothing.
pub struct NoProgress;

impl SyncProgress for NoProgress {
    fn on_start(&self, _: &Target, _: usize, _: usize) {}
    fn on_complete(&self, _: &TargetReport, _: usize, _: usize) {}
    fn on_batch_complete(&self, _: &RunStatistics) {}
}

/// Cooperative stop flag, checked between targets.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct RunControl<'a> {
    pub progress: &'a dyn SyncProgress,
    pub cancel: CancelToken,
}

impl Default for RunControl<'_> {
    fn default() -> Self {
        Self {
            progress: &NoProgress,
            cancel: CancelToken::new(),
        }
    }
}

/// Run `step` over `targets` in order, aggregating statistics.
pub(crate) fn drive<F>(targets: &[Target], control: &RunControl<'_>, mut step: F) -> RunStatistics
where
    F: FnMut(&Target) -> TargetReport,
{
    let started = Instant::now();
    let total = targets.len();
    let mut stats = RunStatistics::default();

    for (index, target) in targets.iter().enumerate() {
        if control.cancel.is_cancelled() {
            tracing::warn!(remaining = total - index, "run cancelled");
            stats.cancelled = true;
            break;
        }
        control.progress.on_start(target, index, total);
        let report = step(target);
        log_report(&report);
        control.progress.on_complete(&report, index, total);
        stats.record(&report);
    }

    stats.elapsed = started.elapsed();
    control.progress.on_batch_complete(&stats);
    stats.log_summary();
    stats
}

fn log_report(report: &TargetReport) {
    let series = &report.target;
    match &report.outcome {
        TargetOutcome::Failed(reason) => {
            tracing::error!(target_series = %series, attempts = report.attempts, %reason, "target failed")
        }
        outcome => tracing::info!(
            target_series = %series,
            attempts = report.attempts,
            new_records = outcome.new_records(),
            dropped_invalid = report.dropped_invalid,
            dropped_unordered = report.dropped_unordered,
            dropped_overlap = report.dropped_overlap,
            outcome = ?outcome,
            "target done"
        ),
    }
}

/// Which engine a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Full acquisition over `range`; existing partitions are skipped unless `force`.
    Download { range: DateRange, force: bool },
    /// Incremental from each partition's cursor.
    Update { force_full: bool },
    /// Compare the trailing window with upstream and rebuild on mismatch.
    Repair { window_days: u32 },
}

#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub targets: TargetSpec,
    pub include_indices: bool,
    pub periods: Vec<Period>,
    pub adjustments: Vec<AdjustmentType>,
    pub strategy: Strategy,
}

pub struct SyncOrchestrator {
    store: PartitionStore,
    fetcher: Fetcher,
    start_date: NaiveDate,
    today: NaiveDate,
}

impl SyncOrchestrator {
    pub fn new(config: &SyncConfig, source: Arc<dyn SourceAdapter>) -> Self {
        Self {
            store: PartitionStore::new(&config.store_root),
            fetcher: Fetcher::new(source, config.retry.policy(), config.pacing()),
            start_date: config.start_date,
            today: Local::now().date_naive(),
        }
    }

    /// Pin "today" (the end of full and incremental ranges).
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn store(&self) -> &PartitionStore {
        &self.store
    }

    /// Resolve the target set and run the chosen strategy over it.
    ///
    /// Only configuration problems are returned as `Err`; per-target
    /// failures land in the statistics.
    pub fn run(&self, plan: &SyncPlan, control: &RunControl<'_>) -> Result<RunStatistics, ConfigError> {
        if plan.periods.is_empty() {
            return Err(ConfigError::Invalid("no periods selected".into()));
        }
        if plan.adjustments.is_empty() {
            return Err(ConfigError::Invalid("no adjustment types selected".into()));
        }
        match plan.strategy {
            Strategy::Download { range, .. } if range.is_empty() => {
                return Err(ConfigError::Invalid(format!("start date after end date ({range})")));
            }
            Strategy::Update { .. } | Strategy::Repair { .. } if self.start_date > self.today => {
                return Err(ConfigError::Invalid(format!(
                    "start date {} is after today ({})",
                    self.start_date, self.today
                )));
            }
            _ => {}
        }

        let instruments = plan
            .targets
            .resolve(&self.store, &self.fetcher, &plan.adjustments, plan.include_indices)?;
        tracing::info!(
            source = self.fetcher.source_name(),
            instruments = instruments.len(),
            periods = plan.periods.len(),
            adjustments = plan.adjustments.len(),
            strategy = ?plan.strategy,
            "starting run"
        );

        let stats = match plan.strategy {
            Strategy::Download { range, force } => Downloader::new(&self.store, &self.fetcher).run(
                &instruments,
                &plan.periods,
                &plan.adjustments,
                range,
                force,
                control,
            ),
            Strategy::Update { force_full } => {
                Updater::new(&self.store, &self.fetcher, self.start_date, self.today).run(
                    &instruments,
                    &plan.periods,
                    &plan.adjustments,
                    force_full,
                    control,
                )
            }
            Strategy::Repair { window_days } => Repairer::new(
                &self.store,
                &self.fetcher,
                DateRange::new(self.start_date, self.today),
                window_days,
            )
            .run(&instruments, &plan.periods, &plan.adjustments, control),
        };
        Ok(stats)
    }
}
