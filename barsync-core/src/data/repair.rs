//! Trailing-window consistency check.
//!
//! Upstream occasionally revises history or a run dies between targets.
//! For each stored partition the last `window_days` of local rows are
//! compared with what upstream serves for the same window; if upstream has
//! more rows the partition is rebuilt from a full download.

use super::download::{Downloader, OnEmpty};
use super::provider::{DateRange, FetchRequest};
use super::retry::Fetcher;
use super::stats::{FailureReason, RunStatistics, TargetOutcome, TargetReport};
use super::storage::PartitionStore;
use super::sync::{drive, RunControl};
use super::validate::sanitize;
use crate::domain::{AdjustmentType, Instrument, Period, Target};
use chrono::Days;

pub struct Repairer<'a> {
    store: &'a PartitionStore,
    fetcher: &'a Fetcher,
    /// Range of a rebuild; its end is also the end of the checked window.
    full_range: DateRange,
    window_days: u32,
}

impl<'a> Repairer<'a> {
    pub fn new(
        store: &'a PartitionStore,
        fetcher: &'a Fetcher,
        full_range: DateRange,
        window_days: u32,
    ) -> Self {
        Self {
            store,
            fetcher,
            full_range,
            window_days,
        }
    }

    pub fn run(
        &self,
        instruments: &[Instrument],
        periods: &[Period],
        adjustments: &[AdjustmentType],
        control: &RunControl<'_>,
    ) -> RunStatistics {
        let targets = Target::expand(instruments, periods, adjustments);
        drive(&targets, control, |target| self.process(target))
    }

    fn window(&self) -> DateRange {
        let end = self.full_range.end;
        let start = end
            .checked_sub_days(Days::new(u64::from(self.window_days)))
            .unwrap_or(self.full_range.start)
            .max(self.full_range.start);
        DateRange::new(start, end)
    }

    pub fn process(&self, target: &Target) -> TargetReport {
        let id = self
            .store
            .partition_id(target.adjustment, target.period, &target.instrument);
        let window = self.window();

        let local = match self.store.read(&id) {
            Ok(records) if records.is_empty() => {
                return TargetReport::new(target.clone(), TargetOutcome::Skipped)
            }
            Ok(records) => records
                .iter()
                .filter(|r| window.contains(r.date()))
                .count(),
            Err(e) => return TargetReport::new(target.clone(), TargetOutcome::Failed(e.into())),
        };

        let request = match FetchRequest::new(target, window) {
            Ok(request) => request,
            Err(e) => {
                return TargetReport::new(
                    target.clone(),
                    TargetOutcome::Failed(FailureReason::FatalUpstream(e)),
                )
            }
        };
        let retried = self.fetcher.fetch(&request);
        let window_attempts = retried.attempts;
        let upstream = match retried.result {
            Ok(records) => sanitize(records, None).records,
            Err(e) => {
                return TargetReport::new(target.clone(), TargetOutcome::Failed(e.into()))
                    .with_attempts(window_attempts)
            }
        };

        if upstream.len() <= local {
            return TargetReport::new(target.clone(), TargetOutcome::Intact)
                .with_attempts(window_attempts);
        }

        tracing::warn!(
            target_series = %target,
            local,
            upstream = upstream.len(),
            %window,
            "trailing window incomplete, rebuilding"
        );
        let mut report =
            Downloader::new(self.store, self.fetcher).fetch_and_write(target, self.full_range, OnEmpty::Keep);
        report.attempts += window_attempts;
        if let TargetOutcome::Written { records } = report.outcome {
            report.outcome = TargetOutcome::Rebuilt { records };
        }
        report
    }
}
