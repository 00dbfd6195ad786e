//! Full-range acquisition: fetch the whole range, clean it, replace the partition.

use super::provider::{DateRange, FetchRequest};
use super::retry::Fetcher;
use super::stats::{FailureReason, RunStatistics, TargetOutcome, TargetReport};
use super::storage::PartitionStore;
use super::sync::{drive, RunControl};
use super::validate::sanitize;
use crate::domain::{AdjustmentType, Instrument, Period, Target};

/// What to do with an existing partition when upstream returns nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OnEmpty {
    Keep,
    Discard,
}

pub struct Downloader<'a> {
    store: &'a PartitionStore,
    fetcher: &'a Fetcher,
}

impl<'a> Downloader<'a> {
    pub fn new(store: &'a PartitionStore, fetcher: &'a Fetcher) -> Self {
        Self { store, fetcher }
    }

    pub fn run(
        &self,
        instruments: &[Instrument],
        periods: &[Period],
        adjustments: &[AdjustmentType],
        range: DateRange,
        force: bool,
        control: &RunControl<'_>,
    ) -> RunStatistics {
        let targets = Target::expand(instruments, periods, adjustments);
        drive(&targets, control, |target| self.process(target, range, force))
    }

    /// One target. A partition that already holds rows is left alone
    /// unless `force` is set.
    pub fn process(&self, target: &Target, range: DateRange, force: bool) -> TargetReport {
        if !force {
            let id = self
                .store
                .partition_id(target.adjustment, target.period, &target.instrument);
            match self.store.has_records(&id) {
                Ok(true) => return TargetReport::new(target.clone(), TargetOutcome::Skipped),
                Ok(false) => {}
                Err(e) => return TargetReport::new(target.clone(), TargetOutcome::Failed(e.into())),
            }
        }
        self.fetch_and_write(target, range, OnEmpty::Keep)
    }

    /// Fetch `range` and atomically replace the partition with the cleaned
    /// result. Nothing is touched before the fetch succeeds.
    pub(crate) fn fetch_and_write(
        &self,
        target: &Target,
        range: DateRange,
        on_empty: OnEmpty,
    ) -> TargetReport {
        let request = match FetchRequest::new(target, range) {
            Ok(request) => request,
            Err(e) => {
                return TargetReport::new(
                    target.clone(),
                    TargetOutcome::Failed(FailureReason::FatalUpstream(e)),
                )
            }
        };

        let retried = self.fetcher.fetch(&request);
        let attempts = retried.attempts;
        let records = match retried.result {
            Ok(records) => records,
            Err(e) => {
                return TargetReport::new(target.clone(), TargetOutcome::Failed(e.into()))
                    .with_attempts(attempts)
            }
        };

        let clean = sanitize(records, None);
        let id = self
            .store
            .partition_id(target.adjustment, target.period, &target.instrument);

        let outcome = if clean.records.is_empty() {
            match on_empty {
                OnEmpty::Keep => TargetOutcome::Empty,
                OnEmpty::Discard => match self.store.remove(&id) {
                    Ok(_) => TargetOutcome::Empty,
                    Err(e) => TargetOutcome::Failed(e.into()),
                },
            }
        } else {
            match self.store.write(&id, &clean.records) {
                Ok(()) => TargetOutcome::Written {
                    records: clean.records.len(),
                },
                Err(e) => TargetOutcome::Failed(e.into()),
            }
        };

        TargetReport {
            target: target.clone(),
            outcome,
            attempts,
            dropped_invalid: clean.dropped_invalid,
            dropped_unordered: clean.dropped_unordered,
            dropped_overlap: 0,
        }
    }
}
