//! Incremental acquisition from each partition's cursor.

use super::cursor::{Cursor, CursorResolver};
use super::download::{Downloader, OnEmpty};
use super::provider::{DateRange, FetchRequest};
use super::retry::Fetcher;
use super::stats::{FailureReason, RunStatistics, TargetOutcome, TargetReport};
use super::storage::PartitionStore;
use super::sync::{drive, RunControl};
use super::validate::sanitize;
use crate::domain::{AdjustmentType, Instrument, Period, Record, Target};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

pub struct Updater<'a> {
    store: &'a PartitionStore,
    fetcher: &'a Fetcher,
    /// Start of a bootstrap (full) fetch.
    start_date: NaiveDate,
    today: NaiveDate,
}

impl<'a> Updater<'a> {
    pub fn new(
        store: &'a PartitionStore,
        fetcher: &'a Fetcher,
        start_date: NaiveDate,
        today: NaiveDate,
    ) -> Self {
        Self {
            store,
            fetcher,
            start_date,
            today,
        }
    }

    pub fn run(
        &self,
        instruments: &[Instrument],
        periods: &[Period],
        adjustments: &[AdjustmentType],
        force_full: bool,
        control: &RunControl<'_>,
    ) -> RunStatistics {
        let targets = Target::expand(instruments, periods, adjustments);
        drive(&targets, control, |target| self.process(target, force_full))
    }

    fn full_range(&self) -> DateRange {
        DateRange::new(self.start_date, self.today)
    }

    pub fn process(&self, target: &Target, force_full: bool) -> TargetReport {
        let downloader = Downloader::new(self.store, self.fetcher);
        if force_full {
            // The fresh result replaces whatever is stored, including with nothing.
            return downloader.fetch_and_write(target, self.full_range(), OnEmpty::Discard);
        }

        let cursor = match CursorResolver::new(self.store).resolve(
            target.adjustment,
            target.period,
            &target.instrument,
        ) {
            Ok(cursor) => cursor,
            Err(e) => return TargetReport::new(target.clone(), TargetOutcome::Failed(e.into())),
        };

        match cursor {
            Cursor::Empty => {
                tracing::debug!(target_series = %target, "no local data, bootstrapping");
                downloader.fetch_and_write(target, self.full_range(), OnEmpty::Keep)
            }
            Cursor::At(last) => self.incremental(target, cursor, last),
        }
    }

    fn incremental(&self, target: &Target, cursor: Cursor, last: NaiveDateTime) -> TargetReport {
        let start = match cursor.resume_date(target.period) {
            Some(start) if start <= self.today => start,
            _ => return TargetReport::new(target.clone(), TargetOutcome::UpToDate),
        };

        let request = match FetchRequest::new(target, DateRange::new(start, self.today)) {
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

        if target.period.is_calendar_aggregate() {
            return self.refresh_tail(target, start, records, attempts);
        }

        let clean = sanitize(records, Some(last));
        let outcome = if clean.records.is_empty() {
            TargetOutcome::UpToDate
        } else {
            let id = self
                .store
                .partition_id(target.adjustment, target.period, &target.instrument);
            match self.store.append(&id, &clean.records) {
                Ok(records) => TargetOutcome::Appended { records },
                Err(e) => TargetOutcome::Failed(e.into()),
            }
        };

        TargetReport {
            target: target.clone(),
            outcome,
            attempts,
            dropped_invalid: clean.dropped_invalid,
            dropped_unordered: clean.dropped_unordered,
            dropped_overlap: clean.dropped_overlap,
        }
    }

    /// Week/month update: the stored bars from `start` on may have been
    /// written while their period was open, so the fetched ones replace them.
    /// Reports only the net new rows.
    fn refresh_tail(
        &self,
        target: &Target,
        start: NaiveDate,
        records: Vec<Record>,
        attempts: u32,
    ) -> TargetReport {
        let from = start.and_time(NaiveTime::MIN);
        let fetched = records.len();
        let records: Vec<Record> = records.into_iter().filter(|r| r.time >= from).collect();
        let early = fetched - records.len();
        let mut clean = sanitize(records, None);
        clean.dropped_overlap += early;

        let id = self
            .store
            .partition_id(target.adjustment, target.period, &target.instrument);
        let outcome = match self.store.read(&id) {
            Err(e) => TargetOutcome::Failed(e.into()),
            Ok(_) if clean.records.is_empty() => TargetOutcome::UpToDate,
            Ok(stored) => {
                let tail: Vec<&Record> = stored.iter().filter(|r| r.time >= from).collect();
                if tail.iter().copied().eq(clean.records.iter()) {
                    TargetOutcome::UpToDate
                } else {
                    match self.store.replace_tail(&id, from, &clean.records) {
                        Ok(written) => {
                            tracing::debug!(target_series = %target, replaced = tail.len(), written, "forming bars refreshed");
                            TargetOutcome::Appended {
                                records: written.saturating_sub(tail.len()),
                            }
                        }
                        Err(e) => TargetOutcome::Failed(e.into()),
                    }
                }
            }
        };

        TargetReport {
            target: target.clone(),
            outcome,
            attempts,
            dropped_invalid: clean.dropped_invalid,
            dropped_unordered: clean.dropped_unordered,
            dropped_overlap: clean.dropped_overlap,
        }
    }
}
