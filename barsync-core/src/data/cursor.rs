//! Resume point of a partition.

use super::storage::{PartitionStore, StorageError};
use crate::domain::{AdjustmentType, Instrument, Period};
use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};

/// Last persisted timestamp of a partition, derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// No partition, or a partition with zero rows: needs a full bootstrap.
    Empty,
    At(NaiveDateTime),
}

impl Cursor {
    pub fn is_empty(&self) -> bool {
        matches!(self, Cursor::Empty)
    }

    pub fn time(&self) -> Option<NaiveDateTime> {
        match self {
            Cursor::Empty => None,
            Cursor::At(t) => Some(*t),
        }
    }

    /// First calendar date an incremental query should ask for.
    ///
    /// Day bars resume the day after the cursor. Intraday bars resume on the
    /// cursor's own date since that session may be unfinished; bars up to the
    /// cursor are then discarded as overlap. Week and month bars resume at
    /// the start of the cursor's week (Monday) or month, so a bar stored
    /// while its period was still open gets refetched and replaced.
    pub fn resume_date(&self, period: Period) -> Option<NaiveDate> {
        let date = self.time()?.date();
        match period {
            Period::Week => {
                date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
            }
            Period::Month => date.with_day(1),
            p if p.is_intraday() => Some(date),
            _ => date.checked_add_days(Days::new(1)),
        }
    }
}

pub struct CursorResolver<'a> {
    store: &'a PartitionStore,
}

impl<'a> CursorResolver<'a> {
    pub fn new(store: &'a PartitionStore) -> Self {
        Self { store }
    }

    pub fn resolve(
        &self,
        adjustment: AdjustmentType,
        period: Period,
        instrument: &Instrument,
    ) -> Result<Cursor, StorageError> {
        let id = self.store.partition_id(adjustment, period, instrument);
        Ok(match self.store.read(&id)?.last() {
            Some(record) => Cursor::At(record.time),
            None => Cursor::Empty,
        })
    }
}
