//! Cleaning of upstream sequences before they reach storage.
//!
//! Bad records are dropped and counted; they never fail the whole target.

use crate::domain::Record;
use chrono::NaiveDateTime;

/// A cleaned sequence: strictly increasing, every record valid, every
/// record after the cursor (if any).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sanitized {
    pub records: Vec<Record>,
    /// NaN/infinite fields or negative prices.
    pub dropped_invalid: usize,
    /// Duplicated or out-of-order timestamps within the batch.
    pub dropped_unordered: usize,
    /// At or before the resume cursor.
    pub dropped_overlap: usize,
}

impl Sanitized {
    pub fn dropped(&self) -> usize {
        self.dropped_invalid + self.dropped_unordered + self.dropped_overlap
    }
}

/// Filter `records` down to a sequence that can be written or appended.
///
/// With `after = Some(cursor)`, anything at or before `cursor` counts as
/// boundary overlap. Among the remainder, the first occurrence of a
/// timestamp wins and anything going backwards in time is dropped.
pub fn sanitize(records: Vec<Record>, after: Option<NaiveDateTime>) -> Sanitized {
    let mut out = Sanitized {
        records: Vec::with_capacity(records.len()),
        ..Sanitized::default()
    };

    for record in records {
        if let Err(e) = record.validate() {
            tracing::warn!(time = %record.time, error = %e, "dropping invalid record");
            out.dropped_invalid += 1;
            continue;
        }
        if after.is_some_and(|cursor| record.time <= cursor) {
            out.dropped_overlap += 1;
            continue;
        }
        if let Some(last) = out.records.last() {
            if record.time <= last.time {
                tracing::warn!(
                    time = %record.time,
                    previous = %last.time,
                    "dropping out-of-order record"
                );
                out.dropped_unordered += 1;
                continue;
            }
        }
        out.records.push(record);
    }

    if out.dropped_overlap > 0 {
        tracing::info!(count = out.dropped_overlap, "discarded records overlapping the cursor");
    }
    out
}
