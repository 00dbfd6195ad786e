//! Domain types for the bar store

pub mod instrument;
pub mod record;
pub mod series;

pub use instrument::{Exchange, Instrument, InstrumentError, MarketKind, MAJOR_INDICES};
pub use record::{parse_number, parse_time, Record, RecordError};
pub use series::{parse_list, AdjustmentType, Period, SeriesError};

/// One unit of work: a single series of a single instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target {
    pub instrument: Instrument,
    pub period: Period,
    pub adjustment: AdjustmentType,
}

impl Target {
    pub fn new(instrument: Instrument, period: Period, adjustment: AdjustmentType) -> Self {
        Self {
            instrument,
            period,
            adjustment,
        }
    }

    /// Expand instruments × periods × adjustments, instrument-major.
    pub fn expand(
        instruments: &[Instrument],
        periods: &[Period],
        adjustments: &[AdjustmentType],
    ) -> Vec<Target> {
        let mut out = Vec::with_capacity(instruments.len() * periods.len() * adjustments.len());
        for instrument in instruments {
            for &period in periods {
                for &adjustment in adjustments {
                    out.push(Target::new(instrument.clone(), period, adjustment));
                }
            }
        }
        out
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.instrument, self.period, self.adjustment)
    }
}
