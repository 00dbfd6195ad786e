//! Partitioned CSV store.
//!
//! Layout: `{root}/{adjustment}/{period}/{code}.csv`
//!
//! - One file per (adjustment, period, instrument); partitions never share state.
//! - Rows are strictly increasing by `time`; reads reject files that are not.
//! - `write`, `append` and `replace_tail` go through a `.csv.tmp` sibling and an atomic rename,
//!   so a reader only ever sees the old file or the new one.

use crate::domain::{parse_number, parse_time, AdjustmentType, Instrument, MarketKind, Period, Record};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column header of every partition file. Columns are read by position.
pub const HEADER: [&str; 8] = [
    "time", "open", "high", "low", "close", "volume", "turnover", "turnrate",
];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("corrupt partition {path} at line {line}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    /// Records handed to `write`/`append` would break the ordering invariant.
    #[error("ordering violation in {partition}: {reason}")]
    OrderViolation { partition: String, reason: String },
}

impl StorageError {
    /// Whether the failure came from the records offered rather than the disk.
    pub fn is_validation(&self) -> bool {
        matches!(self, StorageError::OrderViolation { .. })
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn csv_err(path: &Path) -> impl FnOnce(csv::Error) -> StorageError + '_ {
    move |source| StorageError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

/// Identity of one partition. Construction is pure: equal inputs always
/// address the same file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId {
    adjustment: AdjustmentType,
    period: Period,
    code: String,
}

impl PartitionId {
    pub fn new(adjustment: AdjustmentType, period: Period, instrument: &Instrument) -> Self {
        Self {
            adjustment,
            period,
            code: instrument.code().to_string(),
        }
    }

    pub fn adjustment(&self) -> AdjustmentType {
        self.adjustment
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.adjustment.as_str())
            .join(self.period.as_str())
            .join(format!("{}.csv", self.code))
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.adjustment, self.period, self.code)
    }
}

/// Summary of everything under the store root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStatistics {
    pub partitions: usize,
    pub instruments: usize,
    pub total_bytes: u64,
    pub by_series: BTreeMap<(AdjustmentType, Period), usize>,
    pub last_modified: Option<DateTime<Local>>,
}

impl StoreStatistics {
    pub fn adjustments(&self) -> Vec<AdjustmentType> {
        let set: BTreeSet<_> = self.by_series.keys().map(|(a, _)| *a).collect();
        set.into_iter().collect()
    }

    pub fn periods(&self) -> Vec<Period> {
        let set: BTreeSet<_> = self.by_series.keys().map(|(_, p)| *p).collect();
        set.into_iter().collect()
    }
}

/// The partition store.
#[derive(Debug, Clone)]
pub struct PartitionStore {
    root: PathBuf,
}

impl PartitionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_id(
        &self,
        adjustment: AdjustmentType,
        period: Period,
        instrument: &Instrument,
    ) -> PartitionId {
        PartitionId::new(adjustment, period, instrument)
    }

    pub fn path(&self, id: &PartitionId) -> PathBuf {
        self.root.join(id.relative_path())
    }

    pub fn exists(&self, id: &PartitionId) -> bool {
        self.path(id).is_file()
    }

    /// All records of a partition; empty if it does not exist.
    pub fn read(&self, id: &PartitionId) -> Result<Vec<Record>, StorageError> {
        let path = self.path(id);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        read_partition(&path)
    }

    /// Records whose calendar date falls in `[start, end]`.
    pub fn read_range(
        &self,
        id: &PartitionId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Record>, StorageError> {
        let mut records = self.read(id)?;
        records.retain(|r| {
            let d = r.date();
            start <= d && d <= end
        });
        Ok(records)
    }

    pub fn has_records(&self, id: &PartitionId) -> Result<bool, StorageError> {
        Ok(!self.read(id)?.is_empty())
    }

    /// Atomically replace a partition with `records`.
    pub fn write(&self, id: &PartitionId, records: &[Record]) -> Result<(), StorageError> {
        check_increasing(id, records)?;
        let path = self.path(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let tmp = tmp_path(&path);

        let result = (|| {
            let file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
            let mut writer = csv::Writer::from_writer(io::BufWriter::new(file));
            writer.write_record(HEADER).map_err(csv_err(&tmp))?;
            write_rows(&mut writer, id.period(), records, &tmp)?;
            finish(writer, &tmp)?;
            fs::rename(&tmp, &path).map_err(io_err(&path))
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;
        tracing::debug!(partition = %id, rows = records.len(), "partition written");
        Ok(())
    }

    /// Add records after the partition's last row. Returns the count added.
    ///
    /// Fails with [`StorageError::OrderViolation`] unless every record is
    /// strictly later than the current last row and the batch itself is
    /// strictly increasing. A missing or zero-byte partition is written
    /// from scratch, header included.
    pub fn append(&self, id: &PartitionId, records: &[Record]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }
        check_increasing(id, records)?;

        let path = self.path(id);
        if !path.is_file() || fs::metadata(&path).map_err(io_err(&path))?.len() == 0 {
            self.write(id, records)?;
            return Ok(records.len());
        }

        let existing = read_partition(&path)?;
        if let (Some(last), Some(first)) = (existing.last(), records.first()) {
            if first.time <= last.time {
                return Err(StorageError::OrderViolation {
                    partition: id.to_string(),
                    reason: format!(
                        "record at {} is not after last stored row {}",
                        first.time, last.time
                    ),
                });
            }
        }

        let tmp = tmp_path(&path);
        let result = (|| {
            fs::copy(&path, &tmp).map_err(io_err(&tmp))?;
            let needs_newline = !ends_with_newline(&tmp)?;
            let mut file = fs::OpenOptions::new()
                .append(true)
                .open(&tmp)
                .map_err(io_err(&tmp))?;
            if needs_newline {
                file.write_all(b"\n").map_err(io_err(&tmp))?;
            }
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(io::BufWriter::new(file));
            write_rows(&mut writer, id.period(), records, &tmp)?;
            finish(writer, &tmp)?;
            fs::rename(&tmp, &path).map_err(io_err(&path))
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;
        tracing::debug!(partition = %id, rows = records.len(), "partition appended");
        Ok(records.len())
    }

    /// Swap every row at or after `from` for `records`. Returns the count
    /// written.
    ///
    /// Used for bars that are still forming, such as the current week or
    /// month. `records` must start at or after `from`.
    pub fn replace_tail(
        &self,
        id: &PartitionId,
        from: NaiveDateTime,
        records: &[Record],
    ) -> Result<usize, StorageError> {
        if let Some(first) = records.first() {
            if first.time < from {
                return Err(StorageError::OrderViolation {
                    partition: id.to_string(),
                    reason: format!("record at {} precedes the replaced tail at {from}", first.time),
                });
            }
        }
        let mut rows = self.read(id)?;
        let replaced = rows.iter().filter(|r| r.time >= from).count();
        rows.retain(|r| r.time < from);
        rows.extend_from_slice(records);
        self.write(id, &rows)?;
        tracing::debug!(partition = %id, replaced, rows = records.len(), "partition tail replaced");
        Ok(records.len())
    }

    /// Delete a partition. Returns whether a file was removed.
    pub fn remove(&self, id: &PartitionId) -> Result<bool, StorageError> {
        let path = self.path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Instruments with a partition for this adjustment/period, sorted.
    pub fn list_partitions(
        &self,
        adjustment: AdjustmentType,
        period: Period,
    ) -> Result<Vec<Instrument>, StorageError> {
        let dir = self.root.join(adjustment.as_str()).join(period.as_str());
        let mut out = Vec::new();
        for path in list_dir(&dir)? {
            if path.extension().and_then(|e| e.to_str()) != Some("csv") || !path.is_file() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match Instrument::from_stored(stem) {
                Ok(instrument) => out.push(instrument),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unrecognised file"),
            }
        }
        out.sort();
        Ok(out)
    }

    /// Period directories present under an adjustment type.
    pub fn list_periods(&self, adjustment: AdjustmentType) -> Result<Vec<Period>, StorageError> {
        let dir = self.root.join(adjustment.as_str());
        let mut periods: Vec<Period> = list_dir(&dir)?
            .into_iter()
            .filter(|p| p.is_dir())
            .filter_map(|p| p.file_name()?.to_str()?.parse().ok())
            .collect();
        periods.sort();
        Ok(periods)
    }

    /// Every instrument stored under any period of the given adjustment
    /// types, restricted to `kinds` unless it is empty.
    pub fn discover(
        &self,
        adjustments: &[AdjustmentType],
        kinds: &[MarketKind],
    ) -> Result<Vec<Instrument>, StorageError> {
        let mut found = BTreeSet::new();
        for &adjustment in adjustments {
            for period in self.list_periods(adjustment)? {
                for instrument in self.list_partitions(adjustment, period)? {
                    if kinds.is_empty() || kinds.contains(&instrument.kind()) {
                        found.insert(instrument);
                    }
                }
            }
        }
        Ok(found.into_iter().collect())
    }

    pub fn statistics(&self) -> Result<StoreStatistics, StorageError> {
        let mut stats = StoreStatistics::default();
        let mut codes = BTreeSet::new();

        for adjustment in AdjustmentType::ALL {
            for period in self.list_periods(adjustment)? {
                let id_dir = self.root.join(adjustment.as_str()).join(period.as_str());
                for instrument in self.list_partitions(adjustment, period)? {
                    let path = id_dir.join(format!("{}.csv", instrument.code()));
                    let meta = fs::metadata(&path).map_err(io_err(&path))?;
                    stats.partitions += 1;
                    stats.total_bytes += meta.len();
                    *stats.by_series.entry((adjustment, period)).or_default() += 1;
                    if let Ok(modified) = meta.modified() {
                        let modified = DateTime::<Local>::from(modified);
                        if stats.last_modified.map_or(true, |m| modified > m) {
                            stats.last_modified = Some(modified);
                        }
                    }
                    codes.insert(instrument.code().to_string());
                }
            }
        }
        stats.instruments = codes.len();
        Ok(stats)
    }
}

// ── File helpers ────────────────────────────────────────────────────

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("csv.tmp")
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir)(e)),
    };
    entries
        .map(|entry| entry.map(|e| e.path()).map_err(io_err(dir)))
        .collect()
}

fn ends_with_newline(path: &Path) -> Result<bool, StorageError> {
    let mut file = fs::File::open(path).map_err(io_err(path))?;
    let len = file.metadata().map_err(io_err(path))?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1)).map_err(io_err(path))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).map_err(io_err(path))?;
    Ok(last[0] == b'\n')
}

fn check_increasing(id: &PartitionId, records: &[Record]) -> Result<(), StorageError> {
    match records.windows(2).find(|w| w[1].time <= w[0].time) {
        Some(w) => Err(StorageError::OrderViolation {
            partition: id.to_string(),
            reason: format!("{} does not follow {}", w[1].time, w[0].time),
        }),
        None => Ok(()),
    }
}

fn write_rows<W: Write>(
    writer: &mut csv::Writer<W>,
    period: Period,
    records: &[Record],
    path: &Path,
) -> Result<(), StorageError> {
    let fmt = period.time_format();
    for r in records {
        writer
            .write_record([
                r.time.format(fmt).to_string(),
                r.open.to_string(),
                r.high.to_string(),
                r.low.to_string(),
                r.close.to_string(),
                r.volume.to_string(),
                r.turnover.to_string(),
                r.turnover_rate.to_string(),
            ])
            .map_err(csv_err(path))?;
    }
    Ok(())
}

fn finish<W: Write>(writer: csv::Writer<W>, path: &Path) -> Result<(), StorageError> {
    let mut inner = writer.into_inner().map_err(|e| StorageError::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::Other, e.to_string()),
    })?;
    inner.flush().map_err(io_err(path))
}

fn read_partition(path: &Path) -> Result<Vec<Record>, StorageError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(csv_err(path))?;

    let mut records: Vec<Record> = Vec::new();
    for row in reader.records() {
        let row = row.map_err(csv_err(path))?;
        let line = row.position().map_or(0, |p| p.line());
        let corrupt = |reason: String| StorageError::Corrupt {
            path: path.to_path_buf(),
            line,
            reason,
        };
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let cell = |i: usize| row.get(i).unwrap_or("");
        let number = |i: usize| parse_number(HEADER[i], cell(i));
        let record = (|| {
            Ok::<_, crate::domain::RecordError>(Record {
                time: parse_time(cell(0))?,
                open: number(1)?,
                high: number(2)?,
                low: number(3)?,
                close: number(4)?,
                volume: number(5)?,
                turnover: number(6)?,
                turnover_rate: number(7)?,
            })
        })()
        .map_err(|e| corrupt(e.to_string()))?;

        if let Some(prev) = records.last() {
            if record.time <= prev.time {
                return Err(corrupt(format!(
                    "time {} does not follow {}",
                    record.time, prev.time
                )));
            }
        }
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn bar(d: u32, close: f64) -> Record {
        Record::daily(day(d), close, close + 1.0, close - 1.0, close, 1000.0)
    }

    fn store() -> (TempDir, PartitionStore) {
        let dir = TempDir::new().unwrap();
        let store = PartitionStore::new(dir.path());
        (dir, store)
    }

    fn sh() -> Instrument {
        Instrument::parse("sh.000001").unwrap()
    }

    #[test]
    fn partition_id_is_deterministic() {
        let (_dir, store) = store();
        let a = store.partition_id(AdjustmentType::Forward, Period::Day, &sh());
        let b = store.partition_id(AdjustmentType::Forward, Period::Day, &sh());
        assert_eq!(a, b);
        assert_eq!(store.path(&a), store.path(&b));
        assert!(store.path(&a).ends_with("qfq/day/sh.000001.csv"));
        assert_eq!(a.to_string(), "qfq/day/sh.000001");
    }

    #[test]
    fn missing_partition_reads_empty() {
        let (_dir, store) = store();
        let id = store.partition_id(AdjustmentType::Forward, Period::Day, &sh());
        assert!(store.read(&id).unwrap().is_empty());
        assert!(!store.has_records(&id).unwrap());
        assert!(!store.remove(&id).unwrap());
    }

    #[test]
    fn write_then_read() {
        let (_dir, store) = store();
        let id = store.partition_id(AdjustmentType::Forward, Period::Day, &sh());
        let bars = vec![bar(2, 10.0), bar(3, 10.5)];
        store.write(&id, &bars).unwrap();
        assert_eq!(store.read(&id).unwrap(), bars);

        let text = fs::read_to_string(store.path(&id)).unwrap();
        assert!(text.starts_with("time,open,high,low,close,volume,turnover,turnrate\n"));
        assert!(text.contains("\n2024-01-02,10,11,9,10,1000,0,0\n"));
    }

    #[test]
    fn intraday_time_includes_minutes() {
        let (_dir, store) = store();
        let id = store.partition_id(AdjustmentType::Unadjusted, Period::Min5, &sh());
        let mut r = bar(2, 10.0);
        r.time = day(2).and_hms_opt(9, 35, 0).unwrap();
        store.write(&id, &[r.clone()]).unwrap();
        let text = fs::read_to_string(store.path(&id)).unwrap();
        assert!(text.contains("2024-01-02 09:35,"));
        assert_eq!(store.read(&id).unwrap(), vec![r]);
    }

    #[test]
    fn append_extends_and_rejects_overlap() {
        let (_dir, store) = store();
        let id = store.partition_id(AdjustmentType::Forward, Period::Day, &sh());
        store.write(&id, &[bar(2, 1.0), bar(3, 2.0)]).unwrap();

        assert_eq!(store.append(&id, &[bar(4, 3.0), bar(5, 4.0)]).unwrap(), 2);
        assert_eq!(store.read(&id).unwrap().len(), 4);

        let err = store.append(&id, &[bar(5, 9.0)]).unwrap_err();
        assert!(err.is_validation());
        let err = store.append(&id, &[bar(7, 9.0), bar(6, 9.0)]).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.read(&id).unwrap().len(), 4);
    }

    #[test]
    fn append_creates_missing_partition() {
        let (_dir, store) = store();
        let id = store.partition_id(AdjustmentType::Forward, Period::Week, &sh());
        store.append(&id, &[bar(5, 1.0)]).unwrap();
        assert_eq!(store.read(&id).unwrap().len(), 1);
    }

    #[test]
    fn append_repairs_missing_trailing_newline() {
        let (_dir, store) = store();
        let id = store.partition_id(AdjustmentType::Forward, Period::Day, &sh());
        let path = store.path(&id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "time,open,high,low,close,volume,turnover,turnrate\n2024-01-02,1,1,1,1,1,0,0").unwrap();
        store.append(&id, &[bar(3, 2.0)]).unwrap();
        assert_eq!(store.read(&id).unwrap().len(), 2);
    }

    #[test]
    fn append_to_zero_byte_partition_writes_header() {
        let (_dir, store) = store();
        let id = store.partition_id(AdjustmentType::Forward, Period::Day, &sh());
        let path = store.path(&id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "").unwrap();

        assert_eq!(store.append(&id, &[bar(2, 1.0), bar(3, 2.0)]).unwrap(), 2);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("time,open,high,low,close,volume,turnover,turnrate\n"));
        assert_eq!(store.read(&id).unwrap(), vec![bar(2, 1.0), bar(3, 2.0)]);
    }

    #[test]
    fn replace_tail_swaps_only_the_forming_rows() {
        let (_dir, store) = store();
        let id = store.partition_id(AdjustmentType::Forward, Period::Week, &sh());
        store.write(&id, &[bar(5, 1.0), bar(10, 2.0)]).unwrap();

        let from = day(8).and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(store.replace_tail(&id, from, &[bar(12, 3.0), bar(19, 4.0)]).unwrap(), 2);
        assert_eq!(
            store.read(&id).unwrap(),
            vec![bar(5, 1.0), bar(12, 3.0), bar(19, 4.0)]
        );

        let err = store.replace_tail(&id, from, &[bar(5, 9.0)]).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.read(&id).unwrap().len(), 3);
    }

    #[test]
    fn no_tmp_files_left_behind() {
        let (_dir, store) = store();
        let id = store.partition_id(AdjustmentType::Forward, Period::Day, &sh());
        store.write(&id, &[bar(2, 1.0)]).unwrap();
        store.append(&id, &[bar(3, 1.0)]).unwrap();
        let _ = store.append(&id, &[bar(1, 1.0)]);
        let dir = store.path(&id).parent().unwrap().to_path_buf();
        let names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["sh.000001.csv".to_string()]);
    }

    #[test]
    fn adjustment_types_are_isolated() {
        let (_dir, store) = store();
        let qfq = store.partition_id(AdjustmentType::Forward, Period::Day, &sh());
        let hfq = store.partition_id(AdjustmentType::Backward, Period::Day, &sh());
        store.write(&hfq, &[bar(2, 50.0)]).unwrap();
        let before = fs::read(store.path(&hfq)).unwrap();

        store.write(&qfq, &[bar(2, 1.0), bar(3, 2.0)]).unwrap();
        store.append(&qfq, &[bar(4, 3.0)]).unwrap();
        store.remove(&qfq).unwrap();

        assert_eq!(fs::read(store.path(&hfq)).unwrap(), before);
    }

    #[test]
    fn corrupt_rows_are_reported_with_line() {
        let (_dir, store) = store();
        let id = store.partition_id(AdjustmentType::Forward, Period::Day, &sh());
        let path = store.path(&id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            "time,open,high,low,close,volume,turnover,turnrate\n\
             2024-01-03,1,1,1,1,1,0,0\n\
             2024-01-02,1,1,1,1,1,0,0\n",
        )
        .unwrap();
        match store.read(&id) {
            Err(StorageError::Corrupt { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected Corrupt, got {other:?}"),
        }

        fs::write(&path, "time,open\nnot-a-date,1\n").unwrap();
        assert!(matches!(store.read(&id), Err(StorageError::Corrupt { .. })));
    }

    #[test]
    fn read_range_is_inclusive() {
        let (_dir, store) = store();
        let id = store.partition_id(AdjustmentType::Forward, Period::Day, &sh());
        store
            .write(&id, &[bar(2, 1.0), bar(3, 1.0), bar(4, 1.0), bar(5, 1.0)])
            .unwrap();
        let got = store.read_range(&id, day(3), day(4)).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].date(), day(3));
    }

    #[test]
    fn discovery_and_statistics() {
        let (_dir, store) = store();
        let index = sh();
        let stock = Instrument::parse("sh.600000").unwrap();
        let fund = Instrument::parse("sh.510300").unwrap();
        for (adj, period, inst) in [
            (AdjustmentType::Forward, Period::Day, &index),
            (AdjustmentType::Forward, Period::Week, &stock),
            (AdjustmentType::Backward, Period::Day, &fund),
        ] {
            let id = store.partition_id(adj, period, inst);
            store.write(&id, &[bar(2, 1.0)]).unwrap();
        }
        fs::write(store.root().join("qfq/day/notes.txt"), "ignored").unwrap();

        assert_eq!(
            store.list_partitions(AdjustmentType::Forward, Period::Day).unwrap(),
            vec![index.clone()]
        );
        assert_eq!(
            store.list_periods(AdjustmentType::Forward).unwrap(),
            vec![Period::Day, Period::Week]
        );
        assert_eq!(
            store.discover(&[AdjustmentType::Forward], &[]).unwrap(),
            vec![index.clone(), stock.clone()]
        );
        assert_eq!(
            store
                .discover(&AdjustmentType::ALL, &[MarketKind::Fund])
                .unwrap(),
            vec![fund]
        );

        let stats = store.statistics().unwrap();
        assert_eq!(stats.partitions, 3);
        assert_eq!(stats.instruments, 3);
        assert!(stats.total_bytes > 0);
        assert!(stats.last_modified.is_some());
        assert_eq!(
            stats.adjustments(),
            vec![AdjustmentType::Forward, AdjustmentType::Backward]
        );
    }

    proptest! {
        #[test]
        fn appended_store_stays_strictly_increasing(
            batches in prop::collection::vec(prop::collection::vec(1u32..=28, 0..6), 1..5)
        ) {
            let (_dir, store) = store();
            let id = store.partition_id(AdjustmentType::Forward, Period::Day, &sh());
            for batch in batches {
                let records: Vec<Record> = batch.iter().map(|&d| bar(d, d as f64)).collect();
                let _ = store.append(&id, &records);
                let stored = store.read(&id).unwrap();
                prop_assert!(stored.windows(2).all(|w| w[0].time < w[1].time));
            }
        }
    }
}
