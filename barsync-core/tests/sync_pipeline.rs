//! End-to-end runs of the orchestrator against a scripted upstream and a
//! temporary store.

use barsync_core::data::{
    CancelToken, DateRange, FailureReason, FetchError, FetchRequest, NoProgress, RunControl,
    RunStatistics, SourceAdapter, Strategy, SyncOrchestrator, SyncPlan, SyncProgress, TargetReport,
    TargetSpec,
};
use barsync_core::domain::{AdjustmentType, Instrument, Period, Record, Target};
use barsync_core::SyncConfig;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn jan(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

fn bar(date: NaiveDate) -> Record {
    Record::daily(date, 10.0, 11.0, 9.0, 10.5, 1_000.0)
}

/// Upstream that serves January 2024 daily bars and can be told to fail.
struct Upstream {
    days: Mutex<Vec<u32>>,
    always_fail: Mutex<Option<FetchError>>,
    ignore_range: AtomicBool,
    requests: Mutex<Vec<FetchRequest>>,
}

impl Upstream {
    fn with_days(days: &[u32]) -> Arc<Self> {
        Arc::new(Self {
            days: Mutex::new(days.to_vec()),
            always_fail: Mutex::new(None),
            ignore_range: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn set_days(&self, days: &[u32]) {
        *self.days.lock().unwrap() = days.to_vec();
    }

    fn fail_always(&self, error: FetchError) {
        *self.always_fail.lock().unwrap() = Some(error);
    }

    /// Serve every bar whatever range is requested.
    fn ignore_range(&self) {
        self.ignore_range.store(true, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl SourceAdapter for Upstream {
    fn name(&self) -> &str {
        "upstream"
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(err) = self.always_fail.lock().unwrap().clone() {
            return Err(err);
        }
        let unfiltered = self.ignore_range.load(Ordering::SeqCst);
        Ok(self
            .days
            .lock()
            .unwrap()
            .iter()
            .map(|&d| jan(d))
            .filter(|&date| unfiltered || request.range.contains(date))
            .map(bar)
            .collect())
    }
}

fn config(root: &std::path::Path) -> SyncConfig {
    let mut config = SyncConfig {
        store_root: root.to_path_buf(),
        start_date: jan(1),
        periods: vec![Period::Day],
        adjustments: vec![AdjustmentType::Forward],
        pacing_ms: 0,
        ..SyncConfig::default()
    };
    config.retry.delay_ms = 0;
    config.retry.max_delay_ms = 0;
    config
}

fn orchestrator(dir: &TempDir, upstream: &Arc<Upstream>, today: NaiveDate) -> SyncOrchestrator {
    let source: Arc<dyn SourceAdapter> = upstream.clone();
    SyncOrchestrator::new(&config(dir.path()), source).with_today(today)
}

fn plan(codes: &[&str], strategy: Strategy) -> SyncPlan {
    SyncPlan {
        targets: TargetSpec::Codes(codes.iter().map(|c| c.to_string()).collect()),
        include_indices: false,
        periods: vec![Period::Day],
        adjustments: vec![AdjustmentType::Forward],
        strategy,
    }
}

fn download(start: u32, end: u32) -> Strategy {
    Strategy::Download {
        range: DateRange::new(jan(start), jan(end)),
        force: false,
    }
}

const UPDATE: Strategy = Strategy::Update { force_full: false };

fn partition_path(orch: &SyncOrchestrator, adjustment: AdjustmentType, code: &str) -> std::path::PathBuf {
    let store = orch.store();
    let instrument = Instrument::parse(code).unwrap();
    store.path(&store.partition_id(adjustment, Period::Day, &instrument))
}

fn stored_dates(orch: &SyncOrchestrator, code: &str) -> Vec<NaiveDate> {
    let store = orch.store();
    let instrument = Instrument::parse(code).unwrap();
    let id = store.partition_id(AdjustmentType::Forward, Period::Day, &instrument);
    store.read(&id).unwrap().iter().map(Record::date).collect()
}

#[test]
fn download_then_update_appends_only_new_rows() {
    let dir = TempDir::new().unwrap();
    let upstream = Upstream::with_days(&[2, 3, 4, 5]);
    let orch = orchestrator(&dir, &upstream, jan(5));

    let stats = orch
        .run(&plan(&["sh.000001"], download(1, 5)), &RunControl::default())
        .unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.new_records, 4);
    assert_eq!(stored_dates(&orch, "sh.000001"), vec![jan(2), jan(3), jan(4), jan(5)]);

    let path = partition_path(&orch, AdjustmentType::Forward, "sh.000001");
    let before = std::fs::read_to_string(&path).unwrap();

    upstream.set_days(&[2, 3, 4, 5, 6, 7, 8]);
    let orch = orchestrator(&dir, &upstream, jan(8));
    let stats = orch.run(&plan(&["sh.000001"], UPDATE), &RunControl::default()).unwrap();
    assert_eq!(stats.new_records, 3);
    assert_eq!(stats.failed, 0);

    let after = std::fs::read_to_string(&path).unwrap();
    assert!(after.starts_with(&before), "existing rows must be untouched");
    assert_eq!(after.lines().count(), before.lines().count() + 3);
    assert_eq!(
        stored_dates(&orch, "sh.000001"),
        (2..=8).map(jan).collect::<Vec<_>>()
    );
}

#[test]
fn repeated_update_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let upstream = Upstream::with_days(&[2, 3, 4, 5]);
    let orch = orchestrator(&dir, &upstream, jan(5));
    orch.run(&plan(&["sh.600000"], UPDATE), &RunControl::default()).unwrap();

    let path = partition_path(&orch, AdjustmentType::Forward, "sh.600000");
    let first = std::fs::read(&path).unwrap();

    let stats = orch.run(&plan(&["sh.600000"], UPDATE), &RunControl::default()).unwrap();
    assert_eq!(stats.new_records, 0);
    assert_eq!(stats.up_to_date, 1);
    assert_eq!(std::fs::read(&path).unwrap(), first);
}

#[test]
fn update_leaves_other_adjustments_alone() {
    let dir = TempDir::new().unwrap();
    let upstream = Upstream::with_days(&[2, 3]);
    let orch = orchestrator(&dir, &upstream, jan(3));

    let store = orch.store();
    let sh = Instrument::parse("sh.600000").unwrap();
    let hfq = store.partition_id(AdjustmentType::Backward, Period::Day, &sh);
    store.write(&hfq, &[bar(jan(2))]).unwrap();
    let hfq_path = store.path(&hfq);
    let hfq_before = std::fs::read(&hfq_path).unwrap();

    orch.run(&plan(&["sh.600000"], UPDATE), &RunControl::default()).unwrap();

    assert_eq!(std::fs::read(&hfq_path).unwrap(), hfq_before);
    assert_eq!(stored_dates(&orch, "sh.600000"), vec![jan(2), jan(3)]);
}

#[test]
fn empty_bootstrap_creates_no_partition() {
    let dir = TempDir::new().unwrap();
    let upstream = Upstream::with_days(&[]);
    let orch = orchestrator(&dir, &upstream, jan(5));

    let stats = orch.run(&plan(&["sz.000001"], UPDATE), &RunControl::default()).unwrap();
    assert_eq!(stats.empty, 1);
    assert_eq!(stats.failed, 0);
    assert!(!partition_path(&orch, AdjustmentType::Forward, "sz.000001").exists());
}

#[test]
fn boundary_record_is_not_duplicated() {
    let dir = TempDir::new().unwrap();
    let upstream = Upstream::with_days(&[2, 3]);
    let orch = orchestrator(&dir, &upstream, jan(3));
    orch.run(&plan(&["sh.600000"], UPDATE), &RunControl::default()).unwrap();

    // Upstream re-sends the cursor date and older rows alongside the new one.
    upstream.set_days(&[2, 3, 4]);
    upstream.ignore_range();
    let orch = orchestrator(&dir, &upstream, jan(4));
    let stats = orch.run(&plan(&["sh.600000"], UPDATE), &RunControl::default()).unwrap();

    assert_eq!(stats.new_records, 1);
    assert_eq!(stats.dropped_overlap, 2);
    assert_eq!(stored_dates(&orch, "sh.600000"), vec![jan(2), jan(3), jan(4)]);
}

#[test]
fn transient_failures_stop_after_three_attempts() {
    let dir = TempDir::new().unwrap();
    let upstream = Upstream::with_days(&[2]);
    upstream.fail_always(FetchError::Timeout("read timed out".into()));
    let orch = orchestrator(&dir, &upstream, jan(5));

    let stats = orch
        .run(&plan(&["sh.600000"], download(1, 5)), &RunControl::default())
        .unwrap();
    assert_eq!(upstream.calls(), 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.upstream_attempts, 3);
    assert!(matches!(
        stats.failures[0].reason,
        FailureReason::FatalAfterRetries { attempts: 3, .. }
    ));
}

#[test]
fn fatal_failure_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let upstream = Upstream::with_days(&[2]);
    upstream.fail_always(FetchError::UnknownInstrument {
        code: "sh.600000".into(),
    });
    let orch = orchestrator(&dir, &upstream, jan(5));

    let stats = orch
        .run(&plan(&["sh.600000", "sz.000001"], download(1, 5)), &RunControl::default())
        .unwrap();
    // One call per target, and the batch keeps going after the first failure.
    assert_eq!(upstream.calls(), 2);
    assert_eq!(stats.attempted, 2);
    assert_eq!(stats.failed, 2);
    assert!(matches!(stats.failures[0].reason, FailureReason::FatalUpstream(_)));
}

/// Cancels the run once the first target completes.
struct CancelAfterFirst {
    token: CancelToken,
    completed: Mutex<Vec<Target>>,
}

impl SyncProgress for CancelAfterFirst {
    fn on_start(&self, _: &Target, _: usize, _: usize) {}

    fn on_complete(&self, report: &TargetReport, _: usize, _: usize) {
        self.completed.lock().unwrap().push(report.target.clone());
        self.token.cancel();
    }

    fn on_batch_complete(&self, _: &RunStatistics) {}
}

#[test]
fn cancellation_stops_between_targets() {
    let dir = TempDir::new().unwrap();
    let upstream = Upstream::with_days(&[2, 3]);
    let orch = orchestrator(&dir, &upstream, jan(3));

    let token = CancelToken::new();
    let progress = CancelAfterFirst {
        token: token.clone(),
        completed: Mutex::new(Vec::new()),
    };
    let control = RunControl {
        progress: &progress,
        cancel: token,
    };
    let stats = orch
        .run(&plan(&["sh.600000", "sh.600001", "sh.600002"], UPDATE), &control)
        .unwrap();

    assert!(stats.cancelled);
    assert_eq!(stats.attempted, 1);
    assert_eq!(progress.completed.lock().unwrap().len(), 1);
    assert!(!partition_path(&orch, AdjustmentType::Forward, "sh.600001").exists());
}

#[test]
fn unreadable_code_file_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let upstream = Upstream::with_days(&[2]);
    let orch = orchestrator(&dir, &upstream, jan(5));

    let plan = SyncPlan {
        targets: TargetSpec::File(dir.path().join("missing-codes.txt")),
        ..plan(&[], UPDATE)
    };
    assert!(orch.run(&plan, &RunControl::default()).is_err());
    assert_eq!(upstream.calls(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn download_skips_existing_partitions_unless_forced() {
    let dir = TempDir::new().unwrap();
    let upstream = Upstream::with_days(&[2, 3]);
    let orch = orchestrator(&dir, &upstream, jan(5));
    orch.run(&plan(&["sh.600000"], download(1, 5)), &RunControl::default())
        .unwrap();
    assert_eq!(upstream.calls(), 1);

    upstream.set_days(&[2, 3, 4]);
    let stats = orch
        .run(&plan(&["sh.600000"], download(1, 5)), &RunControl::default())
        .unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(upstream.calls(), 1);

    let forced = Strategy::Download {
        range: DateRange::new(jan(1), jan(5)),
        force: true,
    };
    let stats = orch
        .run(&plan(&["sh.600000"], forced), &RunControl { progress: &NoProgress, cancel: CancelToken::new() })
        .unwrap();
    assert_eq!(stats.new_records, 3);
    assert_eq!(stored_dates(&orch, "sh.600000"), vec![jan(2), jan(3), jan(4)]);
}

#[test]
fn inverted_download_range_is_rejected() {
    let dir = TempDir::new().unwrap();
    let upstream = Upstream::with_days(&[2]);
    let orch = orchestrator(&dir, &upstream, jan(5));
    let err = orch
        .run(&plan(&["sh.600000"], download(5, 1)), &RunControl::default())
        .unwrap_err();
    assert!(err.to_string().contains("start date after end date"));
    assert_eq!(upstream.calls(), 0);
}

#[test]
fn future_start_date_is_rejected_once() {
    let dir = TempDir::new().unwrap();
    let upstream = Upstream::with_days(&[2]);
    let mut config = config(dir.path());
    config.start_date = jan(20);
    let source: Arc<dyn SourceAdapter> = upstream.clone();
    let orch = SyncOrchestrator::new(&config, source).with_today(jan(5));

    for strategy in [UPDATE, Strategy::Repair { window_days: 30 }] {
        let err = orch
            .run(&plan(&["sh.600000", "sz.000001"], strategy), &RunControl::default())
            .unwrap_err();
        assert!(err.to_string().contains("is after today"));
    }
    assert_eq!(upstream.calls(), 0);
}
