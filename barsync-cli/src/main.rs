//! barsync CLI: download, update, repair and store inspection.
//!
//! Commands:
//! - `download`: full acquisition; existing partitions are skipped unless `--force`
//! - `update`: incremental acquisition from each partition's last row
//! - `repair`: re-check the trailing window and rebuild incomplete partitions
//! - `store status`: partition count, size and series present
//!
//! Per-target failures are reported but do not change the exit code; only
//! configuration problems (bad flags, unreadable files, a held lock) do.
//! Ctrl-C stops a run after the current target; a second Ctrl-C exits at once.

use anyhow::{bail, Context, Result};
use barsync_core::data::{
    CancelToken, CircuitBreaker, DateRange, EastmoneySource, MirrorSource, PartitionStore,
    RunControl, RunStatistics, SourceAdapter, Strategy, SyncOrchestrator, SyncPlan, SyncProgress,
    TargetOutcome, TargetReport, TargetSpec,
};
use barsync_core::domain::{parse_list, AdjustmentType, MarketKind, Period, Target};
use barsync_core::SyncConfig;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOCK_FILE: &str = ".barsync.lock";

#[derive(Parser)]
#[command(name = "barsync", version, about = "Incremental market-bar synchronizer")]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store root, overriding the config file.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full download of the selected series.
    Download {
        #[command(flatten)]
        targets: TargetArgs,

        /// First date (YYYY-MM-DD). Defaults to the configured start date.
        #[arg(long)]
        start: Option<String>,

        /// Last date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Re-download partitions that already hold data.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Append new bars after each partition's last row.
    Update {
        #[command(flatten)]
        targets: TargetArgs,

        /// Bootstrap start date for partitions with no data (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// Refetch everything and replace each partition.
        #[arg(long, default_value_t = false)]
        force_full: bool,
    },
    /// Compare the trailing window with upstream and rebuild on mismatch.
    Repair {
        #[command(flatten)]
        targets: TargetArgs,

        /// Length of the checked window in days.
        #[arg(long)]
        window_days: Option<u32>,
    },
    /// Store inspection commands.
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// Report partition count, size and series present.
    Status,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Selection {
    /// Comma-separated instrument codes (e.g. sh.600000,000001).
    #[arg(long)]
    codes: Option<String>,

    /// File with one code per line; `#` starts a comment.
    #[arg(long)]
    codes_file: Option<PathBuf>,

    /// Every instrument: the provider's listing for `download`, the
    /// store's contents otherwise.
    #[arg(long)]
    all: bool,
}

#[derive(Args)]
struct TargetArgs {
    #[command(flatten)]
    selection: Selection,

    /// With --all, restrict to these market kinds (equity,index,fund,bond).
    #[arg(long, requires = "all")]
    kinds: Option<String>,

    /// Add the major index list to the targets.
    #[arg(long, default_value_t = false)]
    include_index: bool,

    /// Periods, e.g. day,week,mon,5m. Defaults to the config.
    #[arg(long)]
    periods: Option<String>,

    /// Adjustment types: qfq, hfq, none. Defaults to the config.
    #[arg(long)]
    adjust: Option<String>,

    /// Minimum spacing between upstream requests, in milliseconds.
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Read bars from another local store instead of the network.
    #[arg(long)]
    mirror: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut config = match &cli.config {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::default(),
    };
    if let Some(root) = cli.root {
        config.store_root = root;
    }

    match cli.command {
        Commands::Download {
            targets,
            start,
            end,
            force,
        } => {
            let start = parse_date(start.as_deref())?.unwrap_or(config.start_date);
            let end = parse_date(end.as_deref())?.unwrap_or_else(today);
            run_sync(
                config,
                &targets,
                Strategy::Download {
                    range: DateRange::new(start, end),
                    force,
                },
            )
        }
        Commands::Update {
            targets,
            start,
            force_full,
        } => {
            if let Some(start) = parse_date(start.as_deref())? {
                config.start_date = start;
            }
            run_sync(config, &targets, Strategy::Update { force_full })
        }
        Commands::Repair {
            targets,
            window_days,
        } => {
            let window_days = window_days.unwrap_or(config.repair_window_days);
            run_sync(config, &targets, Strategy::Repair { window_days })
        }
        Commands::Store { action } => match action {
            StoreAction::Status => run_store_status(&config.store_root),
        },
    }
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("barsync_core={level},barsync={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    raw.map(|s| {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
    })
    .transpose()
}

impl TargetArgs {
    /// `upstream` makes `--all` list the provider instead of the store.
    fn spec(&self, upstream: bool) -> Result<TargetSpec> {
        let sel = &self.selection;
        if let Some(codes) = &sel.codes {
            return Ok(TargetSpec::Codes(
                codes.split(',').map(|c| c.trim().to_string()).collect(),
            ));
        }
        if let Some(path) = &sel.codes_file {
            return Ok(TargetSpec::File(path.clone()));
        }
        if sel.all {
            let kinds = match &self.kinds {
                Some(list) => list
                    .split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(|k| k.parse::<MarketKind>())
                    .collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
            };
            return Ok(if upstream {
                TargetSpec::Universe { kinds }
            } else {
                TargetSpec::Discover { kinds }
            });
        }
        bail!("one of --codes, --codes-file or --all is required")
    }

    fn plan(&self, config: &SyncConfig, strategy: Strategy) -> Result<SyncPlan> {
        let periods: Vec<Period> = match &self.periods {
            Some(list) => parse_list(list)?,
            None => config.periods.clone(),
        };
        let adjustments: Vec<AdjustmentType> = match &self.adjust {
            Some(list) => parse_list(list)?,
            None => config.adjustments.clone(),
        };
        let upstream = matches!(strategy, Strategy::Download { .. });
        Ok(SyncPlan {
            targets: self.spec(upstream)?,
            include_indices: self.include_index,
            periods,
            adjustments,
            strategy,
        })
    }

    fn source(&self, config: &SyncConfig) -> Result<Arc<dyn SourceAdapter>> {
        Ok(match &self.mirror {
            Some(root) => {
                if !root.is_dir() {
                    bail!("mirror store does not exist: {}", root.display());
                }
                Arc::new(MirrorSource::new(root))
            }
            None => Arc::new(EastmoneySource::new(
                &config.source,
                Arc::new(CircuitBreaker::default()),
            )?),
        })
    }
}

fn run_sync(mut config: SyncConfig, targets: &TargetArgs, strategy: Strategy) -> Result<()> {
    if let Some(delay) = targets.delay_ms {
        config.pacing_ms = delay;
    }
    let plan = targets.plan(&config, strategy)?;
    let source = targets.source(&config)?;

    let _lock = StoreLock::acquire(&config.store_root)?;
    let orchestrator = SyncOrchestrator::new(&config, source);
    let progress = StdoutProgress;
    let cancel = CancelToken::new();
    watch_interrupts(cancel.clone())?;
    let control = RunControl {
        progress: &progress,
        cancel,
    };
    let stats = orchestrator.run(&plan, &control)?;
    print_failures(&stats);
    Ok(())
}

/// Cancel `token` on the first Ctrl-C and exit with 130 on the second.
fn watch_interrupts(token: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot start the signal runtime")?;
    std::thread::Builder::new()
        .name("interrupt-watcher".into())
        .spawn(move || {
            runtime.block_on(async {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if repeated_interrupt(&token) {
                        eprintln!("\nAborted.");
                        std::process::exit(130);
                    }
                }
            })
        })
        .context("cannot spawn the interrupt watcher")?;
    Ok(())
}

/// Handle one interrupt. Returns true when the run was already cancelled.
fn repeated_interrupt(token: &CancelToken) -> bool {
    if token.is_cancelled() {
        return true;
    }
    tracing::warn!("interrupted, stopping after the current target (Ctrl-C again to abort)");
    token.cancel();
    false
}

/// Exclusive marker file held for the duration of a run.
struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    fn acquire(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("cannot create store root {}", root.display()))?;
        let path = root.join(LOCK_FILE);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => bail!(
                "store {} is in use by another run (remove {} if no run is active)",
                root.display(),
                path.display()
            ),
            Err(e) => Err(e).with_context(|| format!("cannot create {}", path.display())),
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

struct StdoutProgress;

impl SyncProgress for StdoutProgress {
    fn on_start(&self, target: &Target, index: usize, total: usize) {
        println!("[{}/{}] {target}...", index + 1, total);
    }

    fn on_complete(&self, report: &TargetReport, _index: usize, _total: usize) {
        let series = &report.target;
        match &report.outcome {
            TargetOutcome::Written { records } => println!("  OK: {series}: {records} rows written"),
            TargetOutcome::Appended { records } => println!("  OK: {series}: {records} rows appended"),
            TargetOutcome::UpToDate => println!("  OK: {series}: up to date"),
            TargetOutcome::Empty => println!("  OK: {series}: no upstream data"),
            TargetOutcome::Skipped => println!("  SKIP: {series}: already stored"),
            TargetOutcome::Rebuilt { records } => println!("  OK: {series}: rebuilt, {records} rows"),
            TargetOutcome::Intact => println!("  OK: {series}: intact"),
            TargetOutcome::Failed(reason) => println!("  FAIL: {series}: {reason}"),
        }
        let dropped = report.dropped_invalid + report.dropped_unordered + report.dropped_overlap;
        if dropped > 0 {
            println!("        ({dropped} upstream rows discarded)");
        }
    }

    fn on_batch_complete(&self, stats: &RunStatistics) {
        println!(
            "\nSync complete: {}/{} succeeded, {} failed, {} new rows ({:.1}s)",
            stats.succeeded,
            stats.attempted,
            stats.failed,
            stats.new_records,
            stats.elapsed.as_secs_f64()
        );
        if stats.cancelled {
            println!("Run was cancelled before all targets were processed.");
        }
    }
}

fn print_failures(stats: &RunStatistics) {
    if stats.failures.is_empty() {
        return;
    }
    eprintln!("\nFailed targets:");
    for failure in &stats.failures {
        eprintln!("  {}: {}", failure.target, failure.reason);
    }
}

fn run_store_status(root: &Path) -> Result<()> {
    if !root.exists() {
        println!("Store directory does not exist: {}", root.display());
        return Ok(());
    }
    let stats = PartitionStore::new(root).statistics()?;
    if stats.partitions == 0 {
        println!("Store is empty: {}", root.display());
        return Ok(());
    }

    println!("Store: {}", root.display());
    println!("Instruments: {}", stats.instruments);
    println!("Partitions: {}", stats.partitions);
    println!("Total size: {}", format_size(stats.total_bytes));
    if let Some(modified) = stats.last_modified {
        println!("Last write: {}", modified.format("%Y-%m-%d %H:%M:%S"));
    }
    println!();
    println!("{:<8} {:<8} {:>10}", "Adjust", "Period", "Partitions");
    println!("{}", "-".repeat(28));
    for ((adjustment, period), count) in &stats.by_series {
        println!("{:<8} {:<8} {:>10}", adjustment.as_str(), period.as_str(), count);
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn selection_is_exclusive_and_required() {
        assert!(Cli::try_parse_from(["barsync", "update"]).is_err());
        assert!(Cli::try_parse_from(["barsync", "update", "--all", "--codes", "sh.600000"]).is_err());
        assert!(Cli::try_parse_from(["barsync", "update", "--all"]).is_ok());
    }

    #[test]
    fn download_flags_build_a_plan() {
        let cli = Cli::try_parse_from([
            "barsync",
            "--root",
            "/tmp/bars",
            "download",
            "--codes",
            "sh.000001, 600000",
            "--periods",
            "day,60m",
            "--adjust",
            "hfq",
            "--include-index",
        ])
        .unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/bars")));
        let Commands::Download { targets, .. } = cli.command else {
            panic!("expected download");
        };
        let plan = targets
            .plan(&SyncConfig::default(), Strategy::Update { force_full: false })
            .unwrap();
        assert_eq!(plan.periods, vec![Period::Day, Period::Min60]);
        assert_eq!(plan.adjustments, vec![AdjustmentType::Backward]);
        assert!(plan.include_indices);
        assert_eq!(
            plan.targets,
            TargetSpec::Codes(vec!["sh.000001".into(), "600000".into()])
        );
    }

    #[test]
    fn kinds_parse_for_discovery() {
        let cli = Cli::try_parse_from(["barsync", "repair", "--all", "--kinds", "index,fund"]).unwrap();
        let Commands::Repair { targets, .. } = cli.command else {
            panic!("expected repair");
        };
        assert_eq!(
            targets.spec(false).unwrap(),
            TargetSpec::Discover {
                kinds: vec![MarketKind::Index, MarketKind::Fund]
            }
        );
    }

    #[test]
    fn download_all_lists_the_provider() {
        let cli = Cli::try_parse_from(["barsync", "download", "--all", "--kinds", "equity"]).unwrap();
        let Commands::Download { targets, .. } = cli.command else {
            panic!("expected download");
        };
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
        );
        let plan = targets
            .plan(&SyncConfig::default(), Strategy::Download { range, force: false })
            .unwrap();
        assert_eq!(
            plan.targets,
            TargetSpec::Universe {
                kinds: vec![MarketKind::Equity]
            }
        );

        let plan = targets
            .plan(&SyncConfig::default(), Strategy::Update { force_full: false })
            .unwrap();
        assert_eq!(plan.targets, TargetSpec::Discover { kinds: vec![MarketKind::Equity] });
    }

    #[test]
    fn first_interrupt_cancels_second_aborts() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!repeated_interrupt(&token));
        assert!(observer.is_cancelled());
        assert!(repeated_interrupt(&token));
    }

    #[test]
    fn store_lock_is_exclusive_and_released() {
        let dir = tempfile::TempDir::new().unwrap();
        let lock = StoreLock::acquire(dir.path()).unwrap();
        assert!(StoreLock::acquire(dir.path()).is_err());
        drop(lock);
        assert!(StoreLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn parse_date_rejects_garbage() {
        assert_eq!(
            parse_date(Some("2024-01-02")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2)
        );
        assert!(parse_date(Some("01/02/2024")).is_err());
        assert_eq!(parse_date(None).unwrap(), None);
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
