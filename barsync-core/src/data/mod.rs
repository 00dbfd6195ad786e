//! Acquisition and storage: source adapters, retry, partition store,
//! cursor resolution and the download/update/repair engines.

pub mod circuit_breaker;
pub mod cursor;
pub mod download;
pub mod eastmoney;
pub mod mirror;
pub mod provider;
pub mod repair;
pub mod retry;
pub mod stats;
pub mod storage;
pub mod sync;
pub mod targets;
pub mod update;
pub mod validate;

pub use circuit_breaker::CircuitBreaker;
pub use cursor::{Cursor, CursorResolver};
pub use download::Downloader;
pub use eastmoney::EastmoneySource;
pub use mirror::MirrorSource;
pub use provider::{DateRange, FailureClass, FetchError, FetchRequest, SourceAdapter};
pub use repair::Repairer;
pub use retry::{AttemptRecord, Fetcher, Pacer, RetryError, RetryPolicy, Retried};
pub use stats::{FailureReason, RunStatistics, TargetFailure, TargetOutcome, TargetReport};
pub use storage::{PartitionId, PartitionStore, StorageError, StoreStatistics};
pub use sync::{CancelToken, NoProgress, RunControl, Strategy, SyncOrchestrator, SyncPlan, SyncProgress};
pub use targets::TargetSpec;
pub use update::Updater;
pub use validate::{sanitize, Sanitized};
