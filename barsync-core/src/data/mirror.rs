//! Source adapter backed by another on-disk store.
//!
//! Lets a store be seeded or refreshed from a local copy (a shared drive,
//! a snapshot) using the same engines as a network provider.

use super::provider::{FetchError, FetchRequest, SourceAdapter};
use super::storage::{PartitionStore, StorageError};
use crate::domain::{AdjustmentType, Instrument, MarketKind, Record};
use std::path::PathBuf;

pub struct MirrorSource {
    store: PartitionStore,
    name: String,
}

impl MirrorSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let store = PartitionStore::new(root);
        let name = format!("mirror:{}", store.root().display());
        Self { store, name }
    }
}

impl SourceAdapter for MirrorSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        let id = self
            .store
            .partition_id(request.adjustment, request.period, &request.instrument);
        if !self.store.exists(&id) {
            return Err(FetchError::UnknownInstrument {
                code: request.instrument.code().to_string(),
            });
        }
        self.store
            .read_range(&id, request.range.start, request.range.end)
            .map_err(fetch_error)
    }

    /// Every code with a partition under any adjustment type.
    fn list_instruments(&self, kinds: &[MarketKind]) -> Result<Vec<Instrument>, FetchError> {
        self.store
            .discover(&AdjustmentType::ALL, kinds)
            .map_err(fetch_error)
    }
}

fn fetch_error(e: StorageError) -> FetchError {
    match e {
        // A file being swapped or briefly unreadable is worth another try.
        StorageError::Io { .. } => FetchError::Transport(e.to_string()),
        other => FetchError::MalformedPayload(other.to_string()),
    }
}
