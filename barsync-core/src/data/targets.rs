//! Target set resolution: explicit codes, a code-list file, the stored
//! universe, or the provider's universe.
//!
//! Resolution runs once per run and yields an immutable instrument list.

use super::retry::Fetcher;
use super::storage::PartitionStore;
use crate::config::ConfigError;
use crate::domain::{AdjustmentType, Instrument, MarketKind, MAJOR_INDICES};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Codes(Vec<String>),
    /// One code per line; blank lines and `#` comments are ignored.
    File(PathBuf),
    /// Everything already stored under the run's adjustment types,
    /// restricted to `kinds` unless empty.
    Discover { kinds: Vec<MarketKind> },
    /// Every instrument the provider lists, restricted to `kinds` unless
    /// empty. Used to seed a store from nothing.
    Universe { kinds: Vec<MarketKind> },
}

impl TargetSpec {
    /// Resolve to a deduplicated instrument list, first occurrence first.
    pub fn resolve(
        &self,
        store: &PartitionStore,
        fetcher: &Fetcher,
        adjustments: &[AdjustmentType],
        include_indices: bool,
    ) -> Result<Vec<Instrument>, ConfigError> {
        let mut instruments = match self {
            TargetSpec::Codes(codes) => parse_codes(codes.iter().map(String::as_str))?,
            TargetSpec::File(path) => read_code_file(path)?,
            TargetSpec::Discover { kinds } => store.discover(adjustments, kinds)?,
            TargetSpec::Universe { kinds } => {
                let listed = fetcher.list_instruments(kinds).result?;
                tracing::info!(source = fetcher.source_name(), listed = listed.len(), "upstream universe listed");
                listed
            }
        };
        if include_indices {
            instruments.extend(parse_codes(MAJOR_INDICES.into_iter())?);
        }

        let mut unique: Vec<Instrument> = Vec::with_capacity(instruments.len());
        for instrument in instruments {
            if !unique.contains(&instrument) {
                unique.push(instrument);
            }
        }
        Ok(unique)
    }
}

fn parse_codes<'a>(codes: impl Iterator<Item = &'a str>) -> Result<Vec<Instrument>, ConfigError> {
    codes
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|code| {
            Instrument::parse(code).map_err(|source| ConfigError::InvalidCode {
                code: code.to_string(),
                source,
            })
        })
        .collect()
}

/// Read a code-list file.
pub fn read_code_file(path: &Path) -> Result<Vec<Instrument>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_codes(
        content
            .lines()
            .map(|line| line.split('#').next().unwrap_or(""))
            .flat_map(|line| line.split([',', ' ', '\t'])),
    )
}
