//! barsync core: incremental synchronizer for partitioned market bars.
//!
//! This crate holds everything except the command line:
//! - Domain types (instruments, periods, adjustment types, bar records)
//! - Source adapters behind a classified-failure contract
//! - Bounded retry with pacing and a provider circuit breaker
//! - The partitioned CSV store and cursor resolution
//! - Download, update and repair engines and the sequential orchestrator

pub mod config;
pub mod data;
pub mod domain;

pub use config::{ConfigError, SyncConfig};
