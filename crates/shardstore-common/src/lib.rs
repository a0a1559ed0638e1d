//! ShardStore Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, configuration record and
//! identifier types used by the storage engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DEFAULT_SHARD_WIDTH, DEFAULT_SWEEP_INTERVAL_SECS, StoreConfig};
pub use error::{Error, Result};
pub use types::*;
