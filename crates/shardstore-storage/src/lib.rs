//! ShardStore Storage Engine - Sharded local-disk blob storage
//!
//! This crate implements the storage engine for ShardStore including:
//! - Shard placement derived from each identifier's suffix
//! - JSON manifest sidecars as the source of truth for existence
//! - Lazy whole-repository iteration and batched bulk deletion
//! - Append and concatenation of stored blobs
//! - Background age-based eviction

pub mod eviction;
pub mod fs;
pub mod iter;
pub mod layout;
pub mod locator;
pub mod manifest;
pub mod repository;
pub mod store;

// Re-exports
pub use eviction::{
    EvictionSweeper, SweepOutcome, SweepReport, SweepStats, SweeperHandle, should_evict,
};
pub use fs::{DirEntries, DirEntry, FileSystem, LocalFs};
pub use iter::ManifestIter;
pub use layout::{DEFAULT_EXTENSION, MANIFEST_EXTENSION, RepoLayout};
pub use locator::{ShardWidth, locate};
pub use manifest::{LENGTH_UNSET, Manifest};
pub use repository::Repository;
pub use store::{EMPTY_BATCH_SIZE, ShardStore};
