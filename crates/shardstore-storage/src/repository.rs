//! Repository: a store plus its optional background eviction
//!
//! Opening a repository whose configuration sets `maxAgeSeconds` starts
//! an [`EvictionSweeper`] on its own thread. Dropping the repository (or
//! calling [`Repository::shutdown`]) stops it.

use crate::eviction::{EvictionSweeper, SweepOutcome, SweeperHandle};
use crate::fs::{FileSystem, LocalFs};
use crate::store::ShardStore;
use shardstore_common::{IdGenerator, Result, StoreConfig, UuidGenerator};
use std::ops::Deref;
use std::sync::Arc;
use tracing::info;

/// Opened repository
pub struct Repository {
    store: Arc<ShardStore>,
    sweeper: Option<Arc<EvictionSweeper>>,
    handle: Option<SweeperHandle>,
}

impl Repository {
    /// Open a repository on the local disk
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::with_backends(config, Arc::new(LocalFs), Arc::new(UuidGenerator))
    }

    /// Open a repository with explicit filesystem and id generator
    pub fn with_backends(
        config: &StoreConfig,
        fs: Arc<dyn FileSystem>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        let store = Arc::new(ShardStore::with_backends(config, fs, ids)?);

        let (sweeper, handle) = match config.max_age() {
            Some(max_age) => {
                let sweeper = Arc::new(EvictionSweeper::new(Arc::clone(&store), max_age));
                let handle = sweeper.spawn(config.sweep_interval())?;
                info!(
                    "Evicting files older than {}s from {:?}",
                    max_age.as_secs(),
                    config.path
                );
                (Some(sweeper), Some(handle))
            }
            None => (None, None),
        };

        Ok(Self {
            store,
            sweeper,
            handle,
        })
    }

    /// Shared handle to the underlying store
    pub const fn store(&self) -> &Arc<ShardStore> {
        &self.store
    }

    /// The eviction sweeper, if eviction is enabled
    pub fn sweeper(&self) -> Option<&Arc<EvictionSweeper>> {
        self.sweeper.as_ref()
    }

    /// Run a sweep immediately; `None` if eviction is disabled
    ///
    /// Returns [`SweepOutcome::Skipped`] if the background pass is running.
    pub fn sweep_now(&self) -> Result<Option<SweepOutcome>> {
        self.sweeper.as_ref().map(|s| s.tick()).transpose()
    }

    /// Stop background eviction
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
    }
}

impl Deref for Repository {
    type Target = ShardStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}
