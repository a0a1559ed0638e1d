//! Configuration types for ShardStore
//!
//! A repository is described by a single flat record. It can be built in
//! code or loaded from TOML using camelCase keys:
//!
//! ```toml
//! path = "/var/lib/shardstore"
//! shardWidth = 2
//! maxAgeSeconds = 3600
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of identifier characters used for the shard directory
pub const DEFAULT_SHARD_WIDTH: u8 = 2;

/// Smallest accepted shard width
pub const MIN_SHARD_WIDTH: u8 = 1;

/// Largest accepted shard width
pub const MAX_SHARD_WIDTH: u8 = 8;

/// Default cadence of the eviction sweeper (once per minute)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Repository configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Root directory of the repository
    pub path: PathBuf,
    /// Shard width: 1 for small repositories (hundreds of files),
    /// 8 for huge ones (hundreds of thousands of files)
    #[serde(default = "default_shard_width")]
    pub shard_width: u8,
    /// Evict blobs older than this many seconds; `None` disables the sweeper
    #[serde(default)]
    pub max_age_seconds: Option<u64>,
    /// Interval between eviction sweeps (seconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_shard_width() -> u8 {
    DEFAULT_SHARD_WIDTH
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

impl StoreConfig {
    /// Create a config rooted at `path` with default settings
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            shard_width: DEFAULT_SHARD_WIDTH,
            max_age_seconds: None,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }

    /// Set the shard width
    #[must_use]
    pub fn with_shard_width(mut self, width: u8) -> Self {
        self.shard_width = width;
        self
    }

    /// Enable age-based eviction
    #[must_use]
    pub fn with_max_age_seconds(mut self, seconds: u64) -> Self {
        self.max_age_seconds = Some(seconds);
        self
    }

    /// Set the sweeper cadence
    #[must_use]
    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.sweep_interval_seconds = seconds;
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Check the configuration before a store is built from it
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SHARD_WIDTH..=MAX_SHARD_WIDTH).contains(&self.shard_width) {
            return Err(Error::InvalidConfiguration(format!(
                "shard width {} not valid, allowed from {} to {}",
                self.shard_width, MIN_SHARD_WIDTH, MAX_SHARD_WIDTH
            )));
        }

        if self.path.as_os_str().is_empty() {
            return Err(Error::invalid_configuration("repository path is empty"));
        }

        if self.max_age_seconds.is_some() && self.sweep_interval_seconds == 0 {
            return Err(Error::invalid_configuration(
                "sweep interval must be at least one second",
            ));
        }

        Ok(())
    }

    /// Maximum blob age, if eviction is enabled
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_seconds.map(Duration::from_secs)
    }

    /// Interval between sweeps
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}
