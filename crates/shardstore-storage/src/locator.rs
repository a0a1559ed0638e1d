//! Shard locator
//!
//! Maps an identifier to the directory that holds it: the last `width`
//! characters of the id, lowercased. Two ids share a directory iff they
//! share that suffix, which spreads blobs over up to 36^width directories
//! without any index.

use shardstore_common::config::{MAX_SHARD_WIDTH, MIN_SHARD_WIDTH};
use shardstore_common::{Error, FileId, Result};
use std::fmt;

/// Validated shard width (1..=8)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShardWidth(u8);

impl ShardWidth {
    /// Validate a raw width
    pub fn new(width: u8) -> Result<Self> {
        if !(MIN_SHARD_WIDTH..=MAX_SHARD_WIDTH).contains(&width) {
            return Err(Error::InvalidConfiguration(format!(
                "shard width {width} not valid, allowed from {MIN_SHARD_WIDTH} to {MAX_SHARD_WIDTH}"
            )));
        }
        Ok(Self(width))
    }

    /// Width in characters
    #[must_use]
    pub const fn get(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ShardWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shard directory name for `file_id`
///
/// Ids shorter than the width cannot be placed and are rejected.
pub fn locate(file_id: &FileId, width: ShardWidth) -> Result<String> {
    let id = file_id.as_str();
    let width = width.get();

    // FileId is ASCII-only, so byte offsets are char offsets
    if !id.is_ascii() || id.len() < width {
        return Err(Error::invalid_file_id(
            id,
            format!("shorter than shard width {width}"),
        ));
    }

    Ok(id[id.len() - width..].to_ascii_lowercase())
}
