//! Core type definitions for ShardStore
//!
//! Identifiers and the pluggable identifier generator.

use crate::error::{Error, Result};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Longest identifier accepted from callers
pub const MAX_FILE_ID_LEN: usize = 128;

/// Opaque identifier naming one stored blob
///
/// Identifiers are ASCII alphanumeric (plus `-` and `_`), so they are
/// always safe to use as a file name inside a shard directory.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(try_from = "String", into = "String")]
#[display("{_0}")]
pub struct FileId(String);

impl FileId {
    /// Create a file id from caller input (validates the character set)
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create without validation (generators only)
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length of the id in characters
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the id is empty (never true for validated ids)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn validate(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::invalid_file_id(id, "must not be empty"));
        }
        if id.len() > MAX_FILE_ID_LEN {
            return Err(Error::invalid_file_id(
                id,
                format!("longer than {MAX_FILE_ID_LEN} characters"),
            ));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
        {
            return Err(Error::invalid_file_id(id, format!("invalid character {c:?}")));
        }
        Ok(())
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({:?})", self.0)
    }
}

impl FromStr for FileId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for FileId {
    type Error = Error;

    fn try_from(id: String) -> Result<Self> {
        Self::new(id)
    }
}

impl From<FileId> for String {
    fn from(id: FileId) -> Self {
        id.0
    }
}

impl AsRef<str> for FileId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Source of fresh, collision-resistant identifiers
pub trait IdGenerator: Send + Sync {
    /// Produce a new identifier
    fn generate(&self) -> FileId;
}

/// Default generator: random UUIDv4 as 32 lowercase hex characters
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> FileId {
        FileId::new_unchecked(Uuid::new_v4().simple().to_string())
    }
}
