//! Error types for ShardStore
//!
//! This module defines the error taxonomy shared by the storage engine
//! and the eviction sweeper.

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for ShardStore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for ShardStore
#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid file id {file_id:?}: {reason}")]
    InvalidFileId { file_id: String, reason: String },

    #[error("invalid file extension {0:?}")]
    InvalidExtension(String),

    // Lookup errors
    #[error("source file not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("file manifest not found: {file_id}")]
    ManifestNotFound { file_id: String },

    #[error("file content not found for {file_id}: {}", path.display())]
    ContentNotFound { file_id: String, path: PathBuf },

    // Manifest encoding errors
    #[error("malformed manifest {}: {source}", path.display())]
    MalformedManifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("misplaced manifest {}: {reason}", path.display())]
    ManifestMismatch { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    // Bulk operation errors
    #[error("{operation} made no progress: {file_id} cannot be removed")]
    Stalled {
        operation: &'static str,
        file_id: String,
    },

    // Storage errors
    #[error("filesystem I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid configuration error
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an invalid file id error
    pub fn invalid_file_id(file_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFileId {
            file_id: file_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a manifest not found error
    pub fn manifest_not_found(file_id: impl Into<String>) -> Self {
        Self::ManifestNotFound {
            file_id: file_id.into(),
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound { .. } | Self::ManifestNotFound { .. } | Self::ContentNotFound { .. }
        )
    }

    /// Check if the error came from the underlying filesystem
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_not_found() {
        assert!(Error::manifest_not_found("abc").is_not_found());
        assert!(
            Error::ContentNotFound {
                file_id: "abc".into(),
                path: PathBuf::from("/tmp/bc/abc.bin"),
            }
            .is_not_found()
        );
        assert!(
            Error::SourceNotFound {
                path: PathBuf::from("/nope")
            }
            .is_not_found()
        );
        assert!(!Error::invalid_configuration("width").is_not_found());
    }

    #[test]
    fn test_error_io_passthrough() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(err.is_io());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_error_display() {
        let err = Error::invalid_file_id("../x", "contains '/'");
        assert_eq!(err.to_string(), "invalid file id \"../x\": contains '/'");
        assert_eq!(
            Error::manifest_not_found("abc").to_string(),
            "file manifest not found: abc"
        );
        let stalled = Error::Stalled {
            operation: "empty_all",
            file_id: "abc".to_string(),
        };
        assert_eq!(
            stalled.to_string(),
            "empty_all made no progress: abc cannot be removed"
        );
        assert!(!stalled.is_not_found());
    }
}
