//! Manifest sidecar records
//!
//! One manifest per stored blob, persisted as compact JSON next to the
//! content file. The manifest's presence on disk is what makes a blob
//! exist; a content file without one is an orphan and is never visited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shardstore_common::{Error, FileId, Result};
use std::path::{Path, PathBuf};

/// `length` value of a reserved location whose content is not written yet
pub const LENGTH_UNSET: i64 = -1;

/// Metadata record describing one stored blob
///
/// `length` is the size at creation time only: appends and concatenation
/// never update it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Identifier of the blob
    pub file_id: FileId,
    /// Byte count when the content was written, or [`LENGTH_UNSET`]
    pub length: i64,
    /// Content file extension, without the leading dot
    pub extension: String,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Content path relative to the repository root (`/<shard>/<id>.<ext>`)
    pub local_path: String,
    /// Caller-supplied metadata, absent until set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Absolute content path, attached on read and never persisted
    #[serde(skip)]
    pub location: Option<PathBuf>,
}

impl Manifest {
    /// Create a manifest stamped with the current time
    pub fn new(
        file_id: FileId,
        length: i64,
        extension: impl Into<String>,
        local_path: impl Into<String>,
    ) -> Self {
        Self {
            file_id,
            length,
            extension: extension.into(),
            created: Utc::now(),
            local_path: local_path.into(),
            metadata: None,
            location: None,
        }
    }

    /// Whether this is a reserved location with no content written yet
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        self.length == LENGTH_UNSET
    }

    /// Initial content length, if known
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        u64::try_from(self.length).ok()
    }

    /// Serialize to the on-disk representation
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            Error::Serialization(format!("manifest {}: {}", self.file_id, e))
        })
    }

    /// Parse the on-disk representation read from `path`
    pub fn from_bytes(data: &[u8], path: &Path) -> Result<Self> {
        serde_json::from_slice(data).map_err(|source| Error::MalformedManifest {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Manifest {
        Manifest::new(FileId::new("abc123ef").unwrap(), 21, "txt", "/ef/abc123ef.txt")
    }

    #[test]
    fn test_manifest_json_field_names() {
        let value: serde_json::Value =
            serde_json::from_slice(&sample().to_bytes().unwrap()).unwrap();

        assert_eq!(value["fileId"], "abc123ef");
        assert_eq!(value["length"], 21);
        assert_eq!(value["extension"], "txt");
        assert_eq!(value["localPath"], "/ef/abc123ef.txt");
        assert!(value["created"].is_string());
        assert!(value.get("metadata").is_none());
        assert!(value.get("location").is_none());
    }

    #[test]
    fn test_location_is_never_persisted() {
        let mut manifest = sample();
        manifest.location = Some(PathBuf::from("/repo/ef/abc123ef.txt"));

        let parsed = Manifest::from_bytes(&manifest.to_bytes().unwrap(), Path::new("m")).unwrap();
        assert!(parsed.location.is_none());
        assert_eq!(parsed.created, manifest.created);
    }

    #[test]
    fn test_parse_external_manifest() {
        let raw = br#"{"fileId":"9f86d081884c7d659a2feaa0c55ad015","length":-1,"extension":"bin","created":"2018-03-04T10:11:12.345Z","localPath":"/15/9f86d081884c7d659a2feaa0c55ad015.bin","metadata":{"data1":"a","data2":"b"}}"#;
        let manifest = Manifest::from_bytes(raw, Path::new("x.manifest")).unwrap();

        assert!(manifest.is_reserved());
        assert_eq!(manifest.content_length(), None);
        assert_eq!(manifest.created.timestamp_subsec_millis(), 345);
        assert_eq!(manifest.metadata, Some(json!({"data1": "a", "data2": "b"})));
    }

    #[test]
    fn test_metadata_roundtrip_scalar() {
        let mut manifest = sample();
        manifest.metadata = Some(json!("samplemetadata"));

        let parsed = Manifest::from_bytes(&manifest.to_bytes().unwrap(), Path::new("m")).unwrap();
        assert_eq!(parsed.metadata, Some(json!("samplemetadata")));
        assert_eq!(parsed.content_length(), Some(21));
    }

    #[test]
    fn test_malformed_manifest() {
        let err = Manifest::from_bytes(b"{not json", Path::new("/repo/ab/x.manifest")).unwrap_err();
        assert!(matches!(err, Error::MalformedManifest { .. }));
        assert!(err.to_string().contains("/repo/ab/x.manifest"));

        // Missing required field
        let err = Manifest::from_bytes(br#"{"fileId":"abc"}"#, Path::new("m")).unwrap_err();
        assert!(matches!(err, Error::MalformedManifest { .. }));
    }
}
