//! Repository layout definitions
//!
//! Repository Layout:
//! ```text
//! <root>/
//! ├── 3f/
//! │   ├── 9c0e...a13f.manifest   JSON manifest (authoritative)
//! │   └── 9c0e...a13f.txt        content
//! ├── a0/
//! │   └── ...
//! ```
//!
//! Every path the engine touches is derived here from the root, the shard
//! width and the identifier. Nothing is cached between operations.

use crate::locator::{ShardWidth, locate};
use shardstore_common::{Error, FileId, Result};
use std::path::{Path, PathBuf};

/// File extension of manifest sidecars
pub const MANIFEST_EXTENSION: &str = "manifest";

/// Extension used when the caller provides none
pub const DEFAULT_EXTENSION: &str = "bin";

/// Normalize a caller-supplied extension
///
/// Strips a leading dot and falls back to [`DEFAULT_EXTENSION`]. An
/// extension whose last segment is `manifest` is reserved, since the
/// content file would then look like a manifest sidecar. Separators are
/// rejected so the content file always stays inside its shard directory.
pub fn normalize_extension(extension: &str) -> Result<String> {
    let ext = extension.strip_prefix('.').unwrap_or(extension);

    if ext.is_empty() {
        return Ok(DEFAULT_EXTENSION.to_string());
    }

    let last_segment = ext.rsplit('.').next().unwrap_or(ext);

    if last_segment.eq_ignore_ascii_case(MANIFEST_EXTENSION)
        || ext.contains(['/', '\\'])
        || ext == "."
        || ext == ".."
    {
        return Err(Error::InvalidExtension(extension.to_string()));
    }

    Ok(ext.to_string())
}

/// Whether `path` names a manifest sidecar
pub fn is_manifest_path(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(MANIFEST_EXTENSION)
}

/// Path derivation for one repository
#[derive(Clone, Debug)]
pub struct RepoLayout {
    root: PathBuf,
    width: ShardWidth,
}

impl RepoLayout {
    /// Create a layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>, width: ShardWidth) -> Self {
        Self {
            root: root.into(),
            width,
        }
    }

    /// Repository root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shard width
    pub const fn width(&self) -> ShardWidth {
        self.width
    }

    /// Shard directory name for `file_id`
    pub fn shard_key(&self, file_id: &FileId) -> Result<String> {
        locate(file_id, self.width)
    }

    /// Absolute shard directory for `file_id`
    pub fn shard_dir(&self, file_id: &FileId) -> Result<PathBuf> {
        Ok(self.root.join(self.shard_key(file_id)?))
    }

    /// Absolute manifest path for `file_id`
    pub fn manifest_path(&self, file_id: &FileId) -> Result<PathBuf> {
        Ok(self
            .shard_dir(file_id)?
            .join(format!("{file_id}.{MANIFEST_EXTENSION}")))
    }

    /// Scratch path a manifest is written to before being renamed into place
    ///
    /// The leading dot keeps it apart from content files, which always
    /// start with the identifier, and the `tmp` extension keeps it out of
    /// iteration. `nonce` separates concurrent writers of the same id.
    pub fn manifest_temp_path(&self, file_id: &FileId, nonce: &str) -> Result<PathBuf> {
        Ok(self
            .shard_dir(file_id)?
            .join(format!(".{file_id}.{nonce}.tmp")))
    }

    /// Absolute content path for `file_id` stored with `extension`
    pub fn content_path(&self, file_id: &FileId, extension: &str) -> Result<PathBuf> {
        Ok(self.shard_dir(file_id)?.join(format!("{file_id}.{extension}")))
    }

    /// Repository-relative content path as persisted in the manifest
    pub fn local_path(&self, file_id: &FileId, extension: &str) -> Result<String> {
        Ok(format!("/{}/{file_id}.{extension}", self.shard_key(file_id)?))
    }
}
