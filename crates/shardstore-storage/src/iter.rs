//! Whole-repository manifest iteration
//!
//! There is no index, so enumerating blobs means walking every shard
//! directory and parsing every manifest in it. The walk is lazy: at most
//! one root listing and one shard listing are open at a time, so memory
//! stays flat no matter how many blobs the repository holds.

use crate::fs::{DirEntries, FileSystem};
use crate::layout::{RepoLayout, is_manifest_path};
use crate::manifest::Manifest;
use shardstore_common::{Error, FileId, Result};
use std::io;
use std::path::Path;
use tracing::debug;

/// Lazy, single-pass iterator over every manifest in a repository
///
/// Listing order is whatever the filesystem returns. Other operations
/// may run concurrently: a manifest or shard removed after it was listed
/// is skipped silently, content files and loose files are ignored.
///
/// A manifest must sit where its own identifier places it: the file name,
/// the recorded `fileId` and the shard directory have to agree, otherwise
/// the item is an [`Error::ManifestMismatch`] and iteration continues.
pub struct ManifestIter<'a> {
    fs: &'a dyn FileSystem,
    layout: &'a RepoLayout,
    shards: DirEntries<'a>,
    current: Option<DirEntries<'a>>,
}

impl<'a> ManifestIter<'a> {
    pub(crate) fn new(fs: &'a dyn FileSystem, layout: &'a RepoLayout) -> Result<Self> {
        let shards = fs.read_dir(layout.root())?;
        Ok(Self {
            fs,
            layout,
            shards,
            current: None,
        })
    }

    /// Read one manifest; `Ok(None)` if it disappeared after listing
    fn load(&self, path: &Path) -> Result<Option<Manifest>> {
        let file_id = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| FileId::new(stem).ok())
            .ok_or_else(|| mismatch(path, "file name is not a valid identifier".to_string()))?;

        if self.layout.manifest_path(&file_id).ok().as_deref() != Some(path) {
            return Err(mismatch(
                path,
                format!("{file_id} does not belong in this shard directory"),
            ));
        }

        let data = match self.fs.read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Manifest {:?} removed during iteration", path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut manifest = Manifest::from_bytes(&data, path)?;
        if manifest.file_id != file_id {
            return Err(mismatch(
                path,
                format!("records fileId {}", manifest.file_id),
            ));
        }

        manifest.location = Some(
            self.layout
                .content_path(&manifest.file_id, &manifest.extension)?,
        );
        Ok(Some(manifest))
    }

    /// Advance to the next shard directory; `None` when the root is exhausted
    fn next_shard(&mut self) -> Option<Result<()>> {
        loop {
            let entry = match self.shards.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };

            if !entry.is_dir {
                continue;
            }

            match self.fs.read_dir(&entry.path) {
                Ok(entries) => {
                    self.current = Some(entries);
                    return Some(Ok(()));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

fn mismatch(path: &Path, reason: String) -> Error {
    Error::ManifestMismatch {
        path: path.to_path_buf(),
        reason,
    }
}

impl Iterator for ManifestIter<'_> {
    type Item = Result<Manifest>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(entries) = self.current.as_mut() else {
                if let Err(e) = self.next_shard()? {
                    return Some(Err(e));
                }
                continue;
            };

            let entry = match entries.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => return Some(Err(e.into())),
                None => {
                    self.current = None;
                    continue;
                }
            };

            if entry.is_dir || !is_manifest_path(&entry.path) {
                continue;
            }

            match self.load(&entry.path) {
                Ok(Some(manifest)) => return Some(Ok(manifest)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
