//! Sharded blob storage engine
//!
//! Stores each blob as `<root>/<shard>/<id>.<ext>` with a JSON manifest
//! `<root>/<shard>/<id>.manifest` beside it.
//!
//! # Consistency
//!
//! The manifest is the source of truth: a blob exists iff its manifest
//! exists. Writes put content first and the manifest last; deletes remove
//! the manifest first and the content last. A crash in between leaves at
//! worst an invisible orphan content file, never a manifest that points
//! at nothing.
//!
//! Manifests are written to a scratch file in the shard directory and
//! renamed over the old one, so readers see either the previous or the
//! new manifest, never a partial one. No operation is atomic across its
//! filesystem calls and nothing is locked. Concurrent [`ShardStore::set_metadata`] or
//! [`ShardStore::update_manifest`] calls on the same id race and the last
//! writer wins; callers needing atomicity must serialize per id.

use crate::fs::{FileSystem, LocalFs};
use crate::iter::ManifestIter;
use crate::layout::{DEFAULT_EXTENSION, RepoLayout, normalize_extension};
use crate::locator::ShardWidth;
use crate::manifest::{LENGTH_UNSET, Manifest};
use bytes::Bytes;
use shardstore_common::{Error, FileId, IdGenerator, Result, StoreConfig, UuidGenerator};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Number of ids collected per pass by [`ShardStore::empty_all`]
pub const EMPTY_BATCH_SIZE: usize = 100;

/// Distinguishes concurrent manifest writes within this process
static MANIFEST_WRITES: AtomicU64 = AtomicU64::new(0);

/// Sharded local-disk blob store
pub struct ShardStore {
    layout: RepoLayout,
    fs: Arc<dyn FileSystem>,
    ids: Arc<dyn IdGenerator>,
}

impl ShardStore {
    /// Open a store on the local disk with random UUID identifiers
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::with_backends(config, Arc::new(LocalFs), Arc::new(UuidGenerator))
    }

    /// Open a store with explicit filesystem and id generator
    pub fn with_backends(
        config: &StoreConfig,
        fs: Arc<dyn FileSystem>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        config.validate()?;
        let width = ShardWidth::new(config.shard_width)?;

        fs.create_dir_all(&config.path)?;

        info!(
            "Opened shard store at {:?} (shard width {})",
            config.path, width
        );

        Ok(Self {
            layout: RepoLayout::new(config.path.clone(), width),
            fs,
            ids,
        })
    }

    /// Repository root
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    /// Shard width
    pub const fn shard_width(&self) -> ShardWidth {
        self.layout.width()
    }

    /// Path layout of this repository
    pub const fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    /// Copy an existing file into the store
    ///
    /// The extension is taken from `source`. With `file_id` the slot of
    /// that id is overwritten; otherwise a fresh id is generated.
    pub fn add_existing_file(&self, source: &Path, file_id: Option<FileId>) -> Result<FileId> {
        if !self.fs.is_file(source) {
            return Err(Error::SourceNotFound {
                path: source.to_path_buf(),
            });
        }

        let extension = match source.extension() {
            Some(ext) => normalize_extension(
                ext.to_str()
                    .ok_or_else(|| Error::InvalidExtension(ext.to_string_lossy().into_owned()))?,
            )?,
            None => DEFAULT_EXTENSION.to_string(),
        };

        let content = self
            .fs
            .read(source)
            .map_err(|e| source_error(e, source))?;

        let (file_id, stale) = match file_id {
            Some(id) => {
                // A previous blob under this id may use another extension
                let stale = self
                    .load_manifest(&id)
                    .ok()
                    .and_then(|m| m.location.filter(|_| m.extension != extension));
                (id, stale)
            }
            None => (self.ids.generate(), None),
        };

        let manifest = self.write_blob(file_id, extension, &content)?;

        if let Some(path) = stale {
            self.remove_if_present(&path)?;
        }

        debug!(
            "Added {:?} as {} ({} bytes)",
            source, manifest.file_id, manifest.length
        );
        Ok(manifest.file_id)
    }

    /// Store `content` under a fresh id
    ///
    /// An empty extension defaults to `bin`.
    pub fn add_bytes(&self, content: &[u8], extension: &str) -> Result<FileId> {
        let extension = normalize_extension(extension)?;
        let manifest = self.write_blob(self.ids.generate(), extension, content)?;

        debug!("Added {} ({} bytes)", manifest.file_id, manifest.length);
        Ok(manifest.file_id)
    }

    /// Reserve a slot whose content will be appended later
    ///
    /// Writes a manifest with `length == -1` and no content file.
    pub fn allocate_location(&self, extension: &str, file_id: Option<FileId>) -> Result<Manifest> {
        let extension = normalize_extension(extension)?;
        let file_id = file_id.unwrap_or_else(|| self.ids.generate());

        self.fs.create_dir_all(&self.layout.shard_dir(&file_id)?)?;

        let local_path = self.layout.local_path(&file_id, &extension)?;
        let mut manifest = Manifest::new(file_id, LENGTH_UNSET, extension, local_path);
        self.write_manifest(&manifest.file_id, &manifest)?;

        manifest.location = Some(
            self.layout
                .content_path(&manifest.file_id, &manifest.extension)?,
        );

        debug!("Allocated location for {}", manifest.file_id);
        Ok(manifest)
    }

    /// Read the full content of a blob
    pub fn read_content(&self, file_id: &FileId) -> Result<Bytes> {
        let manifest = self.load_manifest(file_id)?;
        let path = self.content_location(file_id, &manifest)?;

        match self.fs.read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::ContentNotFound {
                file_id: file_id.to_string(),
                path,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a manifest exists for `file_id`
    ///
    /// Content is never inspected. Ids that cannot be placed in this
    /// repository (shorter than the shard width) do not exist.
    pub fn exists(&self, file_id: &FileId) -> bool {
        self.layout
            .manifest_path(file_id)
            .is_ok_and(|path| self.fs.is_file(&path))
    }

    /// Get the manifest of a blob with its absolute `location` attached
    pub fn manifest(&self, file_id: &FileId) -> Result<Manifest> {
        self.load_manifest(file_id)
    }

    /// Absolute path of a blob's content file
    pub fn content_path(&self, file_id: &FileId) -> Result<PathBuf> {
        let manifest = self.load_manifest(file_id)?;
        self.content_location(file_id, &manifest)
    }

    /// Overwrite the manifest of an existing blob
    ///
    /// The manifest is written as given. Keeping `fileId`, `created` and
    /// `extension` unchanged is the caller's responsibility.
    pub fn update_manifest(&self, file_id: &FileId, manifest: &Manifest) -> Result<()> {
        if !self.exists(file_id) {
            return Err(Error::manifest_not_found(file_id.as_str()));
        }
        self.write_manifest(file_id, manifest)
    }

    /// Attach caller metadata to a blob, replacing any previous value
    pub fn set_metadata(&self, file_id: &FileId, metadata: serde_json::Value) -> Result<()> {
        let mut manifest = self.load_manifest(file_id)?;
        manifest.metadata = Some(metadata);
        self.write_manifest(file_id, &manifest)
    }

    /// Delete a blob: manifest first, then content
    ///
    /// Missing content is ignored. An unparseable manifest is still
    /// removed, leaving its content as an invisible orphan.
    pub fn delete(&self, file_id: &FileId) -> Result<()> {
        let manifest_path = self.layout.manifest_path(file_id)?;

        let content_path = match self.load_manifest(file_id) {
            Ok(manifest) => Some(self.content_location(file_id, &manifest)?),
            Err(Error::MalformedManifest { path, source }) => {
                warn!("Deleting malformed manifest {:?}: {}", path, source);
                None
            }
            Err(e) => return Err(e),
        };

        match self.fs.remove_file(&manifest_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::manifest_not_found(file_id.as_str()));
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(path) = content_path {
            self.remove_if_present(&path).inspect_err(|e| {
                warn!("Manifest of {} removed but content was not: {}", file_id, e);
            })?;
        }

        debug!("Deleted {}", file_id);
        Ok(())
    }

    /// Lazy iterator over every manifest in the repository
    pub fn manifests(&self) -> Result<ManifestIter<'_>> {
        ManifestIter::new(self.fs.as_ref(), &self.layout)
    }

    /// Visit every manifest until `visit` returns `false`
    pub fn iterate_all<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&Manifest) -> bool,
    {
        for manifest in self.manifests()? {
            if !visit(&manifest?) {
                break;
            }
        }
        Ok(())
    }

    /// Number of blobs in the repository (full walk)
    pub fn count(&self) -> Result<u64> {
        let mut count = 0u64;
        self.iterate_all(|_| {
            count += 1;
            true
        })?;
        Ok(count)
    }

    /// Delete every blob, returning how many were removed
    ///
    /// Ids are collected in batches of [`EMPTY_BATCH_SIZE`] and deleted
    /// after each listing pass, so no directory is mutated while it is
    /// being listed. A writer adding blobs concurrently can keep this
    /// running indefinitely. Two passes in a row that list the same ids
    /// and remove none of them fail with [`Error::Stalled`].
    pub fn empty_all(&self) -> Result<u64> {
        let mut removed = 0u64;
        let mut stuck: Option<Vec<FileId>> = None;

        loop {
            let mut batch = Vec::with_capacity(EMPTY_BATCH_SIZE);
            self.iterate_all(|manifest| {
                batch.push(manifest.file_id.clone());
                batch.len() < EMPTY_BATCH_SIZE
            })?;

            if batch.is_empty() {
                break;
            }
            batch.sort();

            let mut pass_removed = 0u64;
            for file_id in &batch {
                match self.delete(file_id) {
                    Ok(()) => pass_removed += 1,
                    Err(Error::ManifestNotFound { .. }) => {
                        debug!("{} already removed", file_id);
                    }
                    Err(e) => return Err(e),
                }
            }
            removed += pass_removed;

            if pass_removed == 0 {
                if stuck.as_ref() == Some(&batch) {
                    return Err(Error::Stalled {
                        operation: "empty_all",
                        file_id: batch[0].to_string(),
                    });
                }
                stuck = Some(batch.clone());
            } else {
                stuck = None;
            }

            debug!("Emptied batch of {} ({} removed so far)", batch.len(), removed);
        }

        info!("Emptied repository {:?}: {} files removed", self.root(), removed);
        Ok(removed)
    }

    /// Concatenate blobs, in order, into a new blob
    ///
    /// The new manifest keeps `length == -1`.
    pub fn concat(&self, file_ids: &[FileId], extension: &str) -> Result<FileId> {
        let sources = file_ids
            .iter()
            .map(|id| {
                let manifest = self.load_manifest(id)?;
                Ok((id, self.content_location(id, &manifest)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let target = self.allocate_location(extension, None)?;
        let dest = self.content_location(&target.file_id, &target)?;

        let result = self.fs.write(&dest, &[]).map_err(Error::from).and_then(|()| {
            sources
                .iter()
                .try_for_each(|(id, path)| self.append_content(id, path, &dest))
        });

        if let Err(e) = result {
            warn!("Concatenation into {} failed: {}", target.file_id, e);
            if let Err(cleanup) = self.delete(&target.file_id) {
                warn!("Failed to remove partial blob {}: {}", target.file_id, cleanup);
            }
            return Err(e);
        }

        debug!("Concatenated {} blobs into {}", sources.len(), target.file_id);
        Ok(target.file_id)
    }

    /// Append the content of blob `source` to blob `dest`
    pub fn append_blob(&self, source: &FileId, dest: &FileId) -> Result<()> {
        let source_manifest = self.load_manifest(source)?;
        let source_path = self.content_location(source, &source_manifest)?;
        let dest_path = self.content_path(dest)?;

        self.append_content(source, &source_path, &dest_path)
    }

    /// Append an external file to a blob's content
    ///
    /// The manifest `length` is not updated.
    pub fn append_external_file(&self, file_id: &FileId, source: &Path) -> Result<()> {
        if !self.fs.is_file(source) {
            return Err(Error::SourceNotFound {
                path: source.to_path_buf(),
            });
        }

        let dest = self.content_path(file_id)?;
        let copied = self
            .fs
            .append_file(source, &dest)
            .map_err(|e| source_error(e, source))?;

        debug!("Appended {} bytes from {:?} to {}", copied, source, file_id);
        Ok(())
    }

    /// Append raw bytes to a blob's content
    ///
    /// The manifest `length` is not updated.
    pub fn append_bytes(&self, file_id: &FileId, content: &[u8]) -> Result<()> {
        let dest = self.content_path(file_id)?;
        self.fs.append(&dest, content)?;

        debug!("Appended {} bytes to {}", content.len(), file_id);
        Ok(())
    }

    fn write_blob(&self, file_id: FileId, extension: String, content: &[u8]) -> Result<Manifest> {
        self.fs.create_dir_all(&self.layout.shard_dir(&file_id)?)?;

        let content_path = self.layout.content_path(&file_id, &extension)?;
        self.fs.write(&content_path, content)?;

        let length = i64::try_from(content.len())
            .map_err(|_| Error::Serialization(format!("content of {file_id} too large")))?;
        let local_path = self.layout.local_path(&file_id, &extension)?;

        let mut manifest = Manifest::new(file_id, length, extension, local_path);
        self.write_manifest(&manifest.file_id, &manifest)?;
        manifest.location = Some(content_path);

        Ok(manifest)
    }

    fn write_manifest(&self, file_id: &FileId, manifest: &Manifest) -> Result<()> {
        let path = self.layout.manifest_path(file_id)?;
        let nonce = format!(
            "{}-{}",
            std::process::id(),
            MANIFEST_WRITES.fetch_add(1, Ordering::Relaxed)
        );
        let temp = self.layout.manifest_temp_path(file_id, &nonce)?;
        let data = manifest.to_bytes()?;

        let result = self
            .fs
            .write(&temp, &data)
            .and_then(|()| self.fs.rename(&temp, &path));

        if let Err(e) = result {
            if let Err(cleanup) = self.remove_if_present(&temp) {
                warn!("Failed to remove scratch manifest {:?}: {}", temp, cleanup);
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn load_manifest(&self, file_id: &FileId) -> Result<Manifest> {
        let path = self.layout.manifest_path(file_id)?;

        let data = match self.fs.read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::manifest_not_found(file_id.as_str()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut manifest = Manifest::from_bytes(&data, &path)?;
        manifest.location = Some(self.content_location(file_id, &manifest)?);
        Ok(manifest)
    }

    /// Content path derived from the id and the manifest's extension
    fn content_location(&self, file_id: &FileId, manifest: &Manifest) -> Result<PathBuf> {
        self.layout.content_path(file_id, &manifest.extension)
    }

    fn append_content(&self, source: &FileId, source_path: &Path, dest: &Path) -> Result<()> {
        match self.fs.append_file(source_path, dest) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::ContentNotFound {
                file_id: source.to_string(),
                path: source_path.to_path_buf(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_if_present(&self, path: &Path) -> Result<()> {
        match self.fs.remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn source_error(e: io::Error, source: &Path) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::SourceNotFound {
            path: source.to_path_buf(),
        }
    } else {
        e.into()
    }
}
