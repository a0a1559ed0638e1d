//! Filesystem capability used by the storage engine
//!
//! The engine never touches `std::fs` directly; every primitive goes
//! through [`FileSystem`] so it can be swapped for an instrumented or
//! in-memory implementation. [`LocalFs`] is the production backend.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A single entry returned by [`FileSystem::read_dir`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// Full path of the entry
    pub path: PathBuf,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// Lazily produced directory listing
pub type DirEntries<'a> = Box<dyn Iterator<Item = io::Result<DirEntry>> + Send + 'a>;

/// Raw filesystem primitives the engine depends on
pub trait FileSystem: Send + Sync {
    /// Read a whole file
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Create or truncate a file and write `contents` to it
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Append to a file, creating it if missing
    fn append(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Append the contents of `source` to `dest`, returning the bytes copied
    fn append_file(&self, source: &Path, dest: &Path) -> io::Result<u64> {
        let contents = self.read(source)?;
        self.append(dest, &contents)?;
        Ok(contents.len() as u64)
    }

    /// Remove a file
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Atomically replace `to` with `from`
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Whether a regular file exists at `path`
    fn is_file(&self, path: &Path) -> bool;

    /// Create a directory and all of its parents
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// List a directory lazily
    fn read_dir<'a>(&'a self, path: &Path) -> io::Result<DirEntries<'a>>;
}

/// [`FileSystem`] backed by the local disk
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFs;

impl LocalFs {
    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }
}

impl FileSystem for LocalFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(contents)?;
        file.flush()
    }

    fn append(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut file = Self::open_append(path)?;
        file.write_all(contents)?;
        file.flush()
    }

    fn append_file(&self, source: &Path, dest: &Path) -> io::Result<u64> {
        let mut reader = File::open(source)?;
        let mut writer = Self::open_append(dest)?;
        let copied = io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        Ok(copied)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn read_dir<'a>(&'a self, path: &Path) -> io::Result<DirEntries<'a>> {
        let entries = fs::read_dir(path)?.map(|entry| {
            let entry = entry?;
            let is_dir = entry.file_type()?.is_dir();
            Ok(DirEntry {
                path: entry.path(),
                is_dir,
            })
        });
        Ok(Box::new(entries))
    }
}
