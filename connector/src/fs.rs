//! File system backends.
//!
//! The watcher and the file operations only need four capabilities from a
//! backend: list a tree, stat a path, open a file (optionally locked) and
//! lock a path. [`LocalFileSystem`] provides them for local disks.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::attributes::PathAttributes;
use crate::error::{ConnectorError, Result};
use crate::lock::{FileLock, NullPathLock, PathLock};

/// How deep and how far a listing walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalkOptions {
    /// Maximum depth below the root (None = unlimited, 1 = direct children).
    pub max_depth: Option<usize>,

    /// Whether to follow symbolic links.
    pub follow_symlinks: bool,
}

impl WalkOptions {
    /// Only the direct children of the root.
    pub fn shallow() -> Self {
        Self {
            max_depth: Some(1),
            ..Self::default()
        }
    }
}

/// Capabilities a backend must offer.
pub trait FileSystem: Send + Sync {
    /// Every entry below `root` (the root itself excluded), in path order.
    ///
    /// Entries that vanish while the walk is in progress, and subtrees that
    /// cannot be read, are skipped. Any other failure, or an unreadable root,
    /// fails the whole listing.
    fn list(&self, root: &Path, options: &WalkOptions) -> Result<Vec<PathAttributes>>;

    /// Attributes of `path`, with the relative path computed against `base`.
    fn stat(&self, base: &Path, path: &Path) -> Result<PathAttributes>;

    /// Open a file for reading, holding an exclusive lock when `lock` is set.
    fn open(&self, path: &Path, lock: bool) -> Result<FilePayload>;

    /// Take an exclusive lock on `path` without reading it.
    fn lock(&self, path: &Path) -> Result<Box<dyn PathLock>>;
}

/// The content of a file together with the lock guarding it.
///
/// The lock is released when the payload is closed or dropped.
pub struct FilePayload {
    path: PathBuf,
    reader: Box<dyn Read + Send>,
    lock: Box<dyn PathLock>,
}

impl FilePayload {
    /// Wrap a reader and the lock guarding it.
    pub fn new(
        path: impl Into<PathBuf>,
        reader: Box<dyn Read + Send>,
        lock: Box<dyn PathLock>,
    ) -> Self {
        Self {
            path: path.into(),
            reader,
            lock,
        }
    }

    /// Path the payload was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The lock held while the payload is open.
    pub fn lock(&self) -> &dyn PathLock {
        self.lock.as_ref()
    }

    /// Read the remaining content and release the lock.
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.reader
            .read_to_end(&mut buf)
            .map_err(|err| ConnectorError::from_io(&self.path, err))?;
        self.close();
        Ok(buf)
    }

    /// Read the remaining content as UTF-8 and release the lock.
    pub fn into_string(self) -> Result<String> {
        let path = self.path.clone();
        let bytes = self.into_bytes()?;
        String::from_utf8(bytes).map_err(|err| ConnectorError::Io {
            path,
            source: io::Error::new(io::ErrorKind::InvalidData, err),
        })
    }

    /// Release the lock early. Reading stays possible.
    pub fn close(&mut self) {
        self.lock.release();
    }
}

impl Read for FilePayload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Drop for FilePayload {
    fn drop(&mut self) {
        self.lock.release();
    }
}

impl fmt::Debug for FilePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePayload")
            .field("path", &self.path)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

/// Backend for the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    /// Create a backend for the local disk.
    pub fn new() -> Self {
        Self
    }
}

fn is_vanished(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
}

/// Whether a walk can carry on past a failure at `path`. Entries that
/// vanished and unreadable subtrees are skipped; the root itself never is.
fn is_skippable(err: &io::Error, path: &Path, root: &Path) -> bool {
    path != root
        && matches!(
            err.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
        )
}

impl FileSystem for LocalFileSystem {
    fn list(&self, root: &Path, options: &WalkOptions) -> Result<Vec<PathAttributes>> {
        let metadata = fs::metadata(root).map_err(|err| ConnectorError::from_io(root, err))?;
        if !metadata.is_dir() {
            return Err(ConnectorError::IllegalPath(format!(
                "'{}' is not a directory",
                root.display()
            )));
        }

        let mut walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(options.follow_symlinks)
            .sort_by_file_name();
        if let Some(depth) = options.max_depth {
            walker = walker.max_depth(depth);
        }

        let mut entries = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().unwrap_or(root).to_path_buf();
                    let err = io::Error::from(err);
                    if !is_skippable(&err, &path, root) {
                        return Err(ConnectorError::from_io(path, err));
                    }
                    if is_vanished(&err) {
                        debug!(path = %path.display(), "entry vanished during walk");
                    } else {
                        warn!(path = %path.display(), "skipping unreadable entry: {err}");
                    }
                    continue;
                }
            };

            match entry.metadata() {
                Ok(metadata) => {
                    entries.push(PathAttributes::from_metadata(root, entry.path(), &metadata));
                }
                Err(err) => {
                    let err = io::Error::from(err);
                    if is_vanished(&err) {
                        debug!(path = %entry.path().display(), "entry vanished during stat");
                        continue;
                    }
                    return Err(ConnectorError::from_io(entry.path(), err));
                }
            }
        }

        Ok(entries)
    }

    fn stat(&self, base: &Path, path: &Path) -> Result<PathAttributes> {
        let metadata = fs::metadata(path).map_err(|err| ConnectorError::from_io(path, err))?;
        Ok(PathAttributes::from_metadata(base, path, &metadata))
    }

    fn open(&self, path: &Path, lock: bool) -> Result<FilePayload> {
        let metadata = fs::metadata(path).map_err(|err| ConnectorError::from_io(path, err))?;
        if metadata.is_dir() {
            return Err(ConnectorError::IllegalPath(format!(
                "cannot read '{}' because it is a directory",
                path.display()
            )));
        }

        let file = File::open(path).map_err(|err| ConnectorError::from_io(path, err))?;
        let guard: Box<dyn PathLock> = if lock {
            let handle = file
                .try_clone()
                .map_err(|err| ConnectorError::from_io(path, err))?;
            Box::new(FileLock::try_acquire(path, handle)?)
        } else {
            Box::new(NullPathLock::new(path))
        };

        Ok(FilePayload::new(path, Box::new(file), guard))
    }

    fn lock(&self, path: &Path) -> Result<Box<dyn PathLock>> {
        let file = File::open(path).map_err(|err| ConnectorError::from_io(path, err))?;
        Ok(Box::new(FileLock::try_acquire(path, file)?))
    }
}
