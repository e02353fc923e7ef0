//! Read, write, list, lock and move operations on a file system backend.
//!
//! Relative paths resolve against the working directory the operations were
//! created with. Reads and lock acquisitions go through the [`FileSystem`]
//! backend; mutations act on the local disk.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::attributes::PathAttributes;
use crate::error::{ConnectorError, Result};
use crate::fs::{FilePayload, FileSystem, WalkOptions};
use crate::lock::{FileLock, LockPolicy, NullPathLock, PathLock, with_lock};
use crate::matcher::Matcher;
use crate::subset::SubsetList;

/// The outcome of a read.
#[derive(Debug)]
pub struct ReadResult {
    /// File content; holds the lock, if one was requested, until dropped.
    pub payload: FilePayload,

    pub attributes: PathAttributes,

    /// Media type inferred from the file extension.
    pub media_type: String,
}

/// How a write treats an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Replace the content.
    #[default]
    Overwrite,

    /// Add to the end of the content.
    Append,

    /// Fail if the file exists.
    CreateNew,
}

/// Options for [`FileOperations::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    pub mode: WriteMode,

    /// Create missing parent directories instead of failing.
    pub create_parent_directories: bool,

    /// Hold an exclusive lock while writing.
    pub lock: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            mode: WriteMode::Overwrite,
            create_parent_directories: true,
            lock: false,
        }
    }
}

/// File operations rooted at a working directory.
#[derive(Clone)]
pub struct FileOperations {
    fs: Arc<dyn FileSystem>,
    working_dir: PathBuf,
    lock_policy: LockPolicy,
}

impl FileOperations {
    /// Create operations resolving relative paths against `working_dir`.
    pub fn new(fs: Arc<dyn FileSystem>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            working_dir: working_dir.into(),
            lock_policy: LockPolicy::default(),
        }
    }

    /// Set what happens when a requested lock is held elsewhere.
    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    /// Directory relative paths resolve against.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Resolve `path` against the working directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    /// Open a file for reading, optionally holding an exclusive lock.
    pub fn read(&self, path: impl AsRef<Path>, lock: bool) -> Result<ReadResult> {
        let path = self.resolve(path);
        let payload = self.lock_policy.acquire(|| self.fs.open(&path, lock))?;
        // The payload (and its lock) is dropped if stat fails.
        let attributes = self.fs.stat(&self.working_dir, &path)?;
        let media_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        debug!(path = %path.display(), lock, "read file");
        Ok(ReadResult {
            payload,
            attributes,
            media_type,
        })
    }

    /// Write `content` to a file.
    ///
    /// With `lock` set, an existing file is only truncated once the lock is
    /// held.
    pub fn write(
        &self,
        path: impl AsRef<Path>,
        content: &[u8],
        options: WriteOptions,
    ) -> Result<PathAttributes> {
        let path = self.resolve(path);
        if path.is_dir() {
            return Err(ConnectorError::IllegalPath(format!(
                "cannot write to '{}' because it is a directory",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if !options.create_parent_directories {
                    return Err(ConnectorError::IllegalPath(format!(
                        "parent directory of '{}' does not exist",
                        path.display()
                    )));
                }
                fs::create_dir_all(parent).map_err(|err| ConnectorError::from_io(parent, err))?;
            }
        }

        let mut open = OpenOptions::new();
        open.write(true);
        match options.mode {
            WriteMode::Overwrite => open.create(true),
            WriteMode::Append => open.create(true).append(true),
            WriteMode::CreateNew => open.create_new(true),
        };
        let mut file = open
            .open(&path)
            .map_err(|err| ConnectorError::from_io(&path, err))?;

        let mut guard: Box<dyn PathLock> = if options.lock {
            let handle = file
                .try_clone()
                .map_err(|err| ConnectorError::from_io(&path, err))?;
            let mut handle = Some(handle);
            Box::new(self.lock_policy.acquire(|| match handle.take() {
                Some(handle) => FileLock::try_acquire(&path, handle),
                None => {
                    let handle = File::open(&path).map_err(|err| ConnectorError::from_io(&path, err))?;
                    FileLock::try_acquire(&path, handle)
                }
            })?)
        } else {
            Box::new(NullPathLock::new(&path))
        };

        let written = write_content(&mut file, &path, content, options.mode);
        guard.release();
        written?;

        info!(path = %path.display(), bytes = content.len(), mode = ?options.mode, "wrote file");
        self.fs.stat(&self.working_dir, &path)
    }

    /// List the entries of a directory.
    pub fn list(
        &self,
        directory: impl AsRef<Path>,
        recursive: bool,
        matcher: Option<&Matcher>,
        subset: Option<&SubsetList>,
    ) -> Result<Vec<PathAttributes>> {
        let directory = self.resolve(directory);
        let options = if recursive {
            WalkOptions::default()
        } else {
            WalkOptions::shallow()
        };

        let mut entries = self.fs.list(&directory, &options)?;
        if let Some(matcher) = matcher {
            entries.retain(|entry| matcher.matches(entry));
        }
        Ok(match subset {
            Some(subset) => subset.apply(entries),
            None => entries,
        })
    }

    /// Take an exclusive lock on a path. It is held until released or dropped.
    pub fn lock(&self, path: impl AsRef<Path>) -> Result<Box<dyn PathLock>> {
        let path = self.resolve(path);
        self.lock_policy.acquire(|| self.fs.lock(&path))
    }

    /// Create a directory and any missing parents.
    pub fn create_directory(&self, path: impl AsRef<Path>) -> Result<PathAttributes> {
        let path = self.resolve(path);
        if path.exists() {
            return Err(ConnectorError::AlreadyExists(path));
        }
        fs::create_dir_all(&path).map_err(|err| ConnectorError::from_io(&path, err))?;
        info!(path = %path.display(), "created directory");
        self.fs.stat(&self.working_dir, &path)
    }

    /// Delete a file, or a directory with everything below it.
    pub fn delete(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = self.resolve(path);
        let metadata = fs::metadata(&path).map_err(|err| ConnectorError::from_io(&path, err))?;
        let removed = if metadata.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|err| ConnectorError::from_io(&path, err))?;
        info!(path = %path.display(), "deleted");
        Ok(())
    }

    /// Rename a path within its directory.
    pub fn rename(
        &self,
        path: impl AsRef<Path>,
        new_name: &str,
        overwrite: bool,
    ) -> Result<PathAttributes> {
        let mut components = Path::new(new_name).components();
        let is_plain_name = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !is_plain_name {
            return Err(ConnectorError::IllegalPath(format!(
                "'{new_name}' is not a valid file name"
            )));
        }

        let source = self.resolve(path);
        let target = source
            .parent()
            .map(|parent| parent.join(new_name))
            .ok_or_else(|| ConnectorError::IllegalPath(format!("cannot rename '{}'", source.display())))?;
        self.relocate(&source, &target, overwrite)
    }

    /// Move a path into `target_directory`, keeping its name.
    pub fn move_to(
        &self,
        path: impl AsRef<Path>,
        target_directory: impl AsRef<Path>,
        overwrite: bool,
        create_parent_directories: bool,
    ) -> Result<PathAttributes> {
        let source = self.resolve(path);
        let target_directory = self.resolve(target_directory);
        let name = source
            .file_name()
            .ok_or_else(|| ConnectorError::IllegalPath(format!("cannot move '{}'", source.display())))?;

        if !target_directory.is_dir() {
            if !create_parent_directories {
                return Err(ConnectorError::IllegalPath(format!(
                    "target directory '{}' does not exist",
                    target_directory.display()
                )));
            }
            fs::create_dir_all(&target_directory)
                .map_err(|err| ConnectorError::from_io(&target_directory, err))?;
        }

        let target = target_directory.join(name);
        self.relocate(&source, &target, overwrite)
    }

    /// Move `source` to `target` while holding a lock on `source`. An
    /// existing target is only removed once the lock is held.
    fn relocate(&self, source: &Path, target: &Path, overwrite: bool) -> Result<PathAttributes> {
        if !source.exists() {
            return Err(ConnectorError::NotFound(source.to_path_buf()));
        }
        if target.exists() && !overwrite {
            return Err(ConnectorError::AlreadyExists(target.to_path_buf()));
        }

        with_lock(self.fs.as_ref(), source, self.lock_policy, |_| {
            if target.exists() {
                let removed = if target.is_dir() {
                    fs::remove_dir_all(target)
                } else {
                    fs::remove_file(target)
                };
                removed.map_err(|err| ConnectorError::from_io(target, err))?;
                debug!(path = %target.display(), "removed existing target");
            }
            fs::rename(source, target).map_err(|err| ConnectorError::from_io(source, err))
        })?;

        info!(from = %source.display(), to = %target.display(), "moved");
        self.fs.stat(&self.working_dir, target)
    }
}

fn write_content(file: &mut File, path: &Path, content: &[u8], mode: WriteMode) -> Result<()> {
    let io_err = |err| ConnectorError::from_io(path, err);
    if mode == WriteMode::Overwrite {
        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
    }
    file.write_all(content).map_err(io_err)?;
    file.flush().map_err(io_err)
}
