//! Advisory path locks.
//!
//! A [`PathLock`] represents exclusive, cooperative ownership of a path while
//! it is read or moved. [`FileLock`] is backed by `flock(2)`; [`NullPathLock`]
//! stands in when locking is disabled. Both release on drop, and `release`
//! may be called any number of times.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConnectorError, Result};
use crate::fs::FileSystem;

/// Exclusive ownership of a path for the duration of an operation.
pub trait PathLock: Send + fmt::Debug {
    /// The guarded path.
    fn path(&self) -> &Path;

    /// Whether the lock is currently held.
    fn is_locked(&self) -> bool;

    /// Release the lock. Releasing an already released lock is a no-op.
    fn release(&mut self);
}

/// An exclusive `flock` held on an open file description.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
}

impl FileLock {
    /// Take an exclusive lock on `file` without blocking.
    ///
    /// Fails with [`ConnectorError::LockUnavailable`] when another open file
    /// description (in this or another process) holds the lock.
    pub fn try_acquire(path: impl Into<PathBuf>, file: File) -> Result<Self> {
        let path = path.into();
        sys::try_lock_exclusive(&file).map_err(|err| ConnectorError::from_io(&path, err))?;
        debug!(path = %path.display(), "acquired advisory lock");

        Ok(Self {
            path,
            file: Some(file),
        })
    }
}

impl PathLock for FileLock {
    fn path(&self) -> &Path {
        &self.path
    }

    fn is_locked(&self) -> bool {
        self.file.is_some()
    }

    fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(err) = sys::unlock(&file) {
                warn!(path = %self.path.display(), "failed to unlock: {err}");
            }
            debug!(path = %self.path.display(), "released advisory lock");
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// A lock that guards nothing, used when locking is disabled.
#[derive(Debug, Clone)]
pub struct NullPathLock {
    path: PathBuf,
}

impl NullPathLock {
    /// Create a no-op lock for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PathLock for NullPathLock {
    fn path(&self) -> &Path {
        &self.path
    }

    fn is_locked(&self) -> bool {
        false
    }

    fn release(&mut self) {}
}

/// What to do when a lock is held by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    /// Fail immediately with `LockUnavailable`.
    #[default]
    FailFast,

    /// Try again up to `attempts` more times, sleeping between tries.
    Retry { attempts: u32, interval_ms: u64 },
}

impl LockPolicy {
    /// Run `attempt` until it succeeds, fails with anything other than
    /// `LockUnavailable`, or the policy gives up.
    ///
    /// Blocks the calling thread between attempts.
    pub fn acquire<T>(&self, mut attempt: impl FnMut() -> Result<T>) -> Result<T> {
        let (retries, interval) = match *self {
            Self::FailFast => (0, Duration::ZERO),
            Self::Retry {
                attempts,
                interval_ms,
            } => (attempts, Duration::from_millis(interval_ms)),
        };

        let mut tries = 0;
        loop {
            match attempt() {
                Err(ConnectorError::LockUnavailable(path)) if tries < retries => {
                    tries += 1;
                    debug!(path = %path.display(), tries, "lock busy, retrying");
                    thread::sleep(interval);
                }
                other => return other,
            }
        }
    }
}

/// Hold an exclusive lock on `path` while `f` runs.
///
/// The lock is released on every exit path, including panics in `f`.
pub fn with_lock<T>(
    fs: &dyn FileSystem,
    path: &Path,
    policy: LockPolicy,
    f: impl FnOnce(&dyn PathLock) -> Result<T>,
) -> Result<T> {
    let mut lock = policy.acquire(|| fs.lock(path))?;
    let result = f(lock.as_ref());
    lock.release();
    result
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    pub(super) fn try_lock_exclusive(file: &File) -> io::Result<()> {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub(super) fn unlock(file: &File) -> io::Result<()> {
        // SAFETY: as above.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::File;
    use std::io;

    pub(super) fn try_lock_exclusive(_file: &File) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "advisory locks require a unix platform",
        ))
    }

    pub(super) fn unlock(_file: &File) -> io::Result<()> {
        Ok(())
    }
}
