//! Error types for the file connector.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::watcher::WatcherState;

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Errors that can occur in the file connector.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// The path does not exist, or vanished between detection and action.
    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The operating system denied access to the path.
    #[error("access to path '{}' denied by the operating system", .0.display())]
    AccessDenied(PathBuf),

    /// Another holder owns an exclusive lock on the path.
    #[error("could not lock '{}': lock held by another owner", .0.display())]
    LockUnavailable(PathBuf),

    /// The watch root could not be walked during a scan cycle.
    #[error("scan of '{}' failed: {source}", .path.display())]
    TransientScan {
        path: PathBuf,
        #[source]
        source: Box<ConnectorError>,
    },

    /// Invalid or unusable configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A matcher pattern failed to compile.
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// The operation cannot be applied to this path.
    #[error("illegal path: {0}")]
    IllegalPath(String),

    /// The target path already exists.
    #[error("path already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// A lifecycle operation was called from the wrong state.
    #[error("cannot {operation} a watcher in state {state:?}")]
    InvalidState {
        state: WatcherState,
        operation: &'static str,
    },

    /// IO error on a specific path.
    #[error("io error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// TOML configuration parse error.
    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ConnectorError {
    /// Classify an IO error raised while acting on `path`.
    pub fn from_io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path),
            io::ErrorKind::PermissionDenied => Self::AccessDenied(path),
            io::ErrorKind::WouldBlock => Self::LockUnavailable(path),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path),
            _ => Self::Io { path, source },
        }
    }

    /// Whether this is the expected race of an entry disappearing
    /// between detection and action.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether retrying the same action later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientScan { .. } | Self::LockUnavailable(_) | Self::NotFound(_)
        )
    }
}
