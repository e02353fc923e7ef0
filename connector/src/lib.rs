//! # File Connector
//!
//! Local file system connector: reads, writes, locks and lists files, and
//! watches directory trees for changes, handing events to a sink owned by
//! the host application.
//!
//! ## Features
//!
//! - **Snapshot Diffing**: Every scan is compared against the last known
//!   state of the tree, producing CREATE / UPDATE / DELETE records
//! - **Matchers**: Filename globs, size and age bounds, type filters
//! - **Advisory Locks**: `flock`-backed locks around reads, writes and moves
//! - **File Operations**: Read, write, list (sorted and paged), rename, move
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Directory Watcher                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  FileSystem::list ──► Matcher ──► DirectorySnapshot::update      │
//! │                                          │                       │
//! │                                          ▼                       │
//! │                      ChangeRecord ──► PathLock + FilePayload     │
//! │                                          │                       │
//! │                                          ▼                       │
//! │                                  mpsc::Sender<WatchEvent>        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod attributes;
pub mod config;
pub mod error;
pub mod event;
pub mod fs;
pub mod lock;
pub mod matcher;
pub mod operations;
pub mod snapshot;
pub mod subset;
pub mod watcher;

pub use attributes::PathAttributes;
pub use config::{WatchMode, WatcherConfig};
pub use error::{ConnectorError, Result};
pub use event::{ChangeKind, ChangeRecord, WatchEvent};
pub use fs::{FilePayload, FileSystem, LocalFileSystem, WalkOptions};
pub use lock::{FileLock, LockPolicy, NullPathLock, PathLock, with_lock};
pub use matcher::{Matcher, MatcherConfig, TypeFilter};
pub use operations::{FileOperations, ReadResult, WriteMode, WriteOptions};
pub use snapshot::DirectorySnapshot;
pub use subset::{ListComparator, SortOrder, SubsetList};
pub use watcher::{DirectoryWatcher, Scanner, WatcherState, WatcherStats};
