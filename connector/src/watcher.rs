//! Directory watcher implementation.
//!
//! A [`DirectoryWatcher`] owns one watch root. On `start` it seeds a
//! [`DirectorySnapshot`] from a baseline scan, then runs scan cycles on a
//! dedicated task: walk, filter, diff, dispatch. Cycles never overlap and
//! `stop` only takes effect between cycles.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::attributes::PathAttributes;
use crate::config::{WatchMode, WatcherConfig};
use crate::error::{ConnectorError, Result};
use crate::event::{ChangeKind, ChangeRecord, WatchEvent};
use crate::fs::{FilePayload, FileSystem};
use crate::matcher::Matcher;
use crate::snapshot::DirectorySnapshot;

/// Lifecycle state of a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Walks the watch root and diffs each walk against a snapshot through the
/// matcher.
#[derive(Clone)]
pub struct Scanner {
    fs: Arc<dyn FileSystem>,
    config: Arc<WatcherConfig>,
    matcher: Arc<Matcher>,
}

impl Scanner {
    /// Create a scanner over `fs` for the root in `config`.
    pub fn new(fs: Arc<dyn FileSystem>, config: Arc<WatcherConfig>, matcher: Arc<Matcher>) -> Self {
        Self {
            fs,
            config,
            matcher,
        }
    }

    /// The watch root.
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Take one full walk of the root. Blocks on file system IO.
    ///
    /// Every entry is returned; the matcher is applied when diffing. A walk
    /// that cannot complete fails as [`ConnectorError::TransientScan`].
    pub fn scan(&self) -> Result<Vec<PathAttributes>> {
        self.fs
            .list(&self.config.root, &self.config.walk_options())
            .map_err(|err| ConnectorError::TransientScan {
                path: self.config.root.clone(),
                source: Box::new(err),
            })
    }

    /// Seed `snapshot` with a baseline walk.
    pub fn seed(&self, snapshot: &mut DirectorySnapshot, entries: Vec<PathAttributes>) {
        let now = Utc::now();
        snapshot.seed_matching(entries, |entry| self.matcher.matches_at(entry, now));
    }

    /// Diff a walk against `snapshot`, keeping only records that pass the
    /// matcher.
    pub fn diff(
        &self,
        snapshot: &mut DirectorySnapshot,
        entries: Vec<PathAttributes>,
    ) -> Vec<ChangeRecord> {
        let now = Utc::now();
        snapshot.update_matching(entries, |entry| self.matcher.matches_at(entry, now))
    }
}

impl fmt::Debug for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("root", &self.config.root)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

/// Counters kept by a running watcher.
#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    scan_failures: AtomicU64,
}

/// Statistics about a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherStats {
    /// Completed scan cycles, successful or not.
    pub cycles: u64,

    /// Events handed to the sink.
    pub events_dispatched: u64,

    /// Events dropped because the entry vanished before dispatch.
    pub events_dropped: u64,

    /// Scan cycles that failed and left the snapshot untouched.
    pub scan_failures: u64,
}

/// Resources of a running scan task.
struct ScanTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    _notifier: Option<RecommendedWatcher>,
}

/// Watches one directory tree and sends [`WatchEvent`]s to a caller-owned sink.
pub struct DirectoryWatcher {
    config: Arc<WatcherConfig>,
    matcher: Arc<Matcher>,
    fs: Arc<dyn FileSystem>,
    sink: mpsc::Sender<WatchEvent>,
    state: Arc<RwLock<WatcherState>>,
    counters: Arc<Counters>,
    task: Option<ScanTask>,
}

impl DirectoryWatcher {
    /// Create a watcher. The config is validated here.
    pub fn new(
        config: WatcherConfig,
        fs: Arc<dyn FileSystem>,
        sink: mpsc::Sender<WatchEvent>,
    ) -> Result<Self> {
        let matcher = config.validate()?;

        Ok(Self {
            config: Arc::new(config),
            matcher: Arc::new(matcher),
            fs,
            sink,
            state: Arc::new(RwLock::new(WatcherState::Stopped)),
            counters: Arc::new(Counters::default()),
            task: None,
        })
    }

    /// Configuration the watcher was created with.
    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> WatcherState {
        *self.state.read().await
    }

    /// Check if the watcher is running.
    pub async fn is_running(&self) -> bool {
        self.state().await == WatcherState::Running
    }

    /// Get statistics about the watcher.
    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            events_dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            events_dropped: self.counters.dropped.load(Ordering::Relaxed),
            scan_failures: self.counters.scan_failures.load(Ordering::Relaxed),
        }
    }

    fn scanner(&self) -> Scanner {
        Scanner::new(self.fs.clone(), self.config.clone(), self.matcher.clone())
    }

    /// Start watching.
    ///
    /// Seeds the snapshot from a baseline scan without emitting events for
    /// entries that already exist. Fails, and leaves the watcher stopped,
    /// when the root is missing, unreadable or not a directory.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != WatcherState::Stopped {
                return Err(ConnectorError::InvalidState {
                    state: *state,
                    operation: "start",
                });
            }
            *state = WatcherState::Starting;
        }

        match self.launch().await {
            Ok(task) => {
                self.task = Some(task);
                *self.state.write().await = WatcherState::Running;
                info!(root = %self.config.root.display(), "directory watcher started");
                Ok(())
            }
            Err(err) => {
                *self.state.write().await = WatcherState::Stopped;
                error!(root = %self.config.root.display(), "failed to start watcher: {err}");
                Err(err)
            }
        }
    }

    async fn launch(&self) -> Result<ScanTask> {
        let root = self.config.root.clone();
        let metadata = tokio::fs::metadata(&root).await.map_err(|err| {
            match ConnectorError::from_io(&root, err) {
                ConnectorError::NotFound(path) => ConnectorError::Configuration(format!(
                    "watch root '{}' does not exist",
                    path.display()
                )),
                other => other,
            }
        })?;
        if !metadata.is_dir() {
            return Err(ConnectorError::Configuration(format!(
                "watch root '{}' is not a directory",
                root.display()
            )));
        }

        let scanner = self.scanner();
        let baseline = tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(|err| ConnectorError::Configuration(format!("baseline scan aborted: {err}")))??;

        let mut snapshot = DirectorySnapshot::new();
        self.scanner().seed(&mut snapshot, baseline);

        let (notifier, triggers) = match self.config.watch_mode {
            WatchMode::Poll => (None, None),
            WatchMode::Notify => {
                let (notifier, triggers) = self.notifier()?;
                (Some(notifier), Some(triggers))
            }
        };

        let cancel = CancellationToken::new();
        let cycle = ScanCycle {
            scanner: self.scanner(),
            config: self.config.clone(),
            fs: self.fs.clone(),
            sink: self.sink.clone(),
            counters: self.counters.clone(),
        };
        let handle = tokio::spawn(cycle.run(snapshot, cancel.clone(), triggers));

        Ok(ScanTask {
            cancel,
            handle,
            _notifier: notifier,
        })
    }

    /// OS notifications only wake the scan loop; the snapshot diff decides
    /// what changed.
    fn notifier(&self) -> Result<(RecommendedWatcher, mpsc::Receiver<()>)> {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let mut notifier = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(_) => {
                    // A full channel already holds a pending wake-up.
                    let _ = trigger_tx.try_send(());
                }
                Err(e) => warn!("notify error: {e}"),
            },
        )?;

        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        notifier.watch(&self.config.root, mode)?;
        debug!(root = %self.config.root.display(), "registered OS notifications");

        Ok((notifier, trigger_rx))
    }

    /// Stop watching.
    ///
    /// A cycle in progress runs to completion first, so a delete/create pair
    /// is never split across the stop. No event is dispatched once this
    /// returns.
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != WatcherState::Running {
                return Err(ConnectorError::InvalidState {
                    state: *state,
                    operation: "stop",
                });
            }
            *state = WatcherState::Stopping;
        }

        if let Some(task) = self.task.take() {
            task.cancel.cancel();
            if let Err(err) = task.handle.await {
                error!("scan task ended abnormally: {err}");
            }
        }

        *self.state.write().await = WatcherState::Stopped;
        info!(root = %self.config.root.display(), "directory watcher stopped");
        Ok(())
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
        }
    }
}

/// Everything the scan task needs; moved into the task on start.
struct ScanCycle {
    scanner: Scanner,
    config: Arc<WatcherConfig>,
    fs: Arc<dyn FileSystem>,
    sink: mpsc::Sender<WatchEvent>,
    counters: Arc<Counters>,
}

impl ScanCycle {
    async fn run(
        self,
        mut snapshot: DirectorySnapshot,
        cancel: CancellationToken,
        mut triggers: Option<mpsc::Receiver<()>>,
    ) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the baseline already covers it.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                Some(()) = next_trigger(&mut triggers) => {}
            }

            if !self.run_once(&mut snapshot).await {
                info!(root = %self.scanner.root().display(), "event sink closed, ending scan task");
                break;
            }
        }
        debug!(root = %self.scanner.root().display(), "scan task finished");
    }

    /// One walk-diff-dispatch pass. Returns false once the sink is gone.
    async fn run_once(&self, snapshot: &mut DirectorySnapshot) -> bool {
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);

        let scanner = self.scanner.clone();
        let entries = match tokio::task::spawn_blocking(move || scanner.scan()).await {
            Ok(Ok(entries)) => entries,
            Ok(Err(err)) => {
                self.counters.scan_failures.fetch_add(1, Ordering::Relaxed);
                warn!(root = %self.scanner.root().display(), "scan failed, retrying next cycle: {err}");
                return true;
            }
            Err(err) => {
                self.counters.scan_failures.fetch_add(1, Ordering::Relaxed);
                error!(root = %self.scanner.root().display(), "scan task panicked: {err}");
                return true;
            }
        };

        for record in self.scanner.diff(snapshot, entries) {
            if !self.dispatch(record).await {
                return false;
            }
        }
        true
    }

    async fn dispatch(&self, record: ChangeRecord) -> bool {
        let path = record.attributes.absolute_path().to_path_buf();
        let payload = if self.wants_payload(&record) {
            match self.open_payload(path.clone()).await {
                Ok(payload) => Some(payload),
                Err(err) if err.is_benign() => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(path = %path.display(), kind = ?record.kind, "entry vanished before dispatch, dropping event");
                    return true;
                }
                Err(err) => {
                    warn!(path = %path.display(), kind = ?record.kind, "delivering event without payload: {err}");
                    None
                }
            }
        } else {
            None
        };

        debug!(path = %path.display(), kind = ?record.kind, "dispatching event");
        if self.sink.send(WatchEvent::new(record, payload)).await.is_err() {
            return false;
        }
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn wants_payload(&self, record: &ChangeRecord) -> bool {
        self.config.deliver_payload && record.kind != ChangeKind::Delete && !record.is_directory()
    }

    async fn open_payload(&self, path: PathBuf) -> Result<FilePayload> {
        let fs = self.fs.clone();
        let lock = self.config.lock_on_read;
        let policy = self.config.lock_policy;
        let target = path.clone();
        tokio::task::spawn_blocking(move || policy.acquire(|| fs.open(&path, lock)))
            .await
            .map_err(|err| ConnectorError::Io {
                path: target,
                source: std::io::Error::other(err),
            })?
    }
}

async fn next_trigger(triggers: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match triggers {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
