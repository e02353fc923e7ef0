//! Configuration types for directory watching.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};
use crate::fs::WalkOptions;
use crate::lock::LockPolicy;
use crate::matcher::{Matcher, MatcherConfig};

/// Configuration for one watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Path to the watch root.
    pub root: PathBuf,

    /// Whether to descend into subdirectories.
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Maximum depth to recurse (None = unlimited). Ignored when not recursive.
    #[serde(default)]
    pub max_depth: Option<usize>,

    /// What triggers a scan cycle.
    #[serde(default)]
    pub watch_mode: WatchMode,

    /// Interval between scan cycles, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Rules an entry must pass to produce events.
    #[serde(default)]
    pub matcher: MatcherConfig,

    /// Whether payloads are opened under an exclusive lock.
    #[serde(default)]
    pub lock_on_read: bool,

    /// What to do when the lock is held elsewhere.
    #[serde(default)]
    pub lock_policy: LockPolicy,

    /// Whether creates and updates of files carry the file content.
    #[serde(default = "default_true")]
    pub deliver_payload: bool,

    /// Whether to follow symbolic links.
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl WatcherConfig {
    /// Create a new watcher config with defaults.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: true,
            max_depth: None,
            watch_mode: WatchMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            matcher: MatcherConfig::default(),
            lock_on_read: false,
            lock_policy: LockPolicy::default(),
            deliver_payload: true,
            follow_symlinks: false,
        }
    }

    /// Parse a config from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|err| ConnectorError::from_io(path, err))?;
        Self::from_toml_str(&content)
    }

    /// Set the watch mode.
    pub fn with_mode(mut self, mode: WatchMode) -> Self {
        self.watch_mode = mode;
        self
    }

    /// Enable or disable recursion.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Set the maximum depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the matcher rules.
    pub fn with_matcher(mut self, matcher: MatcherConfig) -> Self {
        self.matcher = matcher;
        self
    }

    /// Lock payloads while they are read.
    pub fn lock_on_read(mut self, policy: LockPolicy) -> Self {
        self.lock_on_read = true;
        self.lock_policy = policy;
        self
    }

    /// Deliver events without file content.
    pub fn without_payload(mut self) -> Self {
        self.deliver_payload = false;
        self
    }

    /// Enable following symbolic links.
    pub fn follow_symlinks(mut self) -> Self {
        self.follow_symlinks = true;
        self
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// How far scans walk.
    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            max_depth: if self.recursive { self.max_depth } else { Some(1) },
            follow_symlinks: self.follow_symlinks,
        }
    }

    /// Check the config and compile its matcher.
    pub fn validate(&self) -> Result<Matcher> {
        if self.root.as_os_str().is_empty() {
            return Err(ConnectorError::Configuration(
                "watch root must not be empty".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConnectorError::Configuration(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_depth == Some(0) {
            return Err(ConnectorError::Configuration(
                "max_depth must be at least 1".to_string(),
            ));
        }
        if let LockPolicy::Retry { interval_ms: 0, .. } = self.lock_policy {
            return Err(ConnectorError::Configuration(
                "lock retry interval_ms must be greater than zero".to_string(),
            ));
        }
        self.matcher.compile()
    }
}

/// What triggers a scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// Scan on a fixed interval.
    #[default]
    Poll,

    /// Scan when the OS reports activity, and on the interval as a fallback.
    Notify,
}
