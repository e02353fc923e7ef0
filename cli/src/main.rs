//! # fileconn
//!
//! Command line front end for the file connector.
//!
//! ## Usage
//!
//! ```text
//! fileconn watch ./inbox --interval-ms 500 --include '*.csv'
//! fileconn watch --config watcher.toml
//! fileconn list ./inbox --recursive --sort size --order ascending --limit 20
//! fileconn read ./inbox/report.csv --lock
//! ```
//!
//! `watch` prints one JSON change record per line on stdout. Logs go to
//! stderr and are filtered with `RUST_LOG`.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fileconn_connector::{
    DirectoryWatcher, FileOperations, ListComparator, LocalFileSystem, LockPolicy, MatcherConfig,
    SortOrder, SubsetList, WatchEvent, WatchMode, WatcherConfig,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fileconn", about = "Watch, list and read local files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch a directory and print change records as JSON lines.
    Watch(WatchArgs),

    /// List the entries of a directory.
    List(ListArgs),

    /// Print the content of a file.
    Read(ReadArgs),
}

#[derive(Debug, clap::Args)]
struct WatchArgs {
    /// Directory to watch. Overrides the root from `--config`.
    root: Option<PathBuf>,

    /// TOML file with a watcher configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scan interval in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Only watch the top level of the root.
    #[arg(long)]
    shallow: bool,

    /// Use OS notifications to trigger scans between intervals.
    #[arg(long)]
    notify: bool,

    /// Filename glob to include (repeatable).
    #[arg(long = "include")]
    include: Vec<String>,

    /// Filename glob to exclude (repeatable).
    #[arg(long = "exclude")]
    exclude: Vec<String>,

    /// Print file contents along with each record.
    #[arg(long)]
    content: bool,
}

#[derive(Debug, clap::Args)]
struct ListArgs {
    #[arg(default_value = ".")]
    directory: PathBuf,

    #[arg(long, short)]
    recursive: bool,

    /// Maximum number of entries (0 = no limit).
    #[arg(long, default_value_t = 0)]
    limit: usize,

    #[arg(long, default_value_t = 0)]
    offset: usize,

    #[arg(long, value_enum, default_value_t = SortKey::Modified)]
    sort: SortKey,

    #[arg(long, value_enum, default_value_t = Direction::Descending)]
    order: Direction,
}

#[derive(Debug, clap::Args)]
struct ReadArgs {
    file: PathBuf,

    /// Hold an exclusive lock while reading.
    #[arg(long)]
    lock: bool,

    /// Retry a held lock this many times, 100ms apart.
    #[arg(long, default_value_t = 0)]
    retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SortKey {
    Modified,
    Created,
    Size,
    Path,
}

impl From<SortKey> for ListComparator {
    fn from(key: SortKey) -> Self {
        match key {
            SortKey::Modified => ListComparator::DateModified,
            SortKey::Created => ListComparator::DateCreated,
            SortKey::Size => ListComparator::Size,
            SortKey::Path => ListComparator::Path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Direction {
    Ascending,
    Descending,
}

impl From<Direction> for SortOrder {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Ascending => SortOrder::Ascending,
            Direction::Descending => SortOrder::Descending,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they don't interfere with records on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("fileconn_connector=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Watch(args) => watch(args).await,
        Command::List(args) => list(args),
        Command::Read(args) => read(args),
    }
}

impl WatchArgs {
    fn into_config(self) -> Result<WatcherConfig> {
        let mut config = match &self.config {
            Some(path) => WatcherConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => {
                let root = self
                    .root
                    .clone()
                    .context("either a root directory or --config is required")?;
                WatcherConfig::new(root)
            }
        };

        if let Some(root) = self.root {
            config.root = root;
        }
        if let Some(interval) = self.interval_ms {
            config = config.with_poll_interval(Duration::from_millis(interval));
        }
        if self.shallow {
            config = config.recursive(false);
        }
        if self.notify {
            config = config.with_mode(WatchMode::Notify);
        }
        if !self.include.is_empty() || !self.exclude.is_empty() {
            let mut matcher = MatcherConfig::new();
            matcher.filename_patterns = self.include;
            matcher.exclude_patterns = self.exclude;
            config = config.with_matcher(matcher);
        }
        if !self.content {
            config = config.without_payload();
        }
        Ok(config)
    }
}

async fn watch(args: WatchArgs) -> Result<()> {
    let config = args.into_config()?;
    let (tx, mut rx) = mpsc::channel(256);
    let mut watcher = DirectoryWatcher::new(config, Arc::new(LocalFileSystem::new()), tx)?;
    watcher.start().await?;

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                let line = record_line(event)?;
                writeln!(stdout, "{line}")?;
                stdout.flush()?;
            }
        }
    }

    watcher.stop().await?;
    let stats = watcher.stats();
    tracing::info!(
        cycles = stats.cycles,
        dispatched = stats.events_dispatched,
        dropped = stats.events_dropped,
        "watch finished"
    );
    Ok(())
}

/// Render an event as one JSON object. File content that cannot be read is
/// left out; content that is not UTF-8 is converted lossily.
fn record_line(event: WatchEvent) -> Result<serde_json::Value> {
    let mut line = serde_json::to_value(&event.record)?;
    if let Some(payload) = event.payload {
        match payload.into_bytes() {
            Ok(bytes) => {
                line["content"] =
                    serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned());
            }
            Err(err) => tracing::warn!("skipping content: {err}"),
        }
    }
    Ok(line)
}

fn list(args: ListArgs) -> Result<()> {
    let operations = FileOperations::new(Arc::new(LocalFileSystem::new()), std::env::current_dir()?);
    let subset = SubsetList::new(args.limit, args.offset).sorted_by(args.sort.into(), args.order.into());
    let entries = operations.list(&args.directory, args.recursive, None, Some(&subset))?;

    let mut stdout = std::io::stdout();
    for entry in entries {
        let kind = if entry.is_directory() { "dir " } else { "file" };
        writeln!(
            stdout,
            "{kind} {:>12} {} {}",
            entry.size(),
            entry.last_modified().format("%Y-%m-%d %H:%M:%S"),
            entry.absolute_path().display()
        )?;
    }
    Ok(())
}

fn read(args: ReadArgs) -> Result<()> {
    let policy = if args.retries > 0 {
        LockPolicy::Retry {
            attempts: args.retries,
            interval_ms: 100,
        }
    } else {
        LockPolicy::FailFast
    };
    let operations = FileOperations::new(Arc::new(LocalFileSystem::new()), std::env::current_dir()?)
        .with_lock_policy(policy);

    let result = operations.read(&args.file, args.lock)?;
    tracing::debug!(media_type = %result.media_type, size = result.attributes.size(), "read file");
    let bytes = result.payload.into_bytes()?;
    std::io::stdout().write_all(&bytes)?;
    Ok(())
}
