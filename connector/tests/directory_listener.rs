//! End-to-end tests for the directory watcher.
//!
//! Files are staged outside the watch root and renamed in, so a scan never
//! observes a half-written file.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fileconn_connector::{
    ChangeKind, DirectorySnapshot, DirectoryWatcher, LocalFileSystem, LockPolicy, MatcherConfig,
    Scanner, WatchEvent, WatchMode, WatcherConfig,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::mpsc;

const WATCH_FILE: &str = "watchme.txt";
const WATCH_CONTENT: &str = "who watches the watchmen?";
const CREATED_FOLDER: &str = "createdFolder";
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(300);

struct Fixture {
    _temp_dir: TempDir,
    root: PathBuf,
    staging: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("watched");
        let staging = temp_dir.path().join("staging");
        fs::create_dir(&root).unwrap();
        fs::create_dir(&staging).unwrap();
        Self {
            _temp_dir: temp_dir,
            root,
            staging,
        }
    }

    fn config(&self) -> WatcherConfig {
        WatcherConfig::new(&self.root).with_poll_interval(Duration::from_millis(25))
    }

    /// Write `content` to `relative` under the root in one atomic step.
    fn put(&self, relative: &str, content: &str) {
        let staged = self.staging.join(relative.replace('/', "_"));
        fs::write(&staged, content).unwrap();
        fs::rename(&staged, self.root.join(relative)).unwrap();
    }

    fn append(&self, relative: &str, content: &str) {
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.root.join(relative))
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn start(&self, config: WatcherConfig) -> (DirectoryWatcher, mpsc::Receiver<WatchEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let watcher = DirectoryWatcher::new(config, Arc::new(LocalFileSystem::new()), tx).unwrap();
        (watcher, rx)
    }
}

async fn listen(rx: &mut mpsc::Receiver<WatchEvent>) -> WatchEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("event was not received")
        .expect("event sink closed")
}

async fn assert_quiet(rx: &mut mpsc::Receiver<WatchEvent>) {
    if let Ok(Some(event)) = tokio::time::timeout(QUIET_PERIOD, rx.recv()).await {
        panic!("unexpected event: {:?}", event.record);
    }
}

fn assert_event(event: &WatchEvent, kind: ChangeKind, name: &str) {
    assert_eq!(event.kind(), kind, "wrong kind for {:?}", event.record);
    assert_eq!(event.attributes().file_name(), name);
}

fn read_payload(event: WatchEvent) -> Option<String> {
    event.payload.map(|payload| payload.into_string().unwrap())
}

#[tokio::test]
async fn on_file_created() {
    let fixture = Fixture::new();
    let (mut watcher, mut rx) = fixture.start(fixture.config());
    watcher.start().await.unwrap();

    fixture.put(WATCH_FILE, WATCH_CONTENT);
    let event = listen(&mut rx).await;
    assert_event(&event, ChangeKind::Create, WATCH_FILE);
    assert_eq!(read_payload(event).as_deref(), Some(WATCH_CONTENT));

    assert_quiet(&mut rx).await;
    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn on_file_updated_then_deleted() {
    let fixture = Fixture::new();
    let (mut watcher, mut rx) = fixture.start(fixture.config());
    watcher.start().await.unwrap();

    fixture.put(WATCH_FILE, WATCH_CONTENT);
    assert_event(&listen(&mut rx).await, ChangeKind::Create, WATCH_FILE);

    fixture.append(WATCH_FILE, "\nNOBODY");
    let event = listen(&mut rx).await;
    assert_event(&event, ChangeKind::Update, WATCH_FILE);
    assert_eq!(
        read_payload(event),
        Some(format!("{WATCH_CONTENT}\nNOBODY"))
    );

    fs::remove_file(fixture.path(WATCH_FILE)).unwrap();
    let event = listen(&mut rx).await;
    assert_event(&event, ChangeKind::Delete, WATCH_FILE);
    assert!(event.payload.is_none());

    assert_quiet(&mut rx).await;
    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn preexisting_entries_are_baseline() {
    let fixture = Fixture::new();
    fixture.put("old.txt", "already here");
    fs::create_dir(fixture.path("old-dir")).unwrap();

    let (mut watcher, mut rx) = fixture.start(fixture.config());
    watcher.start().await.unwrap();
    assert_quiet(&mut rx).await;

    let stats = watcher.stats();
    assert!(stats.cycles > 0);
    assert_eq!(stats.events_dispatched, 0);
    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn on_directory_created_renamed_and_deleted() {
    let fixture = Fixture::new();
    let (mut watcher, mut rx) = fixture.start(fixture.config());
    watcher.start().await.unwrap();

    fs::create_dir(fixture.path(CREATED_FOLDER)).unwrap();
    let event = listen(&mut rx).await;
    assert_event(&event, ChangeKind::Create, CREATED_FOLDER);
    assert!(event.payload.is_none());

    let renamed = format!("{CREATED_FOLDER}twist");
    fs::rename(fixture.path(CREATED_FOLDER), fixture.path(&renamed)).unwrap();
    assert_event(&listen(&mut rx).await, ChangeKind::Delete, CREATED_FOLDER);
    assert_event(&listen(&mut rx).await, ChangeKind::Create, &renamed);

    fs::remove_dir_all(fixture.path(&renamed)).unwrap();
    assert_event(&listen(&mut rx).await, ChangeKind::Delete, &renamed);

    assert_quiet(&mut rx).await;
    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn on_create_file_at_subfolder() {
    let fixture = Fixture::new();
    let (mut watcher, mut rx) = fixture.start(fixture.config());
    watcher.start().await.unwrap();

    fs::create_dir(fixture.path(CREATED_FOLDER)).unwrap();
    assert_event(&listen(&mut rx).await, ChangeKind::Create, CREATED_FOLDER);

    fixture.put(&format!("{CREATED_FOLDER}/child.txt"), WATCH_CONTENT);
    let child = listen(&mut rx).await;
    assert_event(&child, ChangeKind::Create, "child.txt");
    assert_event(&listen(&mut rx).await, ChangeKind::Update, CREATED_FOLDER);

    fs::remove_dir_all(fixture.path(CREATED_FOLDER)).unwrap();
    assert_event(&listen(&mut rx).await, ChangeKind::Delete, "child.txt");
    assert_event(&listen(&mut rx).await, ChangeKind::Delete, CREATED_FOLDER);

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn matcher_excludes_entries() {
    let fixture = Fixture::new();
    let config = fixture
        .config()
        .with_matcher(MatcherConfig::new().include("matchme*").exclude("*.tmp"));
    let (mut watcher, mut rx) = fixture.start(config);
    watcher.start().await.unwrap();

    fixture.put("ignored.txt", "nope");
    fixture.put("matchme.tmp", "nope");
    fixture.put("matchme.txt", "");

    let event = listen(&mut rx).await;
    assert_event(&event, ChangeKind::Create, "matchme.txt");

    fixture.append("ignored.txt", "still nope");
    fs::remove_file(fixture.path("matchme.tmp")).unwrap();
    assert_quiet(&mut rx).await;

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn notify_mode_scans_without_waiting_for_interval() {
    let fixture = Fixture::new();
    let config = fixture
        .config()
        .with_mode(WatchMode::Notify)
        .with_poll_interval(Duration::from_secs(60));
    let (mut watcher, mut rx) = fixture.start(config);
    watcher.start().await.unwrap();

    fixture.put(WATCH_FILE, WATCH_CONTENT);
    let event = listen(&mut rx).await;
    assert_event(&event, ChangeKind::Create, WATCH_FILE);
    assert_eq!(read_payload(event).as_deref(), Some(WATCH_CONTENT));

    fs::remove_file(fixture.path(WATCH_FILE)).unwrap();
    assert_event(&listen(&mut rx).await, ChangeKind::Delete, WATCH_FILE);

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn stop_ends_dispatch() {
    let fixture = Fixture::new();
    let (mut watcher, mut rx) = fixture.start(fixture.config());
    watcher.start().await.unwrap();
    watcher.stop().await.unwrap();

    fixture.put(WATCH_FILE, WATCH_CONTENT);
    fs::create_dir(fixture.path(CREATED_FOLDER)).unwrap();
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn stop_mid_activity_neither_loses_nor_duplicates() {
    let fixture = Fixture::new();
    let (mut watcher, mut rx) = fixture.start(fixture.config());
    watcher.start().await.unwrap();

    for i in 0..50 {
        fixture.put(&format!("file-{i}.txt"), "x");
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    watcher.stop().await.unwrap();

    let mut seen = HashSet::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.kind(), ChangeKind::Create);
        assert!(
            seen.insert(event.attributes().file_name().to_string()),
            "duplicate event for {}",
            event.attributes().file_name()
        );
    }

    // Whatever was not reported before the stop is baseline after a restart.
    watcher.start().await.unwrap();
    assert_quiet(&mut rx).await;
    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn independent_watchers_do_not_share_state() {
    let first = Fixture::new();
    let second = Fixture::new();
    let (mut a, mut rx_a) = first.start(first.config());
    let (mut b, mut rx_b) = second.start(second.config());
    a.start().await.unwrap();
    b.start().await.unwrap();

    first.put("only-a.txt", "a");
    assert_event(&listen(&mut rx_a).await, ChangeKind::Create, "only-a.txt");
    assert_quiet(&mut rx_b).await;

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn payload_is_locked_until_consumed() {
    let fixture = Fixture::new();
    let config = fixture.config().lock_on_read(LockPolicy::FailFast);
    let (mut watcher, mut rx) = fixture.start(config);
    watcher.start().await.unwrap();

    fixture.put(WATCH_FILE, WATCH_CONTENT);
    let event = listen(&mut rx).await;
    let payload = event.payload.as_ref().unwrap();
    assert!(payload.lock().is_locked());

    let fs = LocalFileSystem::new();
    assert!(fileconn_connector::FileSystem::lock(&fs, &fixture.path(WATCH_FILE)).is_err());

    drop(event);
    assert!(fileconn_connector::FileSystem::lock(&fs, &fixture.path(WATCH_FILE)).is_ok());
    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn missing_root_never_reaches_running() {
    let fixture = Fixture::new();
    let config = WatcherConfig::new(fixture.path("not-there"));
    let (mut watcher, _rx) = fixture.start(config);

    assert!(watcher.start().await.is_err());
    assert!(!watcher.is_running().await);
}

#[tokio::test]
async fn root_disappearing_is_transient() {
    let fixture = Fixture::new();
    fixture.put("a.txt", "x");
    let (mut watcher, mut rx) = fixture.start(fixture.config());
    watcher.start().await.unwrap();

    let parked = fixture.staging.join("parked");
    fs::rename(&fixture.root, &parked).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(watcher.stats().scan_failures > 0);
    assert!(watcher.is_running().await);

    // Snapshot was left alone, so bringing the tree back reports nothing.
    fs::rename(&parked, &fixture.root).unwrap();
    assert_quiet(&mut rx).await;
    watcher.stop().await.unwrap();
}

/// Drive one scan cycle by hand.
fn scan(scanner: &Scanner, snapshot: &mut DirectorySnapshot) -> Vec<(ChangeKind, String)> {
    scanner
        .diff(snapshot, scanner.scan().unwrap())
        .into_iter()
        .map(|record| (record.kind, record.attributes.relative_path_string()))
        .collect()
}

fn scanner(root: &Path) -> Scanner {
    scanner_with(WatcherConfig::new(root))
}

fn scanner_with(config: WatcherConfig) -> Scanner {
    let matcher = config.validate().unwrap();
    Scanner::new(
        Arc::new(LocalFileSystem::new()),
        Arc::new(config),
        Arc::new(matcher),
    )
}

#[test]
fn scan_lifecycle_of_one_file() {
    let fixture = Fixture::new();
    let scanner = scanner(&fixture.root);
    let mut snapshot = DirectorySnapshot::new();
    scanner.seed(&mut snapshot, scanner.scan().unwrap());

    fixture.put("a.txt", "X");
    assert_eq!(
        scan(&scanner, &mut snapshot),
        vec![(ChangeKind::Create, "a.txt".to_string())]
    );
    assert!(snapshot.contains(Path::new("a.txt")));
    assert!(scan(&scanner, &mut snapshot).is_empty());

    fixture.append("a.txt", "Y");
    assert_eq!(
        scan(&scanner, &mut snapshot),
        vec![(ChangeKind::Update, "a.txt".to_string())]
    );

    fs::remove_file(fixture.path("a.txt")).unwrap();
    assert_eq!(
        scan(&scanner, &mut snapshot),
        vec![(ChangeKind::Delete, "a.txt".to_string())]
    );
    assert!(!snapshot.contains(Path::new("a.txt")));
}

#[test]
fn rename_between_scans_is_delete_then_create() {
    let fixture = Fixture::new();
    let scanner = scanner(&fixture.root);
    let mut snapshot = DirectorySnapshot::new();

    fs::create_dir(fixture.path("dir")).unwrap();
    scanner.seed(&mut snapshot, scanner.scan().unwrap());

    fs::rename(fixture.path("dir"), fixture.path("dir2")).unwrap();
    assert_eq!(
        scan(&scanner, &mut snapshot),
        vec![
            (ChangeKind::Delete, "dir".to_string()),
            (ChangeKind::Create, "dir2".to_string()),
        ]
    );
}

#[test]
fn file_outgrowing_size_bound_is_not_reported_deleted() {
    let fixture = Fixture::new();
    let scanner = scanner_with(
        WatcherConfig::new(&fixture.root).with_matcher(MatcherConfig::new().with_size(None, Some(5))),
    );
    let mut snapshot = DirectorySnapshot::new();
    scanner.seed(&mut snapshot, scanner.scan().unwrap());

    fixture.put("a.txt", "abc");
    assert_eq!(
        scan(&scanner, &mut snapshot),
        vec![(ChangeKind::Create, "a.txt".to_string())]
    );

    fixture.append("a.txt", "defghijkl");
    assert!(fixture.path("a.txt").exists());
    assert!(scan(&scanner, &mut snapshot).is_empty());
    assert!(snapshot.contains(Path::new("a.txt")));

    fs::remove_file(fixture.path("a.txt")).unwrap();
    assert!(scan(&scanner, &mut snapshot).is_empty());
}
