//! Last known state of a watched tree and change detection against it.
//!
//! Entries are keyed by relative path. A scan produces the full set of
//! current entries; [`DirectorySnapshot::update`] diffs it against the stored
//! state and replaces the state in one step.
//!
//! Renames are not inferred: a moved path shows up as a delete of the old
//! path and a create of the new one in the same cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::attributes::PathAttributes;
use crate::event::{ChangeKind, ChangeRecord};

#[derive(Debug, Clone)]
struct SnapshotEntry {
    attributes: PathAttributes,
    /// Names of the immediate children that pass the matcher; only populated
    /// for directories.
    children: BTreeSet<OsString>,
    /// Whether the entry passed the matcher in the scan it came from.
    matched: bool,
    /// Whether the sink has been told about the entry (a CREATE went out, or
    /// it was part of the baseline).
    reported: bool,
}

impl SnapshotEntry {
    fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    fn kind_differs(&self, other: &SnapshotEntry) -> bool {
        self.is_directory() != other.is_directory()
    }

    /// A directory changes when its children change, a file when its size or
    /// modification time does. Directory timestamps are ignored.
    fn differs_from(&self, other: &SnapshotEntry) -> bool {
        if self.is_directory() {
            self.children != other.children
        } else {
            self.attributes.size() != other.attributes.size()
                || self.attributes.last_modified() != other.attributes.last_modified()
        }
    }

    fn record(&self, kind: ChangeKind, timestamp: DateTime<Utc>) -> ChangeRecord {
        ChangeRecord::new(kind, self.attributes.clone(), timestamp)
    }
}

/// In-memory mirror of a watched tree.
///
/// Every entry the walk returns is tracked, whether or not it passes the
/// matcher, so an entry that stops matching is not mistaken for one that
/// disappeared.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    entries: BTreeMap<PathBuf, SnapshotEntry>,
}

impl DirectorySnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the state with `current` without reporting any change.
    pub fn seed(&mut self, current: impl IntoIterator<Item = PathAttributes>) {
        self.seed_matching(current, |_| true);
    }

    /// Replace the state with `current` without reporting any change.
    ///
    /// Used for the baseline scan when a watcher starts. Entries that fail
    /// `accept` are tracked but count as unreported, so they produce a CREATE
    /// once they start to match.
    pub fn seed_matching(
        &mut self,
        current: impl IntoIterator<Item = PathAttributes>,
        accept: impl Fn(&PathAttributes) -> bool,
    ) {
        self.entries = Self::index(current, &accept);
        for entry in self.entries.values_mut() {
            entry.reported = entry.matched;
        }
        debug!(entries = self.entries.len(), "seeded directory snapshot");
    }

    /// Diff `current` against the stored state, store it, and return the
    /// changes.
    pub fn update(&mut self, current: impl IntoIterator<Item = PathAttributes>) -> Vec<ChangeRecord> {
        self.update_matching(current, |_| true)
    }

    /// Diff `current` against the stored state, store it, and return the
    /// changes that pass `accept`.
    ///
    /// Records come out as deletes (deepest path first), then creates
    /// (parents before children), then updates. An entry whose type flipped
    /// between file and directory is reported as a delete plus a create.
    /// Creates and updates are checked against the current attributes,
    /// deletes against the last known ones. An entry that stops matching
    /// stays in the snapshot and produces no record.
    pub fn update_matching(
        &mut self,
        current: impl IntoIterator<Item = PathAttributes>,
        accept: impl Fn(&PathAttributes) -> bool,
    ) -> Vec<ChangeRecord> {
        let mut next = Self::index(current, &accept);
        let now = Utc::now();

        let mut records: Vec<ChangeRecord> = self
            .entries
            .iter()
            .rev()
            .filter(|(path, old)| next.get(*path).is_none_or(|new| old.kind_differs(new)))
            .filter(|(_, old)| old.reported && accept(&old.attributes))
            .map(|(_, old)| old.record(ChangeKind::Delete, now))
            .collect();

        let mut updates = Vec::new();
        for (path, new) in &mut next {
            let old = self
                .entries
                .get(path)
                .filter(|old| !old.kind_differs(new));
            let known = old.is_some_and(|old| old.reported);
            new.reported = known || new.matched;
            if !new.matched {
                continue;
            }

            match old {
                Some(old) if known => {
                    if old.differs_from(new) {
                        updates.push(new.record(ChangeKind::Update, now));
                    }
                }
                _ => records.push(new.record(ChangeKind::Create, now)),
            }
        }
        records.extend(updates);
        self.entries = next;

        if !records.is_empty() {
            debug!(
                changes = records.len(),
                entries = self.entries.len(),
                "snapshot updated"
            );
        }
        records
    }

    fn index(
        current: impl IntoIterator<Item = PathAttributes>,
        accept: &impl Fn(&PathAttributes) -> bool,
    ) -> BTreeMap<PathBuf, SnapshotEntry> {
        let mut entries: BTreeMap<PathBuf, SnapshotEntry> = current
            .into_iter()
            .map(|attributes| {
                (
                    attributes.relative_path().to_path_buf(),
                    SnapshotEntry {
                        matched: accept(&attributes),
                        attributes,
                        children: BTreeSet::new(),
                        reported: false,
                    },
                )
            })
            .collect();

        let links: Vec<(PathBuf, OsString)> = entries
            .iter()
            .filter(|(_, entry)| entry.matched)
            .filter_map(|(path, _)| {
                let parent = path.parent()?;
                let name = path.file_name()?;
                (!parent.as_os_str().is_empty()).then(|| (parent.to_path_buf(), name.to_owned()))
            })
            .collect();

        for (parent, name) in links {
            if let Some(entry) = entries.get_mut(&parent) {
                if entry.is_directory() {
                    entry.children.insert(name);
                }
            }
        }

        entries
    }

    /// Last known attributes of a relative path.
    pub fn get(&self, relative_path: &Path) -> Option<&PathAttributes> {
        self.entries.get(relative_path).map(|entry| &entry.attributes)
    }

    /// Check if a relative path is tracked.
    pub fn contains(&self, relative_path: &Path) -> bool {
        self.entries.contains_key(relative_path)
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Relative paths currently tracked, in path order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.keys().map(PathBuf::as_path)
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
