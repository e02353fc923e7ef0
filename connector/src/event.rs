//! Change records and the events handed to the sink.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attributes::PathAttributes;
use crate::fs::FilePayload;

/// Kind of change detected between two scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    /// The path appeared.
    Create,

    /// A file's size or modification time changed, or a directory's
    /// immediate children changed.
    Update,

    /// The path disappeared.
    Delete,
}

/// A single detected change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// The kind of change.
    pub kind: ChangeKind,

    /// Current attributes, or the last known ones for a delete.
    pub attributes: PathAttributes,

    /// When the change was detected.
    pub timestamp: DateTime<Utc>,
}

impl ChangeRecord {
    /// Create a new change record.
    pub fn new(kind: ChangeKind, attributes: PathAttributes, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            attributes,
            timestamp,
        }
    }

    /// Path of the changed entry relative to the watch root.
    pub fn relative_path(&self) -> &Path {
        self.attributes.relative_path()
    }

    /// Check if the changed entry is a directory.
    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }
}

/// What the watcher delivers to the sink.
#[derive(Debug)]
pub struct WatchEvent {
    /// The detected change, including the path metadata.
    pub record: ChangeRecord,

    /// Content of the file, for creates and updates of files when payload
    /// delivery is enabled.
    pub payload: Option<FilePayload>,
}

impl WatchEvent {
    /// Create a new watch event.
    pub fn new(record: ChangeRecord, payload: Option<FilePayload>) -> Self {
        Self { record, payload }
    }

    /// Kind of the underlying change.
    pub fn kind(&self) -> ChangeKind {
        self.record.kind
    }

    /// Attributes of the changed entry.
    pub fn attributes(&self) -> &PathAttributes {
        &self.record.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_wire_shape() {
        let now = Utc::now();
        let record = ChangeRecord::new(
            ChangeKind::Delete,
            PathAttributes::new("/w/a.txt", "a.txt", false, 3, now, now),
            now,
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "DELETE");
        assert_eq!(json["attributes"]["relative_path"], "a.txt");
        assert_eq!(json["attributes"]["size"], 3);
    }

    #[test]
    fn test_event_accessors() {
        let now = Utc::now();
        let record = ChangeRecord::new(
            ChangeKind::Create,
            PathAttributes::new("/w/dir", "dir", true, 0, now, now),
            now,
        );
        let event = WatchEvent::new(record, None);

        assert_eq!(event.kind(), ChangeKind::Create);
        assert!(event.record.is_directory());
        assert_eq!(event.attributes().relative_path(), Path::new("dir"));
    }
}
