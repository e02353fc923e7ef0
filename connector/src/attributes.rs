//! Immutable snapshots of a path's identity and metadata.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity and metadata of a file or directory at the moment it was observed.
///
/// Attributes are created once per scan (or per operation) and never
/// mutated afterwards. The `relative_path` is relative to the base the
/// entry was observed from, usually the watch root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathAttributes {
    absolute_path: PathBuf,
    relative_path: PathBuf,
    is_directory: bool,
    size: u64,
    last_modified: DateTime<Utc>,
    created: DateTime<Utc>,
}

impl PathAttributes {
    /// Build attributes from already known values.
    pub fn new(
        absolute_path: impl Into<PathBuf>,
        relative_path: impl Into<PathBuf>,
        is_directory: bool,
        size: u64,
        last_modified: DateTime<Utc>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            absolute_path: absolute_path.into(),
            relative_path: relative_path.into(),
            is_directory,
            size,
            last_modified,
            created,
        }
    }

    /// Build attributes for `path` from metadata returned by the OS.
    ///
    /// When `path` is not below `base` the relative path falls back to the
    /// path itself. Platforms without a birth time report the modification
    /// time as creation time.
    pub fn from_metadata(base: &Path, path: &Path, metadata: &Metadata) -> Self {
        let relative_path = path.strip_prefix(base).unwrap_or(path).to_path_buf();
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH));
        let created = metadata
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(last_modified);
        let is_directory = metadata.is_dir();

        Self {
            absolute_path: path.to_path_buf(),
            relative_path,
            is_directory,
            size: if is_directory { 0 } else { metadata.len() },
            last_modified,
            created,
        }
    }

    /// Full path of the entry.
    pub fn absolute_path(&self) -> &Path {
        &self.absolute_path
    }

    /// Path relative to the base it was observed from.
    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    /// Check if the entry is a directory.
    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// Size in bytes. Always zero for directories.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Last modification time.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Creation time, or the modification time where unsupported.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Final component of the path, or an empty string for a bare root.
    pub fn file_name(&self) -> &str {
        self.absolute_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    /// Relative path rendered with `/` separators on every platform.
    pub fn relative_path_string(&self) -> String {
        self.relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_attributes_from_file_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("docs");
        fs::create_dir(&nested).unwrap();
        let file = nested.join("report.txt");
        fs::write(&file, "quarterly").unwrap();

        let attrs =
            PathAttributes::from_metadata(temp_dir.path(), &file, &fs::metadata(&file).unwrap());

        assert_eq!(attrs.relative_path(), Path::new("docs/report.txt"));
        assert_eq!(attrs.relative_path_string(), "docs/report.txt");
        assert_eq!(attrs.file_name(), "report.txt");
        assert_eq!(attrs.size(), 9);
        assert!(!attrs.is_directory());
    }

    #[test]
    fn test_directory_size_is_zero() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("folder");
        fs::create_dir(&dir).unwrap();

        let attrs =
            PathAttributes::from_metadata(temp_dir.path(), &dir, &fs::metadata(&dir).unwrap());

        assert!(attrs.is_directory());
        assert_eq!(attrs.size(), 0);
    }
}
