//! Inclusion and exclusion rules for entries seen by a scan or a listing.

use chrono::{DateTime, Duration, Utc};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::attributes::PathAttributes;
use crate::error::{ConnectorError, Result};

/// Which kinds of entries a matcher accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFilter {
    /// Regular files only.
    Files,
    /// Directories only.
    Directories,
    /// Files and directories.
    #[default]
    All,
}

/// Declarative matcher rules, as found in configuration.
///
/// Categories combine with AND; the include patterns combine with OR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Glob patterns an entry must match at least one of (empty = any).
    pub filename_patterns: Vec<String>,

    /// Glob patterns that reject an entry.
    pub exclude_patterns: Vec<String>,

    /// Minimum file size in bytes.
    pub min_size: Option<u64>,

    /// Maximum file size in bytes.
    pub max_size: Option<u64>,

    /// Entry must not have been modified for at least this many seconds.
    pub min_age_secs: Option<u64>,

    /// Entry must have been modified within this many seconds.
    pub max_age_secs: Option<u64>,

    /// Type filter.
    pub file_type: TypeFilter,
}

impl MatcherConfig {
    /// A matcher config that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an include pattern.
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.filename_patterns.push(pattern.into());
        self
    }

    /// Add an exclude pattern.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    /// Bound the accepted file size, in bytes.
    pub fn with_size(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.min_size = min;
        self.max_size = max;
        self
    }

    /// Bound the accepted age, in seconds since last modification.
    pub fn with_age(mut self, min_secs: Option<u64>, max_secs: Option<u64>) -> Self {
        self.min_age_secs = min_secs;
        self.max_age_secs = max_secs;
        self
    }

    /// Set the type filter.
    pub fn with_type(mut self, file_type: TypeFilter) -> Self {
        self.file_type = file_type;
        self
    }

    /// Validate the rules and compile the patterns.
    pub fn compile(&self) -> Result<Matcher> {
        if let (Some(min), Some(max)) = (self.min_size, self.max_size) {
            if min > max {
                return Err(ConnectorError::Configuration(format!(
                    "min_size ({min}) is greater than max_size ({max})"
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min_age_secs, self.max_age_secs) {
            if min > max {
                return Err(ConnectorError::Configuration(format!(
                    "min_age_secs ({min}) is greater than max_age_secs ({max})"
                )));
            }
        }

        Ok(Matcher {
            include: compile_patterns(&self.filename_patterns)?,
            exclude: compile_patterns(&self.exclude_patterns)?,
            min_size: self.min_size,
            max_size: self.max_size,
            min_age: self.min_age_secs.map(age_duration),
            max_age: self.max_age_secs.map(age_duration),
            file_type: self.file_type,
        })
    }
}

fn age_duration(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<CompiledPattern>> {
    patterns
        .iter()
        .map(|raw| {
            Pattern::new(raw)
                .map(|pattern| CompiledPattern {
                    anchored: raw.contains('/'),
                    pattern,
                })
                .map_err(|source| ConnectorError::InvalidPattern {
                    pattern: raw.clone(),
                    source,
                })
        })
        .collect()
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    pattern: Pattern,
    /// Patterns with a separator match the relative path, others the file name.
    anchored: bool,
}

impl CompiledPattern {
    fn matches(&self, attributes: &PathAttributes) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        if self.anchored {
            self.pattern
                .matches_with(&attributes.relative_path_string(), options)
        } else {
            self.pattern.matches_with(attributes.file_name(), options)
        }
    }
}

/// Compiled, immutable predicate over [`PathAttributes`].
#[derive(Debug, Clone)]
pub struct Matcher {
    include: Vec<CompiledPattern>,
    exclude: Vec<CompiledPattern>,
    min_size: Option<u64>,
    max_size: Option<u64>,
    min_age: Option<Duration>,
    max_age: Option<Duration>,
    file_type: TypeFilter,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::accept_all()
    }
}

impl Matcher {
    /// A matcher without rules.
    pub fn accept_all() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            min_size: None,
            max_size: None,
            min_age: None,
            max_age: None,
            file_type: TypeFilter::All,
        }
    }

    /// Evaluate the rules with ages measured from the current time.
    pub fn matches(&self, attributes: &PathAttributes) -> bool {
        self.matches_at(attributes, Utc::now())
    }

    /// Evaluate the rules with ages measured from `now`.
    pub fn matches_at(&self, attributes: &PathAttributes, now: DateTime<Utc>) -> bool {
        self.matches_type(attributes)
            && self.matches_name(attributes)
            && self.matches_size(attributes)
            && self.matches_age(attributes, now)
    }

    fn matches_type(&self, attributes: &PathAttributes) -> bool {
        match self.file_type {
            TypeFilter::Files => !attributes.is_directory(),
            TypeFilter::Directories => attributes.is_directory(),
            TypeFilter::All => true,
        }
    }

    fn matches_name(&self, attributes: &PathAttributes) -> bool {
        if self.exclude.iter().any(|p| p.matches(attributes)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p.matches(attributes))
    }

    // Size bounds only constrain files.
    fn matches_size(&self, attributes: &PathAttributes) -> bool {
        if attributes.is_directory() {
            return true;
        }
        let size = attributes.size();
        self.min_size.is_none_or(|min| size >= min) && self.max_size.is_none_or(|max| size <= max)
    }

    fn matches_age(&self, attributes: &PathAttributes, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(attributes.last_modified());
        self.min_age.is_none_or(|min| age >= min) && self.max_age.is_none_or(|max| age <= max)
    }
}
