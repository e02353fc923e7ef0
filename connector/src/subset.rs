//! Sorting and paging of listing results.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::attributes::PathAttributes;

/// Attribute a listing is sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListComparator {
    #[default]
    DateModified,
    DateCreated,
    Size,
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// Which slice of a sorted listing to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsetList {
    /// Maximum number of entries (0 = no limit).
    pub limit: usize,

    /// Number of entries to skip after sorting.
    pub offset: usize,

    pub criteria: ListComparator,

    pub order: SortOrder,
}

impl SubsetList {
    /// Page through a listing with the default sort.
    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit,
            offset,
            ..Self::default()
        }
    }

    /// Set the sort criteria and order.
    pub fn sorted_by(mut self, criteria: ListComparator, order: SortOrder) -> Self {
        self.criteria = criteria;
        self.order = order;
        self
    }

    /// Sort `entries` and cut out the requested page.
    pub fn apply(&self, mut entries: Vec<PathAttributes>) -> Vec<PathAttributes> {
        entries.sort_by(|a, b| {
            let ordering = self.compare(a, b);
            match self.order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });

        let limit = if self.limit == 0 { usize::MAX } else { self.limit };
        entries.into_iter().skip(self.offset).take(limit).collect()
    }

    // Ties fall back to the path so pages are stable.
    fn compare(&self, a: &PathAttributes, b: &PathAttributes) -> Ordering {
        let primary = match self.criteria {
            ListComparator::DateModified => a.last_modified().cmp(&b.last_modified()),
            ListComparator::DateCreated => a.created().cmp(&b.created()),
            ListComparator::Size => a.size().cmp(&b.size()),
            ListComparator::Path => Ordering::Equal,
        };
        primary.then_with(|| a.absolute_path().cmp(b.absolute_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    fn entries() -> Vec<PathAttributes> {
        let t0 = Utc::now();
        [("a", 30, 2), ("b", 10, 0), ("c", 20, 1), ("d", 20, 3)]
            .into_iter()
            .map(|(name, size, minutes)| {
                let modified = t0 + Duration::minutes(minutes);
                PathAttributes::new(format!("/w/{name}"), name, false, size, modified, modified)
            })
            .collect()
    }

    fn names(entries: &[PathAttributes]) -> Vec<&str> {
        entries.iter().map(PathAttributes::file_name).collect()
    }

    #[test]
    fn test_default_is_newest_first_without_limit() {
        let result = SubsetList::default().apply(entries());
        assert_eq!(names(&result), vec!["d", "a", "c", "b"]);
    }

    #[test]
    fn test_offset_and_limit_page_through() {
        let subset = SubsetList::new(2, 1).sorted_by(ListComparator::Path, SortOrder::Ascending);
        assert_eq!(names(&subset.apply(entries())), vec!["b", "c"]);

        let past_end = SubsetList::new(2, 10).apply(entries());
        assert!(past_end.is_empty());
    }

    #[test]
    fn test_size_ties_break_on_path() {
        let subset = SubsetList::default().sorted_by(ListComparator::Size, SortOrder::Ascending);
        assert_eq!(names(&subset.apply(entries())), vec!["b", "c", "d", "a"]);
    }
}
