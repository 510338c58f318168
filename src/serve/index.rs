//! Route table types.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::core::RouteKind;

/// Index page names reserved at the pages root, canonical name first.
pub const INDEX_NAMES: &[&str] = &["index.mu", "index"];

/// One servable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Logical request path, e.g. `/page/docs/intro.mu`
    pub logical: String,
    /// Absolute filesystem path as found during the scan
    pub path: PathBuf,
    pub kind: RouteKind,
}

/// Immutable route table for one root. Rebuilt wholesale on refresh.
#[derive(Debug, Clone)]
pub struct ServedIndex {
    kind: RouteKind,
    /// Canonical root the entries were scanned from
    root: PathBuf,
    entries: FxHashMap<String, RouteEntry>,
}

impl ServedIndex {
    pub fn new(kind: RouteKind, root: PathBuf) -> Self {
        Self {
            kind,
            root,
            entries: FxHashMap::default(),
        }
    }

    pub(super) fn insert(&mut self, entry: RouteEntry) {
        self.entries.insert(entry.logical.clone(), entry);
    }

    pub fn kind(&self) -> RouteKind {
        self.kind
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, logical: &str) -> Option<&RouteEntry> {
        self.entries.get(logical)
    }

    pub fn contains(&self, logical: &str) -> bool {
        self.entries.contains_key(logical)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.values()
    }

    /// Logical paths, sorted.
    pub fn logical_paths(&self) -> Vec<&str> {
        let mut paths: Vec<_> = self.entries.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// First reserved index page present in this table.
    pub fn index_page(&self) -> Option<&RouteEntry> {
        INDEX_NAMES
            .iter()
            .find_map(|name| self.entries.get(&self.kind.logical(name)))
    }

    /// Routes added and removed going from `self` to `next`.
    pub fn diff(&self, next: &Self) -> IndexDiff {
        let mut added: Vec<_> = next
            .entries
            .keys()
            .filter(|k| !self.entries.contains_key(*k))
            .cloned()
            .collect();
        let mut removed: Vec<_> = self
            .entries
            .keys()
            .filter(|k| !next.entries.contains_key(*k))
            .cloned()
            .collect();
        added.sort_unstable();
        removed.sort_unstable();
        IndexDiff { added, removed }
    }
}

/// Change set between two route tables.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl IndexDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: RouteKind, rel: &str) -> RouteEntry {
        RouteEntry {
            logical: kind.logical(rel),
            path: PathBuf::from("/srv").join(rel),
            kind,
        }
    }

    fn index_of(kind: RouteKind, rels: &[&str]) -> ServedIndex {
        let mut index = ServedIndex::new(kind, PathBuf::from("/srv"));
        for rel in rels {
            index.insert(entry(kind, rel));
        }
        index
    }

    #[test]
    fn test_index_page_lookup() {
        assert!(index_of(RouteKind::Page, &["about.mu"]).index_page().is_none());

        let index = index_of(RouteKind::Page, &["index"]);
        assert_eq!(index.index_page().unwrap().logical, "/page/index");

        let index = index_of(RouteKind::Page, &["index", "index.mu"]);
        assert_eq!(index.index_page().unwrap().logical, "/page/index.mu");
    }

    #[test]
    fn test_diff() {
        let old = index_of(RouteKind::File, &["a.txt", "b.txt"]);
        let new = index_of(RouteKind::File, &["b.txt", "c.txt"]);

        let diff = old.diff(&new);
        assert_eq!(diff.added, vec!["/file/c.txt"]);
        assert_eq!(diff.removed, vec!["/file/a.txt"]);
        assert!(old.diff(&old).is_empty());
    }

    #[test]
    fn test_logical_paths_sorted() {
        let index = index_of(RouteKind::Page, &["z.mu", "a.mu", "m/n.mu"]);
        assert_eq!(
            index.logical_paths(),
            vec!["/page/a.mu", "/page/m/n.mu", "/page/z.mu"]
        );
    }
}
