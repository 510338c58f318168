//! Recursive directory indexing.
//!
//! Walks a served root with `jwalk` and builds a fresh `ServedIndex`:
//! - entries whose name starts with `.` are skipped (files and directories)
//! - in the pages tree, `*.allowed` sidecar files are left out of the index
//! - symlinks are followed; a directory whose canonical path was already
//!   visited (a cycle or an alias) or lies outside the root is not descended
//! - an unreadable subdirectory is logged and skipped; an unusable root fails

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use jwalk::{Parallelism, WalkDir};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use super::ScanError;
use super::index::{RouteEntry, ServedIndex};
use crate::core::RouteKind;
use crate::{debug, warn};

/// Suffix of access-control sidecar files next to pages.
pub const SIDECAR_SUFFIX: &str = ".allowed";

/// Directory nesting limit, independent of the visited set.
const MAX_DEPTH: usize = 64;

/// Scan `root` into a new route table.
pub fn scan(root: &Path, kind: RouteKind) -> Result<ServedIndex, ScanError> {
    let canonical = root.canonicalize().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ScanError::MissingRoot(root.to_path_buf()),
        _ => ScanError::Io(root.to_path_buf(), e),
    })?;
    if !canonical.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    // The walker only reports an unreadable root as an entry error
    fs::read_dir(&canonical).map_err(|e| ScanError::Io(root.to_path_buf(), e))?;

    let mut index = ServedIndex::new(kind, canonical.clone());
    for entry in walker(&canonical) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("scan"; "skipping unreadable entry: {}", e);
                continue;
            }
        };
        if entry.depth == 0 || !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(name) = entry.file_name().to_str() else {
            warn!("scan"; "skipping non UTF-8 name {}", path.display());
            continue;
        };
        if is_excluded(name, kind) || !target_inside(&path, &canonical) {
            continue;
        }
        let Some(rel) = route_relative(&path, &canonical) else {
            warn!("scan"; "skipping non UTF-8 path {}", path.display());
            continue;
        };

        index.insert(RouteEntry {
            logical: kind.logical(&rel),
            path,
            kind,
        });
    }

    debug!("scan"; "indexed {} {}s under {}", index.len(), kind, canonical.display());
    Ok(index)
}

/// Check if a file name is excluded from the index for `kind`.
pub fn is_excluded(name: &str, kind: RouteKind) -> bool {
    name.starts_with('.') || (kind == RouteKind::Page && name.ends_with(SIDECAR_SUFFIX))
}

/// Serial, sorted walk that prunes directories before they are read.
fn walker(root: &Path) -> WalkDir {
    let root: Arc<Path> = Arc::from(root);
    let visited = Mutex::new(FxHashSet::from_iter([root.to_path_buf()]));

    WalkDir::new(&*root)
        .follow_links(true)
        .skip_hidden(true)
        .sort(true)
        .parallelism(Parallelism::Serial)
        .process_read_dir(move |_, _, _, children| {
            for child in children.iter_mut().flatten() {
                if child.read_children_path.is_some()
                    && !admit_dir(&child.path(), child.depth, &root, &visited)
                {
                    child.read_children_path = None;
                }
            }
        })
}

/// Decide whether the walk may descend into `path`.
fn admit_dir(
    path: &Path,
    depth: usize,
    root: &Path,
    visited: &Mutex<FxHashSet<PathBuf>>,
) -> bool {
    if depth >= MAX_DEPTH {
        warn!("scan"; "{} exceeds depth limit {}, truncating", path.display(), MAX_DEPTH);
        return false;
    }

    let canonical = match path.canonicalize() {
        Ok(canonical) => canonical,
        Err(e) => {
            warn!("scan"; "skipping {}: {}", path.display(), e);
            return false;
        }
    };
    if !canonical.starts_with(root) {
        warn!("scan"; "{} points outside the served root, skipping", path.display());
        return false;
    }
    if !visited.lock().insert(canonical) {
        warn!("scan"; "{} was already indexed (symlink loop?), truncating", path.display());
        return false;
    }
    true
}

/// A file symlink may still point outside the root.
fn target_inside(path: &Path, root: &Path) -> bool {
    match path.canonicalize() {
        Ok(target) if target.starts_with(root) => true,
        Ok(_) => {
            warn!("scan"; "{} points outside the served root, skipping", path.display());
            false
        }
        Err(e) => {
            debug!("scan"; "skipping {}: {}", path.display(), e);
            false
        }
    }
}

/// `/`-joined path of `path` below `root`.
fn route_relative(path: &Path, root: &Path) -> Option<String> {
    let parts = path
        .strip_prefix(root)
        .ok()?
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn make_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "index.mu", ">Home");
        write(root, "about.mu", ">About");
        write(root, "about.mu.allowed", "abcd");
        write(root, ".hidden.mu", "secret");
        write(root, ".git/config", "secret");
        write(root, "docs/intro.mu", ">Intro");
        write(root, "docs/deep/nested.txt", "nested");
        write(root, "docs/.draft.mu", "draft");
        temp
    }

    fn logical_set(index: &ServedIndex) -> BTreeSet<String> {
        index.entries().map(|e| e.logical.clone()).collect()
    }

    #[test]
    fn test_page_scan_excludes_hidden_and_sidecars() {
        let temp = make_tree();
        let index = scan(temp.path(), RouteKind::Page).unwrap();

        let expected: BTreeSet<String> = [
            "/page/index.mu",
            "/page/about.mu",
            "/page/docs/intro.mu",
            "/page/docs/deep/nested.txt",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(logical_set(&index), expected);
    }

    #[test]
    fn test_file_scan_keeps_sidecars() {
        let temp = make_tree();
        let index = scan(temp.path(), RouteKind::File).unwrap();

        assert!(index.contains("/file/about.mu.allowed"));
        assert!(!index.contains("/file/.hidden.mu"));
        assert!(!index.contains("/file/.git/config"));
        assert!(!index.contains("/file/docs/.draft.mu"));
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_entries_point_at_files_in_root() {
        let temp = make_tree();
        let root = temp.path().canonicalize().unwrap();
        let index = scan(temp.path(), RouteKind::Page).unwrap();

        assert_eq!(index.root(), root);
        let entry = index.get("/page/docs/intro.mu").unwrap();
        assert_eq!(entry.path, root.join("docs/intro.mu"));
        assert_eq!(entry.kind, RouteKind::Page);
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let temp = make_tree();
        let first = scan(temp.path(), RouteKind::Page).unwrap();
        let second = scan(temp.path(), RouteKind::Page).unwrap();
        assert_eq!(logical_set(&first), logical_set(&second));
        assert!(first.diff(&second).is_empty());
    }

    #[test]
    fn test_missing_root_is_error() {
        let temp = TempDir::new().unwrap();
        let err = scan(&temp.path().join("nope"), RouteKind::Page).unwrap_err();
        assert!(matches!(err, ScanError::MissingRoot(_)));
    }

    #[test]
    fn test_root_must_be_directory() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "file", "x");
        let err = scan(&temp.path().join("file"), RouteKind::File).unwrap_err();
        assert!(matches!(err, ScanError::NotADirectory(_)));
    }

    #[test]
    fn test_empty_root() {
        let temp = TempDir::new().unwrap();
        let index = scan(temp.path(), RouteKind::File).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_is_excluded() {
        assert!(is_excluded(".env", RouteKind::File));
        assert!(is_excluded("a.mu.allowed", RouteKind::Page));
        assert!(!is_excluded("a.mu.allowed", RouteKind::File));
        assert!(!is_excluded("a.mu", RouteKind::Page));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_terminates() {
        let temp = make_tree();
        let root = temp.path();
        std::os::unix::fs::symlink(root.join("docs"), root.join("docs/deep/loop")).unwrap();
        std::os::unix::fs::symlink(root, root.join("docs/up")).unwrap();

        let index = scan(root, RouteKind::Page).unwrap();
        assert!(index.contains("/page/docs/intro.mu"));
        assert!(!index.contains("/page/docs/deep/loop/intro.mu"));
        assert!(!index.contains("/page/docs/up/index.mu"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_outside_root_skipped() {
        let temp = make_tree();
        let outside = TempDir::new().unwrap();
        write(outside.path(), "secret.txt", "secret");
        std::os::unix::fs::symlink(outside.path(), temp.path().join("ext")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            temp.path().join("secret.txt"),
        )
        .unwrap();

        let index = scan(temp.path(), RouteKind::File).unwrap();
        assert!(!index.contains("/file/ext/secret.txt"));
        assert!(!index.contains("/file/secret.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_does_not_fail_scan() {
        use std::os::unix::fs::PermissionsExt;

        let temp = make_tree();
        let locked = temp.path().join("locked");
        write(temp.path(), "locked/inner.mu", "x");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let result = scan(temp.path(), RouteKind::Page);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        // Root may bypass the permission bits; either way the scan succeeds
        let index = result.unwrap();
        assert!(index.contains("/page/index.mu"));
        assert!(index.contains("/page/docs/intro.mu"));
    }
}
