//! Logical request path to filesystem path resolution.

use std::path::{Component, Path, PathBuf};

use super::ServeError;

/// Resolve a logical request path against a served root.
///
/// `logical` may carry the route prefix (`/page/...`); `root` must already
/// be canonical. Runs on every request: the tree can change between
/// indexing and serving, so nothing here is cached.
pub fn resolve_path(logical: &str, prefix: &str, root: &Path) -> Result<PathBuf, ServeError> {
    let relative = strip_route_prefix(logical, prefix);

    // Reject traversal before touching the filesystem
    let rel_path = Path::new(relative);
    if rel_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(ServeError::PathTraversal(logical.to_owned()));
    }

    // Canonicalize to resolve symlinks and verify path is under root
    let canonical = root
        .join(rel_path)
        .canonicalize()
        .map_err(|_| ServeError::NotFound(logical.to_owned()))?;

    if !canonical.starts_with(root) {
        return Err(ServeError::PathTraversal(logical.to_owned()));
    }

    Ok(canonical)
}

/// Strip the route prefix, leaving the root-relative part.
///
/// A path without the prefix is taken as already relative.
pub fn strip_route_prefix<'a>(logical: &'a str, prefix: &str) -> &'a str {
    if let Some(rest) = logical.strip_prefix(prefix) {
        rest
    } else if logical == prefix.trim_end_matches('/') {
        ""
    } else {
        logical
    }
}
