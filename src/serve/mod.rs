//! Request routing and content serving.
//!
//! `ContentRouter` owns the two route tables (pages, files). Tables are
//! immutable snapshots behind `ArcSwap`: a rebuild scans without holding
//! any lock and then swaps the pointer, so a dispatch sees either the old
//! or the new table, never a partial one.

mod content;
mod error;
mod index;
mod path;
mod response;
mod scan;
mod script;

pub use content::{DEFAULT_INDEX, NOT_ALLOWED};
pub use error::{ScanError, ServeError};
pub use index::{INDEX_NAMES, IndexDiff, RouteEntry, ServedIndex};
pub use path::resolve_path;
pub use response::{FileStream, Response};
pub use scan::{SIDECAR_SUFFIX, scan};
pub use script::{DEFAULT_TIMEOUT, ScriptSandbox};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::core::{RequestContext, RouteKind};
use crate::{debug, log, warn};

/// Routes requests onto the pages and files trees.
pub struct ContentRouter {
    pages_root: PathBuf,
    files_root: PathBuf,
    pages: ArcSwap<ServedIndex>,
    files: ArcSwap<ServedIndex>,
    sandbox: ScriptSandbox,
    /// Serializes swaps so each rebuild diffs against its true predecessor
    swap_lock: Mutex<()>,
}

impl ContentRouter {
    /// Scan both roots. A missing or unreadable root is fatal.
    pub fn new(
        pages_root: impl Into<PathBuf>,
        files_root: impl Into<PathBuf>,
        sandbox: ScriptSandbox,
    ) -> Result<Self, ScanError> {
        let pages_root = pages_root.into();
        let files_root = files_root.into();
        let pages = scan(&pages_root, RouteKind::Page)?;
        let files = scan(&files_root, RouteKind::File)?;

        Ok(Self {
            pages_root,
            files_root,
            pages: ArcSwap::from_pointee(pages),
            files: ArcSwap::from_pointee(files),
            sandbox,
            swap_lock: Mutex::new(()),
        })
    }

    /// Current pages table.
    pub fn pages(&self) -> Arc<ServedIndex> {
        self.pages.load_full()
    }

    /// Current files table.
    pub fn files(&self) -> Arc<ServedIndex> {
        self.files.load_full()
    }

    /// True while the pages root has no index page.
    pub fn has_home_fallback(&self) -> bool {
        self.pages.load().index_page().is_none()
    }

    /// Rescan the pages root and swap in the new table.
    pub fn rebuild_pages(&self) -> Result<IndexDiff, ScanError> {
        self.rebuild(RouteKind::Page)
    }

    /// Rescan the files root and swap in the new table.
    pub fn rebuild_files(&self) -> Result<IndexDiff, ScanError> {
        self.rebuild(RouteKind::File)
    }

    fn rebuild(&self, kind: RouteKind) -> Result<IndexDiff, ScanError> {
        let slot = match kind {
            RouteKind::Page => &self.pages,
            RouteKind::File => &self.files,
        };

        // Scan outside the lock; readers keep using the old table meanwhile
        let next = Arc::new(scan(self.root(kind), kind)?);

        let _guard = self.swap_lock.lock();
        let previous = slot.swap(Arc::clone(&next));
        if previous.root() != next.root() {
            log!("scan"; "{} root now resolves to {}", kind, next.root().display());
        }
        let diff = previous.diff(&next);
        if !diff.is_empty() {
            debug!("scan"; "{}s: +{} -{}", kind, diff.added.len(), diff.removed.len());
        }
        Ok(diff)
    }

    /// Serve a page request. Never fails: denials become `NOT_ALLOWED`.
    pub fn dispatch_page(&self, ctx: &RequestContext) -> Vec<u8> {
        let index = self.pages.load_full();
        let relative = path::strip_route_prefix(&ctx.path, RouteKind::Page.prefix());

        let target = if INDEX_NAMES.contains(&relative) {
            match index.index_page() {
                Some(entry) => entry.logical.clone(),
                None => return DEFAULT_INDEX.as_bytes().to_vec(),
            }
        } else {
            ctx.path.clone()
        };

        match self.serve_page(&index, &target, ctx) {
            Ok(body) => body,
            Err(e) => {
                warn!("serve"; "page request denied for {}: {}", ctx.peer(), e);
                NOT_ALLOWED.as_bytes().to_vec()
            }
        }
    }

    fn serve_page(
        &self,
        index: &ServedIndex,
        logical: &str,
        ctx: &RequestContext,
    ) -> Result<Vec<u8>, ServeError> {
        let path = self.locate(index, logical)?;

        if let Some(output) = self.sandbox.maybe_execute(&path, ctx) {
            return Ok(output);
        }
        fs::read(&path).map_err(|e| ServeError::Io(path, e))
    }

    /// Open a file download. Unlike pages, failures are returned to the
    /// caller so the transport can fail the request.
    pub fn dispatch_file(&self, ctx: &RequestContext) -> Result<FileStream, ServeError> {
        let index = self.files.load_full();
        let result = self
            .locate(&index, &ctx.path)
            .and_then(|path| FileStream::open(&path).map_err(|e| ServeError::Io(path, e)));

        if let Err(e) = &result {
            warn!("serve"; "file request failed for {}: {}", ctx.peer(), e);
        }
        result
    }

    /// Resolve `logical` inside the configured root and check it is servable.
    ///
    /// The root is canonicalized per request, so a retargeted root symlink
    /// takes effect immediately rather than at the next rescan.
    fn locate(&self, index: &ServedIndex, logical: &str) -> Result<PathBuf, ServeError> {
        let kind = index.kind();
        let root = self
            .root(kind)
            .canonicalize()
            .map_err(|_| ServeError::NotFound(logical.to_owned()))?;
        let path = resolve_path(logical, kind.prefix(), &root)?;

        let relative = path::strip_route_prefix(logical, kind.prefix());
        if is_hidden_route(relative, kind) || !path.is_file() {
            return Err(ServeError::NotFound(logical.to_owned()));
        }
        Ok(path)
    }

    /// Configured root of `kind`, as given (possibly a symlink).
    fn root(&self, kind: RouteKind) -> &Path {
        match kind {
            RouteKind::Page => &self.pages_root,
            RouteKind::File => &self.files_root,
        }
    }
}

/// Routes the indexer would never produce: hidden components, page sidecars.
fn is_hidden_route(relative: &str, kind: RouteKind) -> bool {
    let mut components = relative.split('/').filter(|c| !c.is_empty()).peekable();
    while let Some(component) = components.next() {
        let last = components.peek().is_none();
        if component.starts_with('.') || (last && scan::is_excluded(component, kind)) {
            return true;
        }
    }
    false
}
