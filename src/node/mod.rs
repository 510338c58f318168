//! The page node: route registration, link tracking and background loops.
//!
//! `PageNode` ties a `ContentRouter` and a `StatsAggregator` to a transport
//! `Destination`. Handlers registered on the destination only hold the
//! router and the stats, never the destination itself.

pub mod identity;
pub mod scheduler;
pub mod transport;

pub use identity::{APP_NAME, IdentityError, NodeIdentity};
pub use scheduler::{JOIN_TIMEOUT, PeriodicTask, Scheduler};
pub use transport::{
    AccessPolicy, Destination, LinkEvents, LinkInfo, RequestHandler, Route, TransportError,
};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::{RequestContext, RouteKind, StopSignal};
use crate::serve::{ContentRouter, INDEX_NAMES, Response};
use crate::stats::StatsAggregator;
use crate::{debug, error, log, warn};

/// File responses above this size are not compressed by the transport.
pub const AUTO_COMPRESS_LIMIT: u64 = 32_000_000;

/// Timing and presentation of a running node.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Sent as announce app data
    pub name: Option<String>,
    pub announce_interval: Duration,
    /// Zero disables periodic page rescans
    pub page_refresh_interval: Duration,
    /// Zero disables periodic file rescans
    pub file_refresh_interval: Duration,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: None,
            announce_interval: Duration::from_secs(360 * 60),
            page_refresh_interval: Duration::ZERO,
            file_refresh_interval: Duration::ZERO,
        }
    }
}

/// What request handlers need.
struct NodeCore {
    router: ContentRouter,
    stats: Arc<StatsAggregator>,
}

impl NodeCore {
    fn serve_page(&self, ctx: &RequestContext) -> Option<Response> {
        let body = self.router.dispatch_page(ctx);
        self.record(RouteKind::Page, ctx);
        Some(Response::Bytes(body))
    }

    fn serve_file(&self, ctx: &RequestContext) -> Option<Response> {
        let stream = self.router.dispatch_file(ctx).ok()?;
        self.record(RouteKind::File, ctx);
        Some(Response::Stream(stream))
    }

    fn record(&self, kind: RouteKind, ctx: &RequestContext) {
        self.stats
            .record_request(kind, &ctx.path, ctx.remote_identity.as_deref(), ctx.requested_at);
    }
}

/// Routes currently registered on the destination.
#[derive(Default)]
struct Registered {
    pages: BTreeSet<String>,
    files: BTreeSet<String>,
}

impl Registered {
    fn of(&mut self, kind: RouteKind) -> &mut BTreeSet<String> {
        match kind {
            RouteKind::Page => &mut self.pages,
            RouteKind::File => &mut self.files,
        }
    }
}

struct NodeShared {
    core: Arc<NodeCore>,
    destination: Arc<dyn Destination>,
    name: Option<String>,
    page_handler: RequestHandler,
    file_handler: RequestHandler,
    registered: Mutex<Registered>,
}

impl NodeShared {
    fn new(core: Arc<NodeCore>, destination: Arc<dyn Destination>, name: Option<String>) -> Self {
        let page_core = Arc::clone(&core);
        let file_core = Arc::clone(&core);
        Self {
            core,
            destination,
            name,
            page_handler: Arc::new(move |ctx| page_core.serve_page(ctx)),
            file_handler: Arc::new(move |ctx| file_core.serve_file(ctx)),
            registered: Mutex::new(Registered::default()),
        }
    }

    fn route(&self, kind: RouteKind, path: String) -> Route {
        match kind {
            RouteKind::Page => Route {
                path,
                handler: Arc::clone(&self.page_handler),
                policy: AccessPolicy::AllowAll,
                auto_compress: None,
            },
            RouteKind::File => Route {
                path,
                handler: Arc::clone(&self.file_handler),
                policy: AccessPolicy::AllowAll,
                auto_compress: Some(AUTO_COMPRESS_LIMIT),
            },
        }
    }

    /// Routes that should be registered for the current table of `kind`.
    ///
    /// Reserved index names are always routable: they serve the default
    /// index while no index page exists and alias the existing one otherwise.
    fn desired_routes(&self, kind: RouteKind) -> BTreeSet<String> {
        let index = match kind {
            RouteKind::Page => self.core.router.pages(),
            RouteKind::File => self.core.router.files(),
        };
        let mut routes: BTreeSet<String> =
            index.logical_paths().into_iter().map(str::to_owned).collect();
        if kind == RouteKind::Page {
            routes.extend(INDEX_NAMES.iter().map(|name| kind.logical(name)));
        }
        routes
    }

    /// Bring destination registrations in line with the route table.
    fn sync_routes(&self, kind: RouteKind) -> Result<(), TransportError> {
        let desired = self.desired_routes(kind);
        let mut registered = self.registered.lock();
        let current = registered.of(kind);

        let stale: Vec<String> = current.difference(&desired).cloned().collect();
        for path in stale {
            self.destination.deregister_handler(&path);
            current.remove(&path);
        }

        let fresh: Vec<String> = desired.difference(current).cloned().collect();
        for path in fresh {
            self.destination.register_handler(self.route(kind, path.clone()))?;
            current.insert(path);
        }
        Ok(())
    }

    fn refresh(&self, kind: RouteKind) {
        let router = &self.core.router;
        let was_fallback = router.has_home_fallback();

        let rebuilt = match kind {
            RouteKind::Page => router.rebuild_pages(),
            RouteKind::File => router.rebuild_files(),
        };
        let diff = match rebuilt {
            Ok(diff) => diff,
            Err(e) => {
                warn!("refresh"; "rescan of {}s failed, keeping previous table: {}", kind, e);
                return;
            }
        };

        if !diff.is_empty() {
            log!("refresh"; "{}s: {} added, {} removed", kind, diff.added.len(), diff.removed.len());
        }
        if kind == RouteKind::Page && was_fallback != router.has_home_fallback() {
            if was_fallback {
                log!("refresh"; "index page found, default index retired");
            } else {
                log!("refresh"; "index page removed, serving default index");
            }
        }
        if let Err(e) = self.sync_routes(kind) {
            error!("refresh"; "failed to update {} routes: {}", kind, e);
        }
    }

    fn announce(&self) {
        let app_data = self.name.as_deref().map(str::as_bytes);
        match self.destination.announce(app_data) {
            Ok(()) => debug!("announce"; "announced {}", hex::encode(self.destination.hash())),
            Err(e) => error!("announce"; "announce failed: {}", e),
        }
    }
}

/// Feeds link lifecycle into the stats.
struct StatsLinkEvents(Arc<StatsAggregator>);

impl LinkEvents for StatsLinkEvents {
    fn link_established(&self, link: &LinkInfo) {
        debug!("link"; "established {}", hex::encode(&link.link_id));
        self.0.record_connection_open(
            link.remote_identity.as_deref(),
            &link.link_id,
            link.established_at,
        );
    }

    fn link_closed(&self, link: &LinkInfo) {
        debug!("link"; "closed {}", hex::encode(&link.link_id));
        self.0.record_connection_close(&link.link_id);
    }
}

/// A running node.
pub struct PageNode {
    shared: Arc<NodeShared>,
    scheduler: Scheduler,
    stop: StopSignal,
}

impl PageNode {
    /// Register every route, hook link events and start the background loops.
    ///
    /// Failing to register a handler is fatal.
    pub fn start(
        router: ContentRouter,
        stats: Arc<StatsAggregator>,
        destination: Arc<dyn Destination>,
        settings: NodeSettings,
        stop: StopSignal,
    ) -> anyhow::Result<Self> {
        let core = Arc::new(NodeCore { router, stats });
        let shared = Arc::new(NodeShared::new(core, destination, settings.name.clone()));

        shared.sync_routes(RouteKind::Page)?;
        shared.sync_routes(RouteKind::File)?;
        shared
            .destination
            .set_link_events(Arc::new(StatsLinkEvents(Arc::clone(&shared.core.stats))));

        {
            let registered = shared.registered.lock();
            log!("node"; "serving {} pages, {} files", shared.core.router.pages().len(), shared.core.router.files().len());
            debug!("node"; "{} page routes, {} file routes", registered.pages.len(), registered.files.len());
        }
        if shared.core.router.has_home_fallback() {
            log!("node"; "no index page, serving default index");
        }

        let mut scheduler = Scheduler::new(stop.clone());

        let announcer = Arc::clone(&shared);
        let announce = PeriodicTask::new("announce", settings.announce_interval, move || {
            announcer.announce()
        })
        .immediate();
        scheduler.spawn_loop("announce", vec![announce])?;

        let pages = Arc::clone(&shared);
        let files = Arc::clone(&shared);
        scheduler.spawn_loop(
            "refresh",
            vec![
                PeriodicTask::new("pages", settings.page_refresh_interval, move || {
                    pages.refresh(RouteKind::Page)
                }),
                PeriodicTask::new("files", settings.file_refresh_interval, move || {
                    files.refresh(RouteKind::File)
                }),
            ],
        )?;

        Ok(Self {
            shared,
            scheduler,
            stop,
        })
    }

    pub fn router(&self) -> &ContentRouter {
        &self.shared.core.router
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.shared.core.stats
    }

    /// Block until the stop signal fires.
    pub fn wait(&self) {
        while !self.stop.wait_timeout(Duration::from_secs(60)) {}
    }

    /// Stop the loops, close the destination and flush the stats.
    pub fn shutdown(self) {
        log!("node"; "shutting down");
        let stuck = self.scheduler.shutdown(JOIN_TIMEOUT);
        if !stuck.is_empty() {
            warn!("node"; "loops did not stop in time: {}", stuck.join(", "));
        }

        self.shared.destination.close();
        self.shared.core.stats.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serve::{DEFAULT_INDEX, ScriptSandbox};
    use crate::stats::NodeInfo;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockDestination {
        routes: Mutex<BTreeMap<String, Route>>,
        announces: Mutex<Vec<Option<Vec<u8>>>>,
        events: Mutex<Option<Arc<dyn LinkEvents>>>,
        closed: AtomicBool,
    }

    impl MockDestination {
        fn paths(&self) -> Vec<String> {
            self.routes.lock().keys().cloned().collect()
        }

        fn request(&self, ctx: &RequestContext) -> Option<Response> {
            let handler = self.routes.lock().get(&ctx.path).map(|r| Arc::clone(&r.handler))?;
            handler(ctx)
        }

        fn route(&self, path: &str) -> Route {
            self.routes.lock()[path].clone()
        }
    }

    impl Destination for MockDestination {
        fn hash(&self) -> Vec<u8> {
            vec![0xde, 0xad]
        }

        fn register_handler(&self, route: Route) -> Result<(), TransportError> {
            self.routes.lock().insert(route.path.clone(), route);
            Ok(())
        }

        fn deregister_handler(&self, path: &str) -> bool {
            self.routes.lock().remove(path).is_some()
        }

        fn set_link_events(&self, events: Arc<dyn LinkEvents>) {
            *self.events.lock() = Some(events);
        }

        fn announce(&self, app_data: Option<&[u8]>) -> Result<(), TransportError> {
            self.announces.lock().push(app_data.map(<[u8]>::to_vec));
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct Fixture {
        _temp: TempDir,
        pages: std::path::PathBuf,
        files: std::path::PathBuf,
        destination: Arc<MockDestination>,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let pages = temp.path().join("pages");
        let files = temp.path().join("files");
        fs::create_dir_all(&pages).unwrap();
        fs::create_dir_all(&files).unwrap();
        Fixture {
            _temp: temp,
            pages,
            files,
            destination: Arc::new(MockDestination::default()),
        }
    }

    fn start(fx: &Fixture, settings: NodeSettings) -> PageNode {
        let router = ContentRouter::new(&fx.pages, &fx.files, ScriptSandbox::default()).unwrap();
        let stats = Arc::new(StatsAggregator::new(NodeInfo::default()));
        let destination: Arc<dyn Destination> = fx.destination.clone();
        PageNode::start(router, stats, destination, settings, StopSignal::new()).unwrap()
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn body(response: Option<Response>) -> Vec<u8> {
        response.unwrap().into_bytes().unwrap()
    }

    #[test]
    fn test_registers_routes_for_both_trees() {
        let fx = fixture();
        write(&fx.pages, "about.mu", ">About");
        write(&fx.pages, "about.mu.allowed", "x");
        write(&fx.files, "docs/notes.txt", "abc");
        let node = start(&fx, NodeSettings::default());

        assert_eq!(
            fx.destination.paths(),
            vec!["/file/docs/notes.txt", "/page/about.mu", "/page/index", "/page/index.mu"]
        );
        assert_eq!(fx.destination.route("/file/docs/notes.txt").auto_compress, Some(AUTO_COMPRESS_LIMIT));
        assert_eq!(fx.destination.route("/page/about.mu").policy, AccessPolicy::AllowAll);
        node.shutdown();
    }

    #[test]
    fn test_requests_are_served_and_counted() {
        let fx = fixture();
        write(&fx.pages, "index", ">Hello");
        write(&fx.files, "notes.txt", "abc");
        let node = start(&fx, NodeSettings::default());
        let dest = &fx.destination;

        let ctx = RequestContext::new("/page/index").with_identity(vec![0xaa]);
        assert_eq!(body(dest.request(&ctx)), b">Hello");
        assert_eq!(body(dest.request(&RequestContext::new("/page/index.mu"))), b">Hello");

        let Some(Response::Stream(stream)) = dest.request(&RequestContext::new("/file/notes.txt"))
        else {
            panic!("expected a stream response");
        };
        assert_eq!(stream.name().as_deref(), Some("notes.txt"));

        let snap = node.stats().snapshot();
        assert_eq!(snap.total_page_requests, 2);
        assert_eq!(snap.total_file_requests, 1);
        assert_eq!(snap.peer_requests["aa"], 1);
        node.shutdown();
    }

    #[test]
    fn test_default_index_until_index_appears() {
        let fx = fixture();
        let node = start(&fx, NodeSettings::default());
        let index = RequestContext::new("/page/index.mu");
        assert_eq!(body(fx.destination.request(&index)), DEFAULT_INDEX.as_bytes());

        write(&fx.pages, "index.mu", ">Home");
        node.shared.refresh(RouteKind::Page);
        assert!(!node.router().has_home_fallback());
        assert_eq!(body(fx.destination.request(&index)), b">Home");
        node.shutdown();
    }

    #[test]
    fn test_refresh_registers_and_deregisters() {
        let fx = fixture();
        write(&fx.files, "old.bin", "1");
        let node = start(&fx, NodeSettings::default());

        fs::remove_file(fx.files.join("old.bin")).unwrap();
        write(&fx.files, "new.bin", "2");
        node.shared.refresh(RouteKind::File);

        let paths = fx.destination.paths();
        assert!(paths.contains(&"/file/new.bin".to_owned()));
        assert!(!paths.contains(&"/file/old.bin".to_owned()));
        node.shutdown();
    }

    #[test]
    fn test_failed_file_request_has_no_response() {
        let fx = fixture();
        write(&fx.files, "gone.bin", "1");
        let node = start(&fx, NodeSettings::default());

        fs::remove_file(fx.files.join("gone.bin")).unwrap();
        assert!(fx.destination.request(&RequestContext::new("/file/gone.bin")).is_none());
        assert_eq!(node.stats().snapshot().total_file_requests, 0);
        node.shutdown();
    }

    #[test]
    fn test_announces_immediately_with_name() {
        let fx = fixture();
        let node = start(
            &fx,
            NodeSettings {
                name: Some("My Node".to_owned()),
                ..Default::default()
            },
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while fx.destination.announces.lock().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(fx.destination.announces.lock()[0].as_deref(), Some(&b"My Node"[..]));
        node.shutdown();
    }

    #[test]
    fn test_link_events_feed_stats() {
        let fx = fixture();
        let node = start(&fx, NodeSettings::default());
        let events = fx.destination.events.lock().clone().unwrap();

        let link = LinkInfo {
            link_id: vec![1, 2],
            remote_identity: Some(vec![0xbb]),
            established_at: 100,
        };
        events.link_established(&link);
        assert_eq!(node.stats().snapshot().active_connections, 1);

        events.link_closed(&link);
        let snap = node.stats().snapshot();
        assert_eq!(snap.active_connections, 0);
        assert_eq!(snap.total_connections, 1);
        node.shutdown();
    }

    #[test]
    fn test_shutdown_closes_destination() {
        let fx = fixture();
        let node = start(&fx, NodeSettings::default());
        let stop = node.stop.clone();

        node.shutdown();
        assert!(stop.is_set());
        assert!(fx.destination.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_refresh_loop_picks_up_new_pages() {
        let fx = fixture();
        let node = start(
            &fx,
            NodeSettings {
                page_refresh_interval: Duration::from_millis(1),
                ..Default::default()
            },
        );
        write(&fx.pages, "late.mu", ">Late");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !fx.destination.paths().contains(&"/page/late.mu".to_owned())
            && std::time::Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(fx.destination.paths().contains(&"/page/late.mu".to_owned()));
        node.shutdown();
    }
}
