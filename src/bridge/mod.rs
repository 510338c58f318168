//! Loopback HTTP transport.
//!
//! Implements `Destination` over plain HTTP so a node can be run and
//! exercised locally. Each remote socket address is treated as one link:
//! the first request opens it, it closes after `LINK_IDLE_TIMEOUT` without
//! traffic, and every link is closed when the destination closes.
//!
//! ```text
//! GET  /page/index.mu                  -> 200 page bytes
//! GET  /page/form.mu?field_name=Jane   -> mapping payload
//! POST /page/form.mu  {"var_x": "1"}   -> mapping payload
//! GET  /file/notes.txt                 -> 200 stream + Content-Disposition
//! GET  /file/missing                   -> 404, empty body
//! ```

mod lifecycle;
mod request;
mod response;

pub use lifecycle::bind_with_retry;
pub use request::IDENTITY_HEADER;

use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tiny_http::{Request, Server};

use crate::core::RequestContext;
use crate::node::identity::truncated_hash;
use crate::node::{Destination, LinkEvents, LinkInfo, Route, TransportError};
use crate::utils::date::unix_now;
use crate::{debug, error, log, warn};

/// Links without traffic for this long are closed.
pub const LINK_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// How long the request loop blocks before doing housekeeping.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Request handler threads.
const WORKERS: usize = 4;

struct LinkState {
    info: LinkInfo,
    last_seen: Instant,
}

/// HTTP-backed destination.
pub struct HttpDestination {
    hash: Vec<u8>,
    server: Server,
    addr: SocketAddr,
    routes: RwLock<FxHashMap<String, Route>>,
    events: RwLock<Option<Arc<dyn LinkEvents>>>,
    links: Mutex<FxHashMap<SocketAddr, LinkState>>,
    idle_timeout: Duration,
    next_request: AtomicU64,
    closed: AtomicBool,
}

impl HttpDestination {
    /// Bind the HTTP server. Requests are not served until `serve` runs.
    pub fn bind(interface: IpAddr, port: u16, hash: Vec<u8>) -> Result<Arc<Self>> {
        let (server, addr) = bind_with_retry(interface, port)?;
        log!("bridge"; "listening on http://{}", addr);

        Ok(Arc::new(Self {
            hash,
            server,
            addr,
            routes: RwLock::new(FxHashMap::default()),
            events: RwLock::new(None),
            links: Mutex::new(FxHashMap::default()),
            idle_timeout: LINK_IDLE_TIMEOUT,
            next_request: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run the request loop until the destination is closed.
    pub fn serve(self: &Arc<Self>) -> Result<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(WORKERS)
            .thread_name(|i| format!("bridge-worker-{i}"))
            .build()
            .context("failed to create request thread pool")?;

        while !self.is_closed() {
            match self.server.recv_timeout(POLL_INTERVAL) {
                Ok(Some(request)) => {
                    let this = Arc::clone(self);
                    pool.spawn(move || {
                        if let Err(e) = this.handle(request) {
                            debug!("bridge"; "request error: {e}");
                        }
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    if !self.is_closed() {
                        error!("bridge"; "accept failed: {}", e);
                    }
                    break;
                }
            }
            self.reap_idle_links(Instant::now());
        }
        debug!("bridge"; "request loop stopped");
        Ok(())
    }

    fn handle(&self, mut request: Request) -> Result<()> {
        if self.is_closed() {
            return response::respond_status(request, 503);
        }

        let (path, query) = request::split_url(request.url());
        let query = query.map(str::to_owned);

        let Some(route) = self.routes.read().get(&path).cloned() else {
            return response::respond_status(request, 404);
        };

        let identity = request
            .headers()
            .iter()
            .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(IDENTITY_HEADER))
            .and_then(|h| request::parse_identity(h.value.as_str()));

        let link_id = request
            .remote_addr()
            .copied()
            .map(|addr| self.touch_link(addr, identity.as_deref()));

        if !route.policy.permits(identity.as_deref()) {
            debug!("bridge"; "{} denied by access policy", path);
            return response::respond_status(request, 403);
        }

        if request.body_length().is_some_and(|len| len as u64 > request::MAX_BODY) {
            warn!("bridge"; "{} body exceeds {} bytes, rejected", path, request::MAX_BODY);
            return response::respond_status(request, 413);
        }

        let mut body = Vec::new();
        request
            .as_reader()
            .take(request::MAX_BODY + 1)
            .read_to_end(&mut body)
            .context("failed to read request body")?;
        if body.len() as u64 > request::MAX_BODY {
            warn!("bridge"; "{} body exceeds {} bytes, rejected", path, request::MAX_BODY);
            return response::respond_status(request, 413);
        }

        let mut ctx = RequestContext::new(path)
            .with_payload(request::payload_from(query.as_deref(), body));
        ctx.request_id = self.next_request.fetch_add(1, Ordering::Relaxed).to_be_bytes().to_vec();
        if let Some(link_id) = link_id {
            ctx = ctx.with_link(link_id);
        }
        if let Some(identity) = identity {
            ctx = ctx.with_identity(identity);
        }

        let result = (route.handler)(&ctx);
        response::respond(request, result)
    }

    /// Record traffic from `addr`, opening its link on first contact.
    fn touch_link(&self, addr: SocketAddr, identity: Option<&[u8]>) -> Vec<u8> {
        let opened = {
            let mut links = self.links.lock();
            if let Some(link) = links.get_mut(&addr) {
                link.last_seen = Instant::now();
                return link.info.link_id.clone();
            }

            let info = LinkInfo {
                link_id: truncated_hash(&[addr.to_string().as_bytes()]).to_vec(),
                remote_identity: identity.map(<[u8]>::to_vec),
                established_at: unix_now(),
            };
            links.insert(
                addr,
                LinkState {
                    info: info.clone(),
                    last_seen: Instant::now(),
                },
            );
            info
        };

        if let Some(events) = self.events.read().clone() {
            events.link_established(&opened);
        }
        opened.link_id
    }

    fn reap_idle_links(&self, now: Instant) {
        let idle: Vec<LinkInfo> = {
            let mut links = self.links.lock();
            let expired: Vec<SocketAddr> = links
                .iter()
                .filter(|(_, link)| now.saturating_duration_since(link.last_seen) >= self.idle_timeout)
                .map(|(addr, _)| *addr)
                .collect();
            expired
                .into_iter()
                .filter_map(|addr| links.remove(&addr))
                .map(|link| link.info)
                .collect()
        };
        if !idle.is_empty() {
            debug!("bridge"; "closed {} idle links, {} still open", idle.len(), self.active_links());
        }
        self.notify_closed(&idle);
    }

    fn close_all_links(&self) {
        let all: Vec<LinkInfo> = self.links.lock().drain().map(|(_, link)| link.info).collect();
        self.notify_closed(&all);
    }

    fn notify_closed(&self, links: &[LinkInfo]) {
        if links.is_empty() {
            return;
        }
        if let Some(events) = self.events.read().clone() {
            for link in links {
                events.link_closed(link);
            }
        }
    }

    pub fn active_links(&self) -> usize {
        self.links.lock().len()
    }
}

impl Destination for HttpDestination {
    fn hash(&self) -> Vec<u8> {
        self.hash.clone()
    }

    fn register_handler(&self, route: Route) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if !route.path.starts_with('/') {
            return Err(TransportError::Registration(route.path));
        }
        self.routes.write().insert(route.path.clone(), route);
        Ok(())
    }

    fn deregister_handler(&self, path: &str) -> bool {
        self.routes.write().remove(path).is_some()
    }

    fn set_link_events(&self, events: Arc<dyn LinkEvents>) {
        *self.events.write() = Some(events);
    }

    fn announce(&self, app_data: Option<&[u8]>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        match app_data {
            Some(data) => log!(
                "announce"; "{} \"{}\" at http://{}",
                hex::encode(&self.hash), String::from_utf8_lossy(data), self.addr
            ),
            None => log!("announce"; "{} at http://{}", hex::encode(&self.hash), self.addr),
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.server.unblock();
        self.close_all_links();
        self.routes.write().clear();
        debug!("bridge"; "destination closed");
    }
}
