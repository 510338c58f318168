//! Interface to the transport that carries requests to the node.
//!
//! The node never talks to the network itself. It registers one handler per
//! route on a `Destination`, listens for link events, and asks the
//! destination to announce itself.

use std::sync::Arc;

use thiserror::Error;

use crate::core::RequestContext;
use crate::serve::Response;

/// Handler invoked per inbound request. `None` fails the request.
pub type RequestHandler = Arc<dyn Fn(&RequestContext) -> Option<Response> + Send + Sync>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to register handler for `{0}`")]
    Registration(String),

    #[error("destination is closed")]
    Closed,
}

/// Which callers may invoke a route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AccessPolicy {
    #[default]
    AllowAll,
    AllowNone,
    /// Identity hashes permitted to call
    AllowList(Vec<Vec<u8>>),
}

impl AccessPolicy {
    pub fn permits(&self, identity: Option<&[u8]>) -> bool {
        match self {
            Self::AllowAll => true,
            Self::AllowNone => false,
            Self::AllowList(allowed) => {
                identity.is_some_and(|id| allowed.iter().any(|a| a.as_slice() == id))
            }
        }
    }
}

/// Registration parameters for one route.
#[derive(Clone)]
pub struct Route {
    pub path: String,
    pub handler: RequestHandler,
    pub policy: AccessPolicy,
    /// Responses larger than this are sent uncompressed
    pub auto_compress: Option<u64>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("policy", &self.policy)
            .field("auto_compress", &self.auto_compress)
            .finish_non_exhaustive()
    }
}

/// A link as seen by link callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub link_id: Vec<u8>,
    pub remote_identity: Option<Vec<u8>>,
    pub established_at: u64,
}

/// Link lifecycle callbacks.
pub trait LinkEvents: Send + Sync {
    fn link_established(&self, link: &LinkInfo);
    fn link_closed(&self, link: &LinkInfo);
}

/// An addressable endpoint that serves registered routes.
pub trait Destination: Send + Sync {
    /// Address hash of this destination.
    fn hash(&self) -> Vec<u8>;

    /// Register (or replace) the handler for an exact path.
    fn register_handler(&self, route: Route) -> Result<(), TransportError>;

    /// Returns whether a handler was registered for `path`.
    fn deregister_handler(&self, path: &str) -> bool;

    fn set_link_events(&self, events: Arc<dyn LinkEvents>);

    /// Broadcast reachability, optionally with app data (the display name).
    fn announce(&self, app_data: Option<&[u8]>) -> Result<(), TransportError>;

    /// Stop serving and close all links. Idempotent.
    fn close(&self);
}
