//! Per-request context handed to route handlers by the transport.

use std::collections::BTreeMap;

/// Request payload as delivered by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Payload {
    #[default]
    None,
    Bytes(Vec<u8>),
    /// Structured key/value form data
    Map(BTreeMap<String, String>),
}

impl Payload {
    /// Structured entries, if the payload is a mapping.
    pub fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }
}

/// Everything known about one inbound request. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Logical path, e.g. `/page/index.mu`
    pub path: String,
    pub payload: Payload,
    /// Opaque id assigned by the transport
    pub request_id: Vec<u8>,
    /// Link the request arrived on
    pub link_id: Option<Vec<u8>>,
    /// Identity hash of the caller, when the peer identified itself
    pub remote_identity: Option<Vec<u8>>,
    /// Unix seconds
    pub requested_at: u64,
}

impl RequestContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            requested_at: crate::utils::date::unix_now(),
            ..Default::default()
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_link(mut self, link_id: impl Into<Vec<u8>>) -> Self {
        self.link_id = Some(link_id.into());
        self
    }

    pub fn with_identity(mut self, identity: impl Into<Vec<u8>>) -> Self {
        self.remote_identity = Some(identity.into());
        self
    }

    /// Hex form of the caller identity, `anonymous` when absent.
    pub fn peer(&self) -> String {
        self.remote_identity
            .as_deref()
            .map_or_else(|| ANONYMOUS.to_owned(), hex::encode)
    }
}

/// Peer label used when a request carries no identity.
pub const ANONYMOUS: &str = "anonymous";
