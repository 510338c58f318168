//! Request and connection statistics.
//!
//! `StatsAggregator` is an owned instance shared by reference (usually an
//! `Arc`) with whoever records events. All mutation goes through one mutex
//! that guards only the stats state; the route tables and the stats file
//! have their own synchronization.

mod persist;
mod ring;

pub use persist::{MAX_LOG_ENTRIES, StatsError, StatsEvent, StatsFile, StatsStore, read};
pub use ring::RecentRing;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::{ANONYMOUS, RouteKind};
use crate::utils::date::{DateTimeUtc, unix_now};
use crate::warn;

/// Capacity of the in-memory recent-request ring.
pub const RECENT_CAPACITY: usize = 100;

/// Hourly buckets kept.
pub const HOURLY_BUCKETS: usize = 48;

/// Daily buckets kept.
pub const DAILY_BUCKETS: usize = 30;

/// Static description of the node, written alongside the stats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: Option<String>,
    pub identity_hash: String,
    pub destination_hash: String,
    pub pages_dir: PathBuf,
    pub files_dir: PathBuf,
    pub started_at: u64,
}

/// One served request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub kind: RouteKind,
    pub path: String,
    /// Hex identity, or `anonymous`
    pub peer: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionAction {
    Open,
    Close,
}

/// A link opening or closing, as logged to the stats file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub action: ConnectionAction,
    pub peer: String,
    pub link_id: String,
    pub timestamp: u64,
}

/// A currently open link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedPeer {
    pub peer: String,
    pub link_id: String,
    pub connected_at: u64,
}

/// Point-in-time copy of all statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSnapshot {
    pub started_at: u64,
    /// When this copy was taken
    pub last_updated: u64,
    pub uptime_secs: u64,
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_page_requests: u64,
    pub total_file_requests: u64,
    pub page_requests: BTreeMap<String, u64>,
    pub file_requests: BTreeMap<String, u64>,
    pub peer_requests: BTreeMap<String, u64>,
    /// Oldest first
    pub recent: Vec<RequestRecord>,
    /// Keyed `YYYY-MM-DDTHH`
    pub hourly: BTreeMap<String, u64>,
    /// Keyed `YYYY-MM-DD`
    pub daily: BTreeMap<String, u64>,
    /// Keyed by hex link id
    pub connected: BTreeMap<String, ConnectedPeer>,
}

#[derive(Debug)]
struct StatsState {
    started_at: u64,
    total_connections: u64,
    total_page_requests: u64,
    total_file_requests: u64,
    page_requests: BTreeMap<String, u64>,
    file_requests: BTreeMap<String, u64>,
    peer_requests: BTreeMap<String, u64>,
    recent: RecentRing<RequestRecord>,
    hourly: BTreeMap<String, u64>,
    daily: BTreeMap<String, u64>,
    connected: BTreeMap<String, ConnectedPeer>,
}

impl StatsState {
    fn new(started_at: u64) -> Self {
        Self {
            started_at,
            total_connections: 0,
            total_page_requests: 0,
            total_file_requests: 0,
            page_requests: BTreeMap::new(),
            file_requests: BTreeMap::new(),
            peer_requests: BTreeMap::new(),
            recent: RecentRing::new(RECENT_CAPACITY),
            hourly: BTreeMap::new(),
            daily: BTreeMap::new(),
            connected: BTreeMap::new(),
        }
    }

    fn record_request(&mut self, record: RequestRecord) {
        let (total, by_path) = match record.kind {
            RouteKind::Page => (&mut self.total_page_requests, &mut self.page_requests),
            RouteKind::File => (&mut self.total_file_requests, &mut self.file_requests),
        };
        *total += 1;
        *by_path.entry(record.path.clone()).or_default() += 1;
        *self.peer_requests.entry(record.peer.clone()).or_default() += 1;

        let at = DateTimeUtc::from_unix(record.timestamp);
        bump_bucket(&mut self.hourly, at.hour_key(), HOURLY_BUCKETS);
        bump_bucket(&mut self.daily, at.day_key(), DAILY_BUCKETS);

        self.recent.push(record);
    }

    fn snapshot(&self, now: u64) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at,
            last_updated: now,
            uptime_secs: now.saturating_sub(self.started_at),
            total_connections: self.total_connections,
            active_connections: self.connected.len() as u64,
            total_page_requests: self.total_page_requests,
            total_file_requests: self.total_file_requests,
            page_requests: self.page_requests.clone(),
            file_requests: self.file_requests.clone(),
            peer_requests: self.peer_requests.clone(),
            recent: self.recent.iter().cloned().collect(),
            hourly: self.hourly.clone(),
            daily: self.daily.clone(),
            connected: self.connected.clone(),
        }
    }
}

/// Increment `key`, dropping the oldest buckets beyond `keep`.
///
/// Keys sort chronologically, so the first key is the oldest.
fn bump_bucket(buckets: &mut BTreeMap<String, u64>, key: String, keep: usize) {
    *buckets.entry(key).or_default() += 1;
    while buckets.len() > keep {
        buckets.pop_first();
    }
}

fn peer_label(peer: Option<&[u8]>) -> String {
    peer.map_or_else(|| ANONYMOUS.to_owned(), hex::encode)
}

/// Thread-safe statistics for one node.
#[derive(Debug)]
pub struct StatsAggregator {
    node: NodeInfo,
    state: Mutex<StatsState>,
    store: Option<StatsStore>,
}

impl StatsAggregator {
    /// In-memory only.
    pub fn new(node: NodeInfo) -> Self {
        let started_at = if node.started_at == 0 { unix_now() } else { node.started_at };
        Self {
            node: NodeInfo { started_at, ..node },
            state: Mutex::new(StatsState::new(started_at)),
            store: None,
        }
    }

    /// Also append every event to the stats file at `path`.
    pub fn with_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = Some(StatsStore::new(path));
        self
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store.as_ref().map(StatsStore::path)
    }

    pub fn record_request(&self, kind: RouteKind, path: &str, peer: Option<&[u8]>, timestamp: u64) {
        let record = RequestRecord {
            kind,
            path: path.to_owned(),
            peer: peer_label(peer),
            timestamp,
        };
        self.state.lock().record_request(record.clone());
        self.append(StatsEvent::Request(record));
    }

    pub fn record_connection_open(&self, peer: Option<&[u8]>, link_id: &[u8], timestamp: u64) {
        let peer = peer_label(peer);
        let link_id = hex::encode(link_id);
        {
            let mut state = self.state.lock();
            state.total_connections += 1;
            state.connected.insert(
                link_id.clone(),
                ConnectedPeer {
                    peer: peer.clone(),
                    link_id: link_id.clone(),
                    connected_at: timestamp,
                },
            );
        }
        self.append(StatsEvent::Connection(ConnectionEvent {
            action: ConnectionAction::Open,
            peer,
            link_id,
            timestamp,
        }));
    }

    /// Unknown link ids are ignored.
    pub fn record_connection_close(&self, link_id: &[u8]) {
        let link_id = hex::encode(link_id);
        let Some(closed) = self.state.lock().connected.remove(&link_id) else {
            return;
        };
        self.append(StatsEvent::Connection(ConnectionEvent {
            action: ConnectionAction::Close,
            peer: closed.peer,
            link_id,
            timestamp: unix_now(),
        }));
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.state.lock().snapshot(unix_now())
    }

    /// Clear counters, tallies, ring and buckets. Live links and the start
    /// time are kept.
    #[allow(dead_code)]
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let connected = std::mem::take(&mut state.connected);
        *state = StatsState::new(state.started_at);
        state.connected = connected;
    }

    /// Write node info and a full snapshot to `path` (read-merge-write).
    pub fn persist(&self, path: &Path) -> Result<(), StatsError> {
        let snapshot = self.snapshot();
        match &self.store {
            Some(store) if store.path() == path => store.write_summary(&self.node, &snapshot),
            _ => StatsStore::new(path).write_summary(&self.node, &snapshot),
        }
    }

    /// Persist to the configured stats file, if any. Failures are logged.
    pub fn flush(&self) {
        if let Some(path) = self.store_path()
            && let Err(e) = self.persist(path)
        {
            warn!("stats"; "failed to persist stats: {}", e);
        }
    }

    fn append(&self, event: StatsEvent) {
        if let Some(store) = &self.store
            && let Err(e) = store.append(event)
        {
            warn!("stats"; "failed to append event: {}", e);
        }
    }
}
