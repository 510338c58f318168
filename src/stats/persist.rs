//! Durable stats file.
//!
//! One JSON document per node:
//!
//! ```json
//! {
//!   "node_info":   { "name": "...", "identity_hash": "...", ... },
//!   "connections": [ { "action": "open", "peer": "...", ... } ],
//!   "requests":    [ { "kind": "page", "path": "/page/index.mu", ... } ],
//!   "summary":     { ...last full snapshot... }
//! }
//! ```
//!
//! Every write is read-merge-write: the current document is loaded, merged
//! with the new data, and replaced atomically through a temp file. A missing
//! or corrupt document is reinitialized rather than treated as fatal.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{ConnectionEvent, NodeInfo, RequestRecord, StatsSnapshot};
use crate::{debug, warn};

/// Newest entries kept per event log in the file.
pub const MAX_LOG_ENTRIES: usize = 1000;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("stats file I/O failed at `{0}`")]
    Io(PathBuf, #[source] io::Error),

    #[error("stats file `{0}` is corrupt")]
    Corrupt(PathBuf, #[source] serde_json::Error),

    #[error("failed to encode stats")]
    Encode(#[from] serde_json::Error),
}

/// On-disk layout of the stats file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StatsFile {
    #[serde(default)]
    pub node_info: Option<NodeInfo>,
    #[serde(default)]
    pub connections: Vec<ConnectionEvent>,
    #[serde(default)]
    pub requests: Vec<RequestRecord>,
    #[serde(default)]
    pub summary: Option<StatsSnapshot>,
}

/// One appended event.
#[derive(Debug, Clone)]
pub enum StatsEvent {
    Request(RequestRecord),
    Connection(ConnectionEvent),
}

/// Serialized access to one stats file.
///
/// Holds its own lock, so file I/O never runs under the in-memory stats lock.
#[derive(Debug)]
pub struct StatsStore {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event to its log.
    pub fn append(&self, event: StatsEvent) -> Result<(), StatsError> {
        let _guard = self.io_lock.lock();
        let mut file = self.load();
        match event {
            StatsEvent::Request(record) => push_capped(&mut file.requests, record),
            StatsEvent::Connection(event) => push_capped(&mut file.connections, event),
        }
        self.write(&file)
    }

    /// Replace node info and summary, keeping the event logs.
    pub fn write_summary(&self, node: &NodeInfo, snapshot: &StatsSnapshot) -> Result<(), StatsError> {
        let _guard = self.io_lock.lock();
        let mut file = self.load();
        file.node_info = Some(node.clone());
        file.summary = Some(snapshot.clone());
        self.write(&file)?;
        debug!("stats"; "saved summary to {}", self.path.display());
        Ok(())
    }

    /// Current document; a missing or corrupt file yields a fresh one.
    pub fn load(&self) -> StatsFile {
        match read(&self.path) {
            Ok(file) => file,
            Err(StatsError::Io(_, e)) if e.kind() == io::ErrorKind::NotFound => StatsFile::default(),
            Err(e) => {
                warn!("stats"; "{}, reinitializing", e);
                StatsFile::default()
            }
        }
    }

    fn write(&self, file: &StatsFile) -> Result<(), StatsError> {
        let io_err = |e| StatsError::Io(self.path.clone(), e);

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        let json = serde_json::to_vec_pretty(file)?;
        let tmp = tmp_path(&self.path);
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

/// Read and parse a stats file.
pub fn read(path: &Path) -> Result<StatsFile, StatsError> {
    let bytes = fs::read(path).map_err(|e| StatsError::Io(path.to_path_buf(), e))?;
    serde_json::from_slice(&bytes).map_err(|e| StatsError::Corrupt(path.to_path_buf(), e))
}

fn push_capped<T>(log: &mut Vec<T>, item: T) {
    log.push(item);
    if log.len() > MAX_LOG_ENTRIES {
        let excess = log.len() - MAX_LOG_ENTRIES;
        log.drain(..excess);
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
