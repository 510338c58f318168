//! Serving and indexing error types.

use std::path::PathBuf;
use thiserror::Error;

/// Why a request could not be served.
///
/// Pages collapse every variant into the not-authorized payload, so the
/// distinction only reaches the operator log.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("path escapes served root: `{0}`")]
    PathTraversal(String),

    #[error("no such file: `{0}`")]
    NotFound(String),

    #[error("failed to read `{0}`")]
    Io(PathBuf, #[source] std::io::Error),
}

/// Directory scan failure. Only root-level problems surface here;
/// unreadable subtrees are logged and skipped.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("served root `{0}` does not exist")]
    MissingRoot(PathBuf),

    #[error("served root `{0}` is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to read served root `{0}`")]
    Io(PathBuf, #[source] std::io::Error),
}
