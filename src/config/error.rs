//! Node configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Why the node configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read node config `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("malformed node config")]
    Toml(#[from] toml::de::Error),

    #[error("invalid node config: {0}")]
    Validation(String),
}
