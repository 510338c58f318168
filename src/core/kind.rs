//! Content kinds served by the node.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which served tree a route belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    Page,
    File,
}

impl RouteKind {
    /// Logical path prefix, including the trailing slash.
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Page => "/page/",
            Self::File => "/file/",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::File => "file",
        }
    }

    /// Build the logical request path for a root-relative path.
    pub fn logical(self, relative: &str) -> String {
        format!("{}{}", self.prefix(), relative.trim_start_matches('/'))
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
