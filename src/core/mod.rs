//! Core types - pure abstractions shared across the codebase.

mod kind;
mod request;
mod state;

pub use kind::RouteKind;
pub use request::{ANONYMOUS, Payload, RequestContext};
pub use state::{StopSignal, setup_shutdown_handler};
