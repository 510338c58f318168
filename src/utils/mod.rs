//! Utility modules for the page node.

pub mod date;
pub mod exec;
