//! Removable-media batch daemon.
//!
//! Watches for removable volumes and, while batch mode is armed, runs each
//! newly inserted one through wipe, copy, verify and finalize.

pub mod adapters;
pub mod config;
pub mod context;
pub mod core;
pub mod logging;
pub mod rpc;
