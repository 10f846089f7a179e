//! Hive Bridge – a local agent bridge between a storage node and its dashboard
//!
//! This crate implements:
//! - A request/response client for the node's command gateway
//! - A long-lived consumer of the node's newline-delimited event stream
//! - Projections of event payloads onto a dashboard page
//! - Session tracking and the restart banner check
//! - User actions with single-flight dispatch

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Gateway client, event stream and dashboard
pub mod bridge;

/// Display formatting and file helpers
pub mod util;

// Re-export key types for convenience
pub use bridge::{Bridge, BridgeConfig};

/// Current version of the bridge
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
