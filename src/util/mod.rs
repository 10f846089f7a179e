//! Helpers shared across the bridge.

pub mod format;
pub mod fs;
