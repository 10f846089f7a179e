//! Bridge between a local node gateway and a dashboard page
//!
//! This module wires the request/response gateway client, the long-lived
//! event stream consumer and the dashboard actions together, and holds the
//! configuration shared by all of them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::util::fs::write_atomic;

// Submodules
pub mod actions;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod projection;
pub mod session;
pub mod stream;
pub mod topics;
pub mod view;

pub use actions::{Action, Dashboard};
pub use error::{ActionError, CodecError, ConfigError, RpcError, TransportError};
pub use stream::{EventConsumer, StreamReport, StreamState, Termination};
pub use view::{FlagStore, Page, ViewAttachment};

/// Configuration for the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Request/response endpoint
    pub gateway_url: String,

    /// Event stream endpoint
    pub events_url: String,

    /// Program name placed in front of every command
    pub cli_program: String,

    /// Largest fragment read from the event stream before a line is split
    pub frame_capacity: usize,

    /// Consecutive read errors tolerated on the event stream
    pub max_read_errors: u32,

    /// Longest reassembled event record before the stream is abandoned
    pub max_record_bytes: usize,

    /// What to do once the event stream terminates
    pub reconnect: ReconnectPolicy,

    /// Page write retry behaviour
    pub view: ViewConfig,

    /// Upper bound on concurrently running actions
    pub max_in_flight: usize,

    /// Timeout for request/response calls; unset means none
    pub request_timeout_secs: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://localhost:4343/v3/execute".to_string(),
            events_url: "http://localhost:4343/v3/events".to_string(),
            cli_program: "hive-cli.exe".to_string(),
            frame_capacity: 4096,
            max_read_errors: 16,
            max_record_bytes: stream::DEFAULT_MAX_RECORD_BYTES,
            reconnect: ReconnectPolicy::default(),
            view: ViewConfig::default(),
            max_in_flight: 16,
            request_timeout_secs: None,
        }
    }
}

impl BridgeConfig {
    /// Load a configuration file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the configuration, replacing any existing file atomically.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_vec_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, &json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Page write retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Attempts before a write to a missing element is dropped
    pub attempts: u32,

    /// Delay between attempts, unless the page announces it mounted sooner
    pub retry_delay_ms: u64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            retry_delay_ms: 1000,
        }
    }
}

/// Event stream reconnect behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Terminate for good once the stream ends
    #[default]
    Never,
    /// Reconnect with exponential backoff
    Backoff {
        /// Delay before the first reconnect
        initial_delay_ms: u64,
        /// Cap on the delay
        max_delay_ms: u64,
        /// Reconnects allowed in a row; unset means unlimited
        #[serde(default)]
        max_attempts: Option<u32>,
    },
}

impl ReconnectPolicy {
    /// Delay before reconnect number `attempt` (zero based), or `None` to stop.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::Never => None,
            ReconnectPolicy::Backoff {
                initial_delay_ms,
                max_delay_ms,
                max_attempts,
            } => {
                if max_attempts.is_some_and(|max| attempt >= max) {
                    return None;
                }
                let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
                let delay = initial_delay_ms.saturating_mul(factor).min(*max_delay_ms);
                Some(Duration::from_millis(delay))
            }
        }
    }
}

/// Entry point tying the dashboard and the event stream together.
pub struct Bridge {
    config: BridgeConfig,
    dashboard: Arc<Dashboard>,
}

impl Bridge {
    /// Create a bridge writing to `page` and persisting flags in `flags`.
    pub fn new(
        config: BridgeConfig,
        page: Arc<dyn Page>,
        flags: Arc<dyn FlagStore>,
    ) -> Result<Self, TransportError> {
        let dashboard = Dashboard::new(&config, page, flags)?;
        Ok(Self { config, dashboard })
    }

    /// Get the current configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Shared dashboard state
    pub fn dashboard(&self) -> &Arc<Dashboard> {
        &self.dashboard
    }

    /// Build an event consumer over this bridge's dashboard.
    pub fn events(&self) -> Result<EventConsumer, TransportError> {
        EventConsumer::new(Arc::clone(&self.dashboard), &self.config)
    }

    /// Spawn the event consumer and return its state watcher with its handle.
    pub fn start_events(
        &self,
    ) -> Result<
        (
            tokio::sync::watch::Receiver<StreamState>,
            tokio::task::JoinHandle<StreamReport>,
        ),
        TransportError,
    > {
        let consumer = self.events()?;
        let states = consumer.states();
        Ok((states, consumer.spawn()))
    }

    /// Trigger an action; `false` when it is already running.
    pub fn trigger(&self, action: Action) -> bool {
        self.dashboard.trigger(action)
    }

    /// Run an action to completion on the current task.
    pub async fn run(&self, action: Action) -> Result<(), ActionError> {
        self.dashboard.run(&action).await
    }
}
