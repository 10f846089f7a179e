//! Error types for the agent bridge
//!
//! Domain errors use thiserror. Every failure on the request/response path
//! degrades to "this update did not happen"; nothing here is fatal to the
//! process.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Which decode pass failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// Outer `{"val": ...}` envelope returned by the gateway
    Envelope,
    /// Inner `{"data": ...}` result wrapper
    ResultWrapper,
    /// A line of the event stream
    Event,
    /// Final topic/command-specific payload
    Payload,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecodeStage::Envelope => "envelope",
            DecodeStage::ResultWrapper => "result wrapper",
            DecodeStage::Event => "event",
            DecodeStage::Payload => "payload",
        };
        f.write_str(name)
    }
}

/// Command envelope codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// Command could not be serialized
    #[error("failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),

    /// Malformed JSON at one of the decode stages
    #[error("failed to decode {stage}: {source}")]
    Decode {
        /// Stage that rejected the input
        stage: DecodeStage,
        /// Underlying parser error
        #[source]
        source: serde_json::Error,
    },
}

impl CodecError {
    pub(crate) fn decode(stage: DecodeStage) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| CodecError::Decode { stage, source }
    }

    /// Stage that failed, if this is a decode error
    pub fn stage(&self) -> Option<DecodeStage> {
        match self {
            CodecError::Encode(_) => None,
            CodecError::Decode { stage, .. } => Some(*stage),
        }
    }
}

/// Connection and body-read errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request could not be sent or the connection failed
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// Response body could not be read
    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),

    /// Stream read failure from a non-HTTP source
    #[error("stream read failed: {0}")]
    Read(String),
}

/// Failure behind an [`RpcError`]
#[derive(Debug, Error)]
pub enum RpcFailure {
    /// Network or body read failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Envelope, wrapper or payload decode failure
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Gateway call failure tagged with the originating operation
#[derive(Debug, Error)]
#[error("{operation}: {failure}")]
pub struct RpcError {
    /// Purpose label of the command that failed
    pub operation: String,
    /// What went wrong
    #[source]
    pub failure: RpcFailure,
}

impl RpcError {
    pub(crate) fn new(operation: &str, failure: impl Into<RpcFailure>) -> Self {
        Self {
            operation: operation.to_string(),
            failure: failure.into(),
        }
    }
}

/// Dashboard action failures
#[derive(Debug, Error)]
pub enum ActionError {
    /// The gateway call failed
    #[error("gateway call failed: {0}")]
    Rpc(#[from] RpcError),

    /// A user-supplied value was rejected before any call was made
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A value read back from the page was missing
    #[error("page value '{target}.{attribute}' is unavailable")]
    MissingPageValue {
        /// Target identifier
        target: String,
        /// Attribute name
        attribute: String,
    },
}

/// Configuration file errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Config file is not valid JSON for [`BridgeConfig`](super::BridgeConfig)
    #[error("config file {path} is invalid: {source}")]
    Json {
        /// File path
        path: PathBuf,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted flag store errors
#[derive(Debug, Error)]
pub enum FlagStoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Convenience result alias for gateway calls
pub type RpcResult<T> = std::result::Result<T, RpcError>;

/// Convenience result alias for dashboard actions
pub type ActionResult<T> = std::result::Result<T, ActionError>;
