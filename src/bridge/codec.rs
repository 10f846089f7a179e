//! Command envelope codec.
//!
//! The gateway speaks a doubly-encoded JSON protocol. Requests carry a single
//! `val` string holding the command tokens joined by a private separator.
//! Responses carry a `val` string which is itself JSON for an [`Out`] wrapper,
//! whose `data` member holds the actual payload. Every response therefore goes
//! through two decode passes before the payload can be read as a typed value.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::error::{CodecError, CodecResult, DecodeStage};

/// Separator the gateway uses to split command tokens.
pub const SPLICER: &str = "%$#";

/// A single gateway command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    program: String,
    tokens: Vec<String>,
    purpose: String,
}

impl Command {
    /// Build a command for `program` with the given subcommand tokens.
    ///
    /// `purpose` names the logical action and shows up in logs and errors.
    pub fn new<I, S>(program: &str, tokens: I, purpose: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            tokens: tokens.into_iter().map(Into::into).collect(),
            purpose: purpose.to_string(),
        }
    }

    /// Purpose label of this command
    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    /// Program followed by tokens, joined with [`SPLICER`].
    pub fn joined(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.tokens.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(SPLICER)
    }
}

/// Outer wire object: `{"val": "<string>"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Joined command (requests) or JSON-encoded [`Out`] (responses)
    pub val: String,
}

/// Inner result wrapper: `{"data": <payload>}`.
#[derive(Debug, Deserialize)]
pub struct Out {
    /// Payload kept as raw JSON text for the final, typed decode
    pub data: Box<RawValue>,
}

/// Serialize a command into the request body the gateway expects.
pub fn encode(command: &Command) -> CodecResult<Vec<u8>> {
    let envelope = Envelope {
        val: command.joined(),
    };
    serde_json::to_vec(&envelope).map_err(CodecError::Encode)
}

/// First decode pass: extract the `val` string from the outer envelope.
pub fn decode_envelope(bytes: &[u8]) -> CodecResult<String> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(CodecError::decode(DecodeStage::Envelope))?;
    Ok(envelope.val)
}

/// Second decode pass: parse the [`Out`] wrapper and return the bytes of its
/// `data` member.
pub fn decode_result_wrapper(raw_inner: &[u8]) -> CodecResult<Vec<u8>> {
    let out: Out =
        serde_json::from_slice(raw_inner).map_err(CodecError::decode(DecodeStage::ResultWrapper))?;
    Ok(out.data.get().as_bytes().to_vec())
}

/// Apply both decode passes to a gateway response body.
pub fn unwrap_response(bytes: &[u8]) -> CodecResult<Vec<u8>> {
    let inner = decode_envelope(bytes)?;
    decode_result_wrapper(inner.as_bytes())
}

/// Final decode of payload bytes into a typed value.
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> CodecResult<T> {
    serde_json::from_slice(payload).map_err(CodecError::decode(DecodeStage::Payload))
}

/// Render payload bytes as display text.
///
/// JSON strings are unquoted; every other value is shown as its JSON text.
pub fn payload_text(payload: &[u8]) -> String {
    match serde_json::from_slice::<String>(payload) {
        Ok(text) => text,
        Err(_) => String::from_utf8_lossy(payload).trim().to_string(),
    }
}
