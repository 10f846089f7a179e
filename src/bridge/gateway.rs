//! Request/response client for the local hive-cli gateway.
//!
//! Every call is one HTTP POST carrying an encoded [`Command`]. Query commands
//! answer with a doubly-encoded payload; mutating commands answer with free
//! text inside the outer envelope. No retries happen here.

use serde::de::DeserializeOwned;
use std::time::Duration;

use super::BridgeConfig;
use super::codec::{self, Command};
use super::error::{RpcError, RpcResult, TransportError};

/// Client for the gateway's execute endpoint.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    url: String,
}

impl GatewayClient {
    /// Build a client from the bridge configuration.
    pub fn new(config: &BridgeConfig) -> Result<Self, TransportError> {
        let http = build_client(config.request_timeout_secs).map_err(TransportError::Request)?;
        Ok(Self::with_http(http, &config.gateway_url))
    }

    /// Reuse an existing HTTP client.
    pub fn with_http(http: reqwest::Client, url: &str) -> Self {
        Self {
            http,
            url: url.to_string(),
        }
    }

    /// Shared HTTP client
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Execute endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run a query command and return its payload bytes after both decode
    /// passes.
    pub async fn invoke(&self, command: &Command) -> RpcResult<Vec<u8>> {
        let body = self.post(command).await?;
        let payload = codec::unwrap_response(&body)
            .map_err(|err| RpcError::new(command.purpose(), err))?;
        tracing::debug!(
            operation = command.purpose(),
            bytes = payload.len(),
            "gateway payload decoded"
        );
        Ok(payload)
    }

    /// Run a query command and decode its payload into `T`.
    pub async fn invoke_as<T: DeserializeOwned>(&self, command: &Command) -> RpcResult<T> {
        let payload = self.invoke(command).await?;
        codec::decode_payload(&payload).map_err(|err| RpcError::new(command.purpose(), err))
    }

    /// Run a query command and return the envelope's inner string once it has
    /// been checked to be a valid result wrapper.
    pub async fn invoke_wrapped(&self, command: &Command) -> RpcResult<String> {
        let body = self.post(command).await?;
        let inner =
            codec::decode_envelope(&body).map_err(|err| RpcError::new(command.purpose(), err))?;
        codec::decode_result_wrapper(inner.as_bytes())
            .map_err(|err| RpcError::new(command.purpose(), err))?;
        Ok(inner)
    }

    /// Run a mutating command and return the gateway's free-text answer.
    ///
    /// The answer is not structured; callers look for failure markers such as
    /// `"not"` in the text rather than relying on a status code.
    pub async fn modify_config(&self, command: &Command) -> RpcResult<String> {
        let body = self.post(command).await?;
        let text =
            codec::decode_envelope(&body).map_err(|err| RpcError::new(command.purpose(), err))?;
        tracing::debug!(operation = command.purpose(), response = %text, "config command answered");
        Ok(text)
    }

    async fn post(&self, command: &Command) -> RpcResult<Vec<u8>> {
        let operation = command.purpose();
        let body = codec::encode(command).map_err(|err| RpcError::new(operation, err))?;

        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| RpcError::new(operation, TransportError::Request(err)))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|err| RpcError::new(operation, TransportError::Body(err)))?;
        Ok(bytes.to_vec())
    }
}

pub(crate) fn build_client(timeout_secs: Option<u64>) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder.build()
}
