//! # RPC Transport
//!
//! The seam between the failover client and the network. The HTTP
//! implementation posts JSON-RPC 2.0 envelopes to one node and returns the raw
//! response document; interpreting `result` and `error` is the client's job.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Fully qualified method, e.g. `rc_api.find_rc_accounts`.
    pub method: String,
    /// Positional or named parameters.
    pub params: Value,
    /// Request id echoed by the node.
    pub id: u64,
}

impl JsonRpcRequest {
    /// Builds an envelope for `method`.
    pub fn new(method: &str, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id,
        }
    }
}

/// Failures below the JSON-RPC layer. All of them count as node failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// The read timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// No connection could be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The node answered with a non-2xx HTTP status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// The body was not JSON.
    #[error("undecodable response: {0}")]
    Decode(String),

    /// Any other client-side failure.
    #[error("request failed: {0}")]
    Other(String),
}

/// Sends one request to one node.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Posts `request` to `node` and returns the decoded response document.
    async fn post(&self, node: &str, request: &JsonRpcRequest) -> Result<Value, TransportError>;
}

/// `reqwest` backed transport with connect and read timeouts.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport; a timeout counts as a node failure upstream.
    ///
    /// # Errors
    /// Fails when the TLS backend cannot be initialized.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .user_agent(concat!("rcauto/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { client })
    }

    /// Transport using the timeouts from the settings.
    ///
    /// # Errors
    /// Fails when the TLS backend cannot be initialized.
    pub fn from_settings(settings: &crate::configs::settings::Settings) -> Result<Self, TransportError> {
        Self::new(
            Duration::from_secs(settings.connect_timeout_secs),
            Duration::from_secs(settings.read_timeout_secs),
        )
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn post(&self, node: &str, request: &JsonRpcRequest) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(node)
            .json(request)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

fn classify_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_decode() {
        TransportError::Decode(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}
