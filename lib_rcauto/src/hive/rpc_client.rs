//! # Node-Failover RPC Client
//!
//! Executes a call against the current node of a fixed pool. When the node
//! fails (transport failure, malformed answer, node-reported error) the
//! pointer moves to the next node and the call is retried, at most once per
//! node. The pointer is owned by the client instance and is not reset between
//! calls: a later call starts wherever the previous one left off.
//!
//! Two clients run side by side in the service, one for account and posting
//! APIs and one for `rc_api`, since the two may use different node sets.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::configs::settings::Settings;
use crate::hive::transport::{JsonRpcRequest, RpcTransport, TransportError};

/// Errors surfaced by the RPC client.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RpcError {
    /// The request never produced a JSON-RPC answer.
    #[error("{node}: {source}")]
    Transport {
        /// Node the request was sent to.
        node: String,
        /// Underlying failure.
        source: TransportError,
    },

    /// The node answered with a JSON-RPC error object.
    #[error("{node}: RPC error {code}: {message}")]
    Node {
        /// Node that reported the error.
        node: String,
        /// JSON-RPC error code.
        code: i64,
        /// Error message as reported by the node.
        message: String,
        /// Optional structured details.
        data: Option<Value>,
    },

    /// The answer had neither a usable `result` nor an `error`.
    #[error("{node}: malformed response: {detail}")]
    Malformed {
        /// Node that sent the answer.
        node: String,
        /// What was wrong with it.
        detail: String,
    },

    /// Every node of the pool failed within one rotation.
    #[error("{pool}: all {attempts} nodes failed for {method}; last error: {last_error}")]
    AllNodesExhausted {
        /// Pool name.
        pool: String,
        /// Method that was attempted.
        method: String,
        /// Attempts made (the pool size).
        attempts: usize,
        /// The failure reported by the final attempt.
        last_error: Box<RpcError>,
    },

    /// The pool was configured without nodes.
    #[error("node pool {0} is empty")]
    NoNodes(String),
}

impl RpcError {
    /// The message a node reported, looking through exhaustion wrappers.
    pub fn node_message(&self) -> Option<&str> {
        match self {
            RpcError::Node { message, .. } => Some(message.as_str()),
            RpcError::AllNodesExhausted { last_error, .. } => last_error.node_message(),
            _ => None,
        }
    }

    /// True for failures of the network path rather than of the request.
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport { .. })
    }
}

/// The rotating "current node" pointer.
///
/// An atomic index keeps the pointer consistent if tasks ever share a client;
/// ordering between concurrent callers is best effort.
#[derive(Debug)]
pub struct NodeRotation {
    nodes: Vec<String>,
    index: AtomicUsize,
}

impl NodeRotation {
    /// Starts at the first node.
    pub fn new(nodes: Vec<String>) -> Self {
        Self {
            nodes,
            index: AtomicUsize::new(0),
        }
    }

    /// Index of the node the next call goes to.
    pub fn current_index(&self) -> usize {
        self.index.load(Ordering::SeqCst) % self.nodes.len().max(1)
    }

    /// The node the next call goes to.
    pub fn current(&self) -> &str {
        self.nodes.get(self.current_index()).map(String::as_str).unwrap_or_default()
    }

    /// Moves to the next node, wrapping, and returns it.
    pub fn advance(&self) -> &str {
        let len = self.nodes.len().max(1);
        let _ = self
            .index
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1) % len));
        self.current()
    }

    /// Pool size.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when there is no node at all.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in rotation order.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }
}

/// JSON-RPC client over a pool of interchangeable nodes.
pub struct RpcClient {
    name: String,
    rotation: NodeRotation,
    transport: Arc<dyn RpcTransport>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("name", &self.name)
            .field("rotation", &self.rotation)
            .finish()
    }
}

impl RpcClient {
    /// Creates a client named `name` (used in logs) over `nodes`.
    ///
    /// # Errors
    /// `RpcError::NoNodes` when `nodes` is empty.
    pub fn new(name: &str, nodes: Vec<String>, transport: Arc<dyn RpcTransport>) -> Result<Self, RpcError> {
        if nodes.is_empty() {
            return Err(RpcError::NoNodes(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            rotation: NodeRotation::new(nodes),
            transport,
            next_id: AtomicU64::new(1),
        })
    }

    /// Builds the account/posting pool and the `rc_api` pool from the settings.
    /// Both pools share `transport`; on testnet both hold the single testnet node.
    ///
    /// # Errors
    /// Fails when a pool is empty.
    pub fn pools(
        settings: &Settings,
        transport: Arc<dyn RpcTransport>,
    ) -> Result<(Arc<RpcClient>, Arc<RpcClient>), RpcError> {
        let accounts = RpcClient::new("account_api", settings.effective_account_nodes(), Arc::clone(&transport))?;
        let rc = RpcClient::new("rc_api", settings.effective_rc_nodes(), transport)?;
        Ok((Arc::new(accounts), Arc::new(rc)))
    }

    /// Pool name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node rotation state.
    pub fn rotation(&self) -> &NodeRotation {
        &self.rotation
    }

    /// The node the next call goes to.
    pub fn current_node(&self) -> &str {
        self.rotation.current()
    }

    /// Moves the pointer to the next node and returns it.
    pub fn next_node(&self) -> &str {
        self.rotation.advance()
    }

    /// Calls `method` with failover and returns the raw `result`.
    ///
    /// # Errors
    /// `RpcError::AllNodesExhausted` when every node failed once.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.call_as::<Value>(method, params).await
    }

    /// Calls `method` with failover and decodes the `result` into `T`.
    ///
    /// A result that does not decode counts as bad data from that node and
    /// triggers a rotation like any other failure.
    ///
    /// # Errors
    /// `RpcError::AllNodesExhausted` when every node failed once.
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let attempts = self.rotation.len();
        let mut last_error = None;

        for _ in 0..attempts {
            match self.attempt_as::<T>(method, &params).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    log::warn!("{} {} failing on {}: {}", self.name, method, self.current_node(), e);
                    let next = self.next_node();
                    log::warn!("{} trying new node: {}", self.name, next);
                    last_error = Some(e);
                }
            }
        }

        let last_error = last_error.unwrap_or_else(|| RpcError::NoNodes(self.name.clone()));
        log::error!("{} {}: every node failed", self.name, method);
        Err(RpcError::AllNodesExhausted {
            pool: self.name.clone(),
            method: method.to_string(),
            attempts,
            last_error: Box::new(last_error),
        })
    }

    /// Single attempt against the current node, without moving the pointer.
    ///
    /// # Errors
    /// The failure of that one node.
    pub async fn call_current(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.attempt_as::<Value>(method, &params).await
    }

    async fn attempt_as<T: DeserializeOwned>(&self, method: &str, params: &Value) -> Result<T, RpcError> {
        let node = self.current_node().to_string();
        let request = JsonRpcRequest::new(method, params.clone(), self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut response = self
            .transport
            .post(&node, &request)
            .await
            .map_err(|source| RpcError::Transport { node: node.clone(), source })?;

        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            return Err(RpcError::Node {
                node,
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
                data: error.get("data").cloned(),
            });
        }

        let result = match response.get_mut("result") {
            Some(result) => result.take(),
            None => {
                return Err(RpcError::Malformed {
                    node,
                    detail: "response has neither result nor error".to_string(),
                })
            }
        };

        serde_json::from_value::<T>(result).map_err(|e| RpcError::Malformed {
            node,
            detail: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hive::mock::{rpc_error, rpc_result, ScriptedTransport};
    use serde_json::json;

    fn nodes() -> Vec<String> {
        vec!["http://n1".into(), "http://n2".into(), "http://n3".into()]
    }

    #[tokio::test]
    async fn test_failover_lands_on_working_node_and_stays_there() {
        let transport = Arc::new(ScriptedTransport::new(|node, _req| match node {
            "http://n3" => Ok(rpc_result(json!({"ok": true}))),
            _ => Err(TransportError::Timeout),
        }));
        let client = RpcClient::new("test", nodes(), transport.clone()).expect("client");

        let result = client.call("condenser_api.get_config", json!([])).await.expect("third node answers");

        assert_eq!(result, json!({"ok": true}));
        assert_eq!(client.rotation().current_index(), 2);
        assert_eq!(client.current_node(), "http://n3");
        assert_eq!(transport.call_count(), 3);

        // The next call starts on node 3 straight away.
        client.call("condenser_api.get_config", json!([])).await.expect("still node 3");
        assert_eq!(transport.call_count(), 4);
        assert_eq!(transport.calls().last().map(|c| c.0.clone()), Some("http://n3".to_string()));
    }

    #[tokio::test]
    async fn test_all_nodes_failing_is_exhaustion_after_pool_size_attempts() {
        let transport = Arc::new(ScriptedTransport::new(|_node, _req| Ok(rpc_error(-32000, "boom"))));
        let client = RpcClient::new("test", nodes(), transport.clone()).expect("client");

        let err = client.call("rc_api.find_rc_accounts", json!({})).await.expect_err("all fail");

        assert_eq!(transport.call_count(), 3);
        match err {
            RpcError::AllNodesExhausted { attempts, method, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(method, "rc_api.find_rc_accounts");
            }
            other => panic!("unexpected error {other:?}"),
        }
        // One full rotation brings the pointer back where it started.
        assert_eq!(client.rotation().current_index(), 0);
    }

    #[tokio::test]
    async fn test_bad_data_rotates_like_a_failure() {
        let transport = Arc::new(ScriptedTransport::new(|node, _req| match node {
            "http://n1" => Ok(json!({"jsonrpc": "2.0", "id": 1})),
            "http://n2" => Ok(rpc_result(json!("not a number"))),
            _ => Ok(rpc_result(json!(42))),
        }));
        let client = RpcClient::new("test", nodes(), transport).expect("client");

        let value: u64 = client.call_as("x.y", json!([])).await.expect("n3 answers");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_call_current_does_not_rotate() {
        let transport = Arc::new(ScriptedTransport::new(|_n, _r| Err(TransportError::Status(502))));
        let client = RpcClient::new("test", nodes(), transport).expect("client");

        let err = client.call_current("x.y", json!([])).await.expect_err("fails");
        assert!(err.is_transport());
        assert_eq!(client.rotation().current_index(), 0);
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        let transport = Arc::new(ScriptedTransport::new(|_n, _r| Ok(rpc_result(json!(null)))));
        assert!(matches!(RpcClient::new("empty", vec![], transport), Err(RpcError::NoNodes(_))));
    }

    #[test]
    fn test_rotation_wraps() {
        let rotation = NodeRotation::new(nodes());
        assert_eq!(rotation.current(), "http://n1");
        assert_eq!(rotation.advance(), "http://n2");
        assert_eq!(rotation.advance(), "http://n3");
        assert_eq!(rotation.advance(), "http://n1");
    }

    #[test]
    fn test_node_message_looks_through_exhaustion() {
        let inner = RpcError::Node {
            node: "n".into(),
            code: -32000,
            message: "same amount of RC already exist".into(),
            data: None,
        };
        let err = RpcError::AllNodesExhausted {
            pool: "p".into(),
            method: "m".into(),
            attempts: 1,
            last_error: Box::new(inner),
        };
        assert_eq!(err.node_message(), Some("same amount of RC already exist"));
    }
}
