//! Scripted stand-ins for the network and the signing service.
//!
//! Enabled for this crate's unit tests and, through the `mock` feature, for the
//! scenario tests in other crates.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::hive::signer::{KeyRole, SignerError, TransactionSigner};
use crate::hive::transaction::Transaction;
use crate::hive::transport::{JsonRpcRequest, RpcTransport, TransportError};

type Handler = dyn Fn(&str, &JsonRpcRequest) -> Result<Value, TransportError> + Send + Sync;

/// A transport answering every request through a closure, recording calls.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<(String, JsonRpcRequest)>>,
}

impl ScriptedTransport {
    /// Wraps `handler(node, request)`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &JsonRpcRequest) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every `(node, request)` seen so far.
    pub fn calls(&self) -> Vec<(String, JsonRpcRequest)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of requests seen so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Number of requests for `method`.
    pub fn count_method(&self, method: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.iter().filter(|(_, r)| r.method == method).count())
            .unwrap_or_default()
    }

    /// Requests for `method`, in order.
    pub fn requests_for(&self, method: &str) -> Vec<JsonRpcRequest> {
        self.calls
            .lock()
            .map(|c| c.iter().filter(|(_, r)| r.method == method).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn post(&self, node: &str, request: &JsonRpcRequest) -> Result<Value, TransportError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((node.to_string(), request.clone()));
        }
        (self.handler)(node, request)
    }
}

/// A successful JSON-RPC response document.
pub fn rpc_result(result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": 1, "result": result})
}

/// A JSON-RPC error response document.
pub fn rpc_error(code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": 1, "error": {"code": code, "message": message}})
}

/// A plausible `get_dynamic_global_properties` response.
pub fn dgp_result() -> Value {
    rpc_result(json!({
        "head_block_number": 84_000_123,
        "head_block_id": "0501c77b3f7e2a6b9c1d2e3f4a5b6c7d8e9f0a1b",
        "time": "2024-05-01T10:00:00"
    }))
}

/// A broadcast result for trx id `id`.
pub fn trx_result(id: &str) -> Value {
    rpc_result(json!({"id": id, "block_num": 84_000_124, "trx_num": 0, "expired": false}))
}

/// A signer returning a fixed signature and remembering what it signed.
#[derive(Default)]
pub struct MockSigner {
    signed: Mutex<Vec<(Transaction, KeyRole)>>,
}

impl MockSigner {
    /// Transactions signed so far.
    pub fn signed(&self) -> Vec<(Transaction, KeyRole)> {
        self.signed.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TransactionSigner for MockSigner {
    async fn sign(&self, trx: &Transaction, _chain_id: &str, role: KeyRole) -> Result<Vec<String>, SignerError> {
        if let Ok(mut signed) = self.signed.lock() {
            signed.push((trx.clone(), role));
        }
        Ok(vec!["mocksig".to_string()])
    }
}
