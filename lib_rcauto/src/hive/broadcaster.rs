//! # Transaction Broadcaster
//!
//! Builds, signs and submits a batch of operations as one transaction through
//! `condenser_api.broadcast_transaction_synchronous`.
//!
//! Known node errors are classified before they reach the caller:
//!
//! - `same amount of RC already exist`: the delegation is already in place;
//!   reported as [`BroadcastOutcome::NoOp`].
//! - `plugin exception ... custom json`: the node choked on the payload; move
//!   to the next node and submit once more.
//! - transport failures: rotate, at most once per node.
//! - anything else propagates.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::hive::operations::Operation;
use crate::hive::rpc_client::{RpcClient, RpcError};
use crate::hive::signer::{KeyRole, SignerError, TransactionSigner};
use crate::hive::transaction::TransactionBuilder;

const BROADCAST_METHOD: &str = "condenser_api.broadcast_transaction_synchronous";

static SAME_AMOUNT: OnceLock<Option<Regex>> = OnceLock::new();
static PLUGIN_EXCEPTION: OnceLock<Option<Regex>> = OnceLock::new();

/// Block reference returned by a synchronous broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrxResult {
    /// Transaction id.
    #[serde(rename = "id")]
    pub trx_id: String,
    /// Block the transaction landed in.
    pub block_num: u64,
    /// Position inside the block.
    pub trx_num: u32,
    /// Whether the node reported it as expired.
    #[serde(default)]
    pub expired: bool,
}

/// Result of a broadcast that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Included in a block.
    Confirmed(TrxResult),
    /// The chain already had this state; nothing was changed.
    NoOp(String),
}

impl BroadcastOutcome {
    /// The transaction id, when there is one.
    pub fn trx_id(&self) -> Option<&str> {
        match self {
            BroadcastOutcome::Confirmed(trx) => Some(trx.trx_id.as_str()),
            BroadcastOutcome::NoOp(_) => None,
        }
    }
}

/// Errors from [`Broadcaster::broadcast`].
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// Nothing to broadcast.
    #[error("empty operation batch")]
    Empty,

    /// The reference block lookup failed.
    #[error("could not build transaction: {0}")]
    Build(RpcError),

    /// The signer failed.
    #[error(transparent)]
    Signer(#[from] SignerError),

    /// The node rejected the transaction or no node was reachable.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// How a node-reported broadcast error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeErrorClass {
    /// State already matches; success without change.
    BenignNoOp,
    /// Try the next node once.
    PluginException,
    /// Propagate.
    Other,
}

/// Classifies a node error message.
pub fn classify(message: &str) -> NodeErrorClass {
    if regex_matches(&SAME_AMOUNT, r"same amount of RC already exist", message) {
        NodeErrorClass::BenignNoOp
    } else if regex_matches(&PLUGIN_EXCEPTION, r"^plugin exception.*custom json", message) {
        NodeErrorClass::PluginException
    } else {
        NodeErrorClass::Other
    }
}

fn regex_matches(cell: &'static OnceLock<Option<Regex>>, pattern: &str, text: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(text))
}

/// Submits signed transactions through the account/posting pool.
pub struct Broadcaster {
    client: Arc<RpcClient>,
    builder: TransactionBuilder,
    signer: Arc<dyn TransactionSigner>,
    chain_id: String,
}

impl Broadcaster {
    /// Creates a broadcaster signing for `chain_id`.
    pub fn new(client: Arc<RpcClient>, signer: Arc<dyn TransactionSigner>, chain_id: String) -> Self {
        Self {
            builder: TransactionBuilder::new(Arc::clone(&client)),
            client,
            signer,
            chain_id,
        }
    }

    /// Builds, signs and submits `operations` as one transaction.
    ///
    /// # Errors
    /// Any failure not classified as benign; see the module docs.
    pub async fn broadcast(&self, operations: Vec<Operation>) -> Result<BroadcastOutcome, BroadcastError> {
        if operations.is_empty() {
            return Err(BroadcastError::Empty);
        }
        let role = if operations.iter().any(|op| op.required_key_role() == KeyRole::Active) {
            KeyRole::Active
        } else {
            KeyRole::Posting
        };

        let mut trx = self.builder.build(operations).await.map_err(BroadcastError::Build)?;
        trx.signatures = self.signer.sign(&trx, &self.chain_id, role).await?;

        let pool_size = self.client.rotation().len();
        let mut transport_failures = 0usize;
        let mut plugin_retry_used = false;

        loop {
            let node = self.client.current_node().to_string();
            let err = match self.client.call_current(BROADCAST_METHOD, json!([trx])).await {
                Ok(value) => {
                    let result = serde_json::from_value::<TrxResult>(value).map_err(|e| RpcError::Malformed {
                        node: node.clone(),
                        detail: e.to_string(),
                    })?;
                    log::info!("Transaction {} in block {} via {}", result.trx_id, result.block_num, node);
                    return Ok(BroadcastOutcome::Confirmed(result));
                }
                Err(err) => err,
            };

            match &err {
                RpcError::Node { message, .. } => match classify(message) {
                    NodeErrorClass::BenignNoOp => {
                        log::info!("{message}");
                        log::info!("No changes to delegation");
                        return Ok(BroadcastOutcome::NoOp(message.clone()));
                    }
                    NodeErrorClass::PluginException if !plugin_retry_used => {
                        log::info!("Unhandled RPC error on {node}: {message}");
                        plugin_retry_used = true;
                        self.client.next_node();
                    }
                    _ => {
                        log::error!("Broadcast rejected by {node}: {message}");
                        return Err(err.into());
                    }
                },
                RpcError::Transport { .. } | RpcError::Malformed { .. } => {
                    transport_failures += 1;
                    log::warn!("Broadcast via {node} failed: {err}");
                    if transport_failures >= pool_size {
                        log::error!("Broadcast failed on every node");
                        return Err(BroadcastError::Rpc(RpcError::AllNodesExhausted {
                            pool: self.client.name().to_string(),
                            method: BROADCAST_METHOD.to_string(),
                            attempts: transport_failures,
                            last_error: Box::new(err),
                        }));
                    }
                    self.client.next_node();
                }
                _ => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hive::mock::{dgp_result, rpc_error, rpc_result, MockSigner, ScriptedTransport};
    use crate::hive::operations::DelegateRcInstruction;
    use crate::hive::transport::TransportError;

    fn op() -> Operation {
        DelegateRcInstruction {
            from: "podping".into(),
            to: "podping.aaa".into(),
            max_rc: 5,
        }
        .to_operation()
    }

    fn broadcaster(transport: Arc<ScriptedTransport>) -> Broadcaster {
        let client = RpcClient::new(
            "posting",
            vec!["http://n1".into(), "http://n2".into(), "http://n3".into()],
            transport,
        )
        .expect("client");
        Broadcaster::new(Arc::new(client), Arc::new(MockSigner::default()), "beeab0de".into())
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify("Assert Exception:false: The same amount of RC already exist for podping.aaa"),
            NodeErrorClass::BenignNoOp
        );
        assert_eq!(
            classify("plugin exception:Unhandled exception in custom json evaluator"),
            NodeErrorClass::PluginException
        );
        assert_eq!(classify("missing required posting authority"), NodeErrorClass::Other);
    }

    #[tokio::test]
    async fn test_confirmed_broadcast_carries_signatures() {
        let transport = Arc::new(ScriptedTransport::new(|_n, req| match req.method.as_str() {
            "condenser_api.get_dynamic_global_properties" => Ok(dgp_result()),
            _ => {
                assert_eq!(req.params[0]["signatures"], json!(["mocksig"]));
                Ok(rpc_result(json!({"id": "abc123", "block_num": 77, "trx_num": 3, "expired": false})))
            }
        }));
        let outcome = broadcaster(transport).broadcast(vec![op()]).await.expect("broadcast");
        assert_eq!(outcome.trx_id(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_same_amount_is_a_noop() {
        let transport = Arc::new(ScriptedTransport::new(|_n, req| match req.method.as_str() {
            "condenser_api.get_dynamic_global_properties" => Ok(dgp_result()),
            _ => Ok(rpc_error(-32000, "The same amount of RC already exist")),
        }));
        let outcome = broadcaster(transport).broadcast(vec![op()]).await.expect("noop");
        assert!(matches!(outcome, BroadcastOutcome::NoOp(_)));
    }

    #[tokio::test]
    async fn test_plugin_exception_retries_once_on_next_node() {
        let transport = Arc::new(ScriptedTransport::new(|node, req| match req.method.as_str() {
            "condenser_api.get_dynamic_global_properties" => Ok(dgp_result()),
            _ if node == "http://n1" => Ok(rpc_error(-32003, "plugin exception: bad custom json")),
            _ => Ok(rpc_result(json!({"id": "def", "block_num": 1, "trx_num": 0, "expired": false}))),
        }));
        let b = broadcaster(transport.clone());
        let outcome = b.broadcast(vec![op()]).await.expect("second node accepts");
        assert_eq!(outcome.trx_id(), Some("def"));
        assert_eq!(b.client.current_node(), "http://n2");
    }

    #[tokio::test]
    async fn test_plugin_exception_twice_propagates() {
        let transport = Arc::new(ScriptedTransport::new(|_n, req| match req.method.as_str() {
            "condenser_api.get_dynamic_global_properties" => Ok(dgp_result()),
            _ => Ok(rpc_error(-32003, "plugin exception: bad custom json")),
        }));
        let err = broadcaster(transport.clone()).broadcast(vec![op()]).await.expect_err("fails");
        assert!(matches!(err, BroadcastError::Rpc(RpcError::Node { .. })));
        // One get_dynamic_global_properties plus exactly two submissions.
        assert_eq!(transport.count_method(BROADCAST_METHOD), 2);
    }

    #[tokio::test]
    async fn test_transport_failures_rotate_up_to_pool_size() {
        let transport = Arc::new(ScriptedTransport::new(|_n, req| match req.method.as_str() {
            "condenser_api.get_dynamic_global_properties" => Ok(dgp_result()),
            _ => Err(TransportError::Timeout),
        }));
        let err = broadcaster(transport.clone()).broadcast(vec![op()]).await.expect_err("fails");
        assert!(matches!(err, BroadcastError::Rpc(RpcError::AllNodesExhausted { attempts: 3, .. })));
        assert_eq!(transport.count_method(BROADCAST_METHOD), 3);
    }

    #[tokio::test]
    async fn test_other_errors_propagate_without_retry() {
        let transport = Arc::new(ScriptedTransport::new(|_n, req| match req.method.as_str() {
            "condenser_api.get_dynamic_global_properties" => Ok(dgp_result()),
            _ => Ok(rpc_error(-32000, "missing required posting authority")),
        }));
        let err = broadcaster(transport.clone()).broadcast(vec![op()]).await.expect_err("fails");
        assert!(matches!(err, BroadcastError::Rpc(RpcError::Node { .. })));
        assert_eq!(transport.count_method(BROADCAST_METHOD), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let transport = Arc::new(ScriptedTransport::new(|_n, _r| Ok(dgp_result())));
        assert!(matches!(
            broadcaster(transport).broadcast(vec![]).await,
            Err(BroadcastError::Empty)
        ));
    }
}
