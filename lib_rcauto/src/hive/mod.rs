//! # Chain Access Module
//!
//! Everything that talks to Hive API nodes. The chain is treated as a remote
//! procedure endpoint with several interchangeable hosts; this module never
//! serializes the binary transaction format and never holds private keys.
//!
//! ## Contained Modules:
//!
//! - **`transport`**: the `RpcTransport` seam and its HTTP implementation.
//! - **`rpc_client`**: node-failover JSON-RPC client with a rotating node pointer.
//! - **`api`**: typed wrappers for the calls the RC engine needs.
//! - **`operations`**: `custom_json`, `delegate_rc` and `feed_publish` payloads.
//! - **`transaction`**: reference block lookup and transaction assembly.
//! - **`signer`**: the `TransactionSigner` seam and the remote signing client.
//! - **`broadcaster`**: submit, classify known node errors, fail over.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Typed wrappers around the chain RPC methods.
pub mod api;
/// Transaction submission with error classification.
pub mod broadcaster;
/// Chain operations in condenser (array) form.
pub mod operations;
/// Node-failover JSON-RPC client.
pub mod rpc_client;
/// Signing seam and remote signer.
pub mod signer;
/// Transaction assembly.
pub mod transaction;
/// The transport seam between the RPC client and the network.
pub mod transport;

/// Scripted transports for tests.
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use broadcaster::{BroadcastError, BroadcastOutcome, Broadcaster, TrxResult};
pub use operations::{DelegateRcInstruction, Operation};
pub use rpc_client::{NodeRotation, RpcClient, RpcError};
pub use signer::{KeyRole, NoSigner, RemoteSigner, SignerError, TransactionSigner};
pub use transaction::{Transaction, TransactionBuilder};
pub use transport::{HttpTransport, JsonRpcRequest, RpcTransport, TransportError};
