//! # Transaction Assembly
//!
//! Builds unsigned transactions in condenser JSON form. The reference block
//! fields tie a transaction to a recent head block so it cannot be replayed on
//! a fork; the expiration bounds how long nodes keep it in their mempool.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use serde_json::Value;

use crate::hive::api::{self, DynamicGlobalProperties};
use crate::hive::operations::Operation;
use crate::hive::rpc_client::{RpcClient, RpcError};
use crate::utils::misc::{format_chain_time, parse_chain_time};

/// Seconds between the head block time and transaction expiration.
pub const EXPIRATION_SECS: i64 = 60;

/// A transaction in condenser form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    /// Low 16 bits of the reference block number.
    pub ref_block_num: u16,
    /// Little-endian u32 taken from bytes 4..8 of the reference block id.
    pub ref_block_prefix: u32,
    /// Chain time after which the transaction is dropped.
    pub expiration: String,
    /// Operations, applied atomically.
    pub operations: Vec<Operation>,
    /// Always empty.
    pub extensions: Vec<Value>,
    /// Hex signatures; empty until signed.
    pub signatures: Vec<String>,
}

/// Reference block fields derived from the global properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefBlock {
    /// See [`Transaction::ref_block_num`].
    pub ref_block_num: u16,
    /// See [`Transaction::ref_block_prefix`].
    pub ref_block_prefix: u32,
}

impl RefBlock {
    /// Derives the reference fields from a head block.
    ///
    /// Returns `None` when the block id is not hex or shorter than 8 bytes.
    pub fn from_head(head_block_number: u64, head_block_id: &str) -> Option<Self> {
        let bytes = hex::decode(head_block_id).ok()?;
        let prefix: [u8; 4] = bytes.get(4..8)?.try_into().ok()?;
        Some(Self {
            ref_block_num: (head_block_number & 0xFFFF) as u16,
            ref_block_prefix: u32::from_le_bytes(prefix),
        })
    }
}

/// Fetches a fresh reference block and wraps operations into a transaction.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    client: Arc<RpcClient>,
}

impl TransactionBuilder {
    /// Uses `client` (the account/posting pool) for the head block lookup.
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }

    /// Builds an unsigned transaction carrying `operations`.
    ///
    /// # Errors
    /// Fails when the global properties cannot be fetched or carry an
    /// unusable head block id or time.
    pub async fn build(&self, operations: Vec<Operation>) -> Result<Transaction, RpcError> {
        let props = api::get_dynamic_global_properties(&self.client).await?;
        assemble(&props, operations).ok_or_else(|| RpcError::Malformed {
            node: self.client.current_node().to_string(),
            detail: format!(
                "unusable head block {} / {} at {}",
                props.head_block_number, props.head_block_id, props.time
            ),
        })
    }
}

/// Pure part of [`TransactionBuilder::build`].
pub fn assemble(props: &DynamicGlobalProperties, operations: Vec<Operation>) -> Option<Transaction> {
    let ref_block = RefBlock::from_head(props.head_block_number, &props.head_block_id)?;
    let expiration = parse_chain_time(&props.time)? + Duration::seconds(EXPIRATION_SECS);
    Some(Transaction {
        ref_block_num: ref_block.ref_block_num,
        ref_block_prefix: ref_block.ref_block_prefix,
        expiration: format_chain_time(&expiration),
        operations,
        extensions: Vec::new(),
        signatures: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hive::operations::DelegateRcInstruction;

    fn props() -> DynamicGlobalProperties {
        DynamicGlobalProperties {
            head_block_number: 0x0123_ABCD,
            head_block_id: "0123abcd0a0b0c0d11223344556677889900aabb".to_string(),
            time: "2024-05-01T10:00:00".to_string(),
        }
    }

    #[test]
    fn test_ref_block_fields() {
        let rb = RefBlock::from_head(0x0123_ABCD, "0123abcd0a0b0c0d00000000").expect("valid id");
        assert_eq!(rb.ref_block_num, 0xABCD);
        assert_eq!(rb.ref_block_prefix, 0x0d0c_0b0a);
    }

    #[test]
    fn test_ref_block_rejects_short_or_bad_ids() {
        assert!(RefBlock::from_head(1, "0123abcd").is_none());
        assert!(RefBlock::from_head(1, "not hex at all!!").is_none());
    }

    #[test]
    fn test_assemble_sets_expiration_sixty_seconds_ahead() {
        let op = DelegateRcInstruction {
            from: "a".into(),
            to: "b".into(),
            max_rc: 1,
        }
        .to_operation();
        let trx = assemble(&props(), vec![op]).expect("assembles");
        assert_eq!(trx.expiration, "2024-05-01T10:01:00");
        assert_eq!(trx.ref_block_num, 0xABCD);
        assert_eq!(trx.operations.len(), 1);
        assert!(trx.signatures.is_empty());

        let value = serde_json::to_value(&trx).expect("serialize");
        assert_eq!(value["operations"][0][0], "custom_json");
        assert_eq!(value["extensions"], serde_json::json!([]));
    }
}
