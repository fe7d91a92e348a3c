//! # Chain API Wrappers
//!
//! Typed access to the handful of RPC methods the RC engine consumes. Every
//! function goes through [`RpcClient::call_as`], so a misbehaving node is
//! rotated away exactly like a dead one.

use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::hive::rpc_client::{RpcClient, RpcError};

/// Page size for `list_rc_direct_delegations`.
pub const DELEGATION_PAGE_LIMIT: u32 = 100;

/// Page size for `get_following` (the node maximum).
pub const FOLLOWING_PAGE_LIMIT: u32 = 1000;

/// The stored manabar before regeneration is applied.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawManabar {
    /// Mana as of `last_update_time`.
    #[serde(deserialize_with = "int_or_string")]
    pub current_mana: i64,
    /// Unix seconds of the last manabar update.
    #[serde(deserialize_with = "int_or_string")]
    pub last_update_time: i64,
}

/// One entry of `rc_api.find_rc_accounts`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRcAccount {
    /// Account name.
    pub account: String,
    /// Stored manabar.
    pub rc_manabar: RawManabar,
    /// Maximum RC, delegations included.
    #[serde(deserialize_with = "int_or_string")]
    pub max_rc: i64,
    /// RC currently delegated away.
    #[serde(default, deserialize_with = "int_or_string")]
    pub delegated_rc: i64,
    /// RC currently received from delegators.
    #[serde(default, deserialize_with = "int_or_string")]
    pub received_delegated_rc: i64,
}

/// One entry of `rc_api.list_rc_direct_delegations`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawDelegation {
    /// Delegator.
    pub from: String,
    /// Receiver.
    pub to: String,
    /// Amount granted.
    #[serde(deserialize_with = "int_or_string")]
    pub delegated_rc: i64,
}

/// One entry of `condenser_api.get_following`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FollowEntry {
    /// The account doing the following.
    pub follower: String,
    /// The account being followed.
    pub following: String,
}

/// An authority: weighted accounts and keys.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Authority {
    /// Required weight.
    #[serde(default)]
    pub weight_threshold: u32,
    /// `[account, weight]` pairs.
    #[serde(default)]
    pub account_auths: Vec<(String, u32)>,
    /// `[public_key, weight]` pairs.
    #[serde(default)]
    pub key_auths: Vec<(String, u32)>,
}

/// The part of `condenser_api.get_accounts` the roster needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountInfo {
    /// Account name.
    pub name: String,
    /// Posting authority.
    #[serde(default)]
    pub posting: Authority,
}

impl AccountInfo {
    /// True when `account` is listed in this account's posting authority.
    pub fn grants_posting_to(&self, account: &str) -> bool {
        self.posting.account_auths.iter().any(|(name, _)| name == account)
    }
}

/// The fields of `condenser_api.get_dynamic_global_properties` used for
/// transaction reference blocks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DynamicGlobalProperties {
    /// Head block number.
    pub head_block_number: u64,
    /// Head block id, hex encoded.
    pub head_block_id: String,
    /// Chain time of the head block.
    pub time: String,
}

#[derive(Deserialize)]
struct FindRcAccountsResponse {
    #[serde(default)]
    rc_accounts: Vec<RawRcAccount>,
}

#[derive(Deserialize)]
struct ListDelegationsResponse {
    #[serde(default)]
    rc_direct_delegations: Vec<RawDelegation>,
}

/// Reads the RC state of `accounts` in one call.
///
/// # Errors
/// `RpcError::AllNodesExhausted` when no node answered usefully.
pub async fn find_rc_accounts(client: &RpcClient, accounts: &[String]) -> Result<Vec<RawRcAccount>, RpcError> {
    if accounts.is_empty() {
        return Ok(Vec::new());
    }
    let response: FindRcAccountsResponse = client
        .call_as("rc_api.find_rc_accounts", json!({ "accounts": accounts }))
        .await?;
    Ok(response.rc_accounts)
}

/// Lists every direct delegation made by `from`, ordered by recipient.
///
/// The node returns delegations of the next delegator once `from`'s run out;
/// those are dropped and end the paging.
///
/// # Errors
/// Fails when a page cannot be fetched from any node.
pub async fn list_rc_direct_delegations(client: &RpcClient, from: &str) -> Result<Vec<RawDelegation>, RpcError> {
    let mut out: Vec<RawDelegation> = Vec::new();
    let mut start_to = String::new();

    loop {
        let response: ListDelegationsResponse = client
            .call_as(
                "rc_api.list_rc_direct_delegations",
                json!({ "start": [from, start_to], "limit": DELEGATION_PAGE_LIMIT }),
            )
            .await?;
        let page_len = response.rc_direct_delegations.len();

        let mut foreign = false;
        for delegation in response.rc_direct_delegations {
            if delegation.from != from {
                foreign = true;
                break;
            }
            // Pages after the first start with the last entry of the previous one.
            if out.last().is_some_and(|last| last.to == delegation.to) {
                continue;
            }
            out.push(delegation);
        }

        if foreign || page_len < DELEGATION_PAGE_LIMIT as usize {
            break;
        }
        match out.last() {
            Some(last) if last.to != start_to => start_to = last.to.clone(),
            _ => break,
        }
    }

    Ok(out)
}

/// Accounts `account` follows (blog follows), in node order.
///
/// # Errors
/// Fails when a page cannot be fetched from any node.
pub async fn get_following(client: &RpcClient, account: &str) -> Result<Vec<String>, RpcError> {
    let mut out: Vec<String> = Vec::new();
    let mut start: Option<String> = None;

    loop {
        let page: Vec<FollowEntry> = client
            .call_as(
                "condenser_api.get_following",
                json!([account, start.as_deref(), "blog", FOLLOWING_PAGE_LIMIT]),
            )
            .await?;
        let page_len = page.len();

        for entry in page {
            if start.as_deref() == Some(entry.following.as_str()) {
                continue;
            }
            out.push(entry.following);
        }

        if page_len < FOLLOWING_PAGE_LIMIT as usize {
            break;
        }
        match out.last() {
            Some(last) if start.as_deref() != Some(last.as_str()) => start = Some(last.clone()),
            _ => break,
        }
    }

    Ok(out)
}

/// Looks up account objects (posting authority graph).
///
/// # Errors
/// Fails when no node answered usefully.
pub async fn get_accounts(client: &RpcClient, names: &[String]) -> Result<Vec<AccountInfo>, RpcError> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    client.call_as("condenser_api.get_accounts", json!([names])).await
}

/// Head block data for transaction reference fields.
///
/// # Errors
/// Fails when no node answered usefully.
pub async fn get_dynamic_global_properties(client: &RpcClient) -> Result<DynamicGlobalProperties, RpcError> {
    client
        .call_as("condenser_api.get_dynamic_global_properties", json!([]))
        .await
}

/// Nodes disagree on whether large integers are JSON numbers or strings.
fn int_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| serde::de::Error::custom(format!("integer out of range: {n}"))),
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid integer {s:?}: {e}"))),
        Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!("expected integer, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hive::mock::{rpc_result, ScriptedTransport};
    use std::sync::Arc;

    fn client(transport: Arc<ScriptedTransport>) -> RpcClient {
        RpcClient::new("test", vec!["http://n1".into()], transport).expect("client")
    }

    #[test]
    fn test_raw_rc_account_accepts_strings_and_numbers() {
        let raw: RawRcAccount = serde_json::from_value(json!({
            "account": "podping.aaa",
            "rc_manabar": {"current_mana": "123456789012", "last_update_time": 1_700_000_000},
            "max_rc": 987654321098_i64,
            "delegated_rc": 0,
            "received_delegated_rc": "5000000000",
            "max_rc_creation_adjustment": {"amount": "1", "precision": 6, "nai": "@@000000037"}
        }))
        .expect("decodes");
        assert_eq!(raw.rc_manabar.current_mana, 123_456_789_012);
        assert_eq!(raw.max_rc, 987_654_321_098);
        assert_eq!(raw.received_delegated_rc, 5_000_000_000);
    }

    #[tokio::test]
    async fn test_find_rc_accounts_sends_named_params() {
        let transport = Arc::new(ScriptedTransport::new(|_n, req| {
            assert_eq!(req.method, "rc_api.find_rc_accounts");
            assert_eq!(req.params, json!({"accounts": ["a", "b"]}));
            Ok(rpc_result(json!({"rc_accounts": []})))
        }));
        let found = find_rc_accounts(&client(transport.clone()), &["a".into(), "b".into()])
            .await
            .expect("call");
        assert!(found.is_empty());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_list_delegations_stops_at_next_delegator() {
        let transport = Arc::new(ScriptedTransport::new(|_n, _req| {
            Ok(rpc_result(json!({"rc_direct_delegations": [
                {"from": "podping", "to": "alice", "delegated_rc": 10},
                {"from": "podping", "to": "bob", "delegated_rc": "20"},
                {"from": "zed", "to": "carol", "delegated_rc": 30}
            ]})))
        }));
        let found = list_rc_direct_delegations(&client(transport), "podping").await.expect("call");
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].to, "bob");
        assert_eq!(found[1].delegated_rc, 20);
    }

    #[tokio::test]
    async fn test_list_delegations_pages_without_duplicates() {
        let transport = Arc::new(ScriptedTransport::new(|_n, req| {
            let start_to = req.params["start"][1].as_str().unwrap_or_default().to_string();
            if start_to.is_empty() {
                let page: Vec<Value> = (0..DELEGATION_PAGE_LIMIT)
                    .map(|i| json!({"from": "podping", "to": format!("acc{i:03}"), "delegated_rc": 1}))
                    .collect();
                Ok(rpc_result(json!({ "rc_direct_delegations": page })))
            } else {
                assert_eq!(start_to, format!("acc{:03}", DELEGATION_PAGE_LIMIT - 1));
                Ok(rpc_result(json!({"rc_direct_delegations": [
                    {"from": "podping", "to": start_to, "delegated_rc": 1},
                    {"from": "podping", "to": "zzz", "delegated_rc": 1}
                ]})))
            }
        }));
        let found = list_rc_direct_delegations(&client(transport.clone()), "podping").await.expect("call");
        assert_eq!(found.len(), DELEGATION_PAGE_LIMIT as usize + 1);
        assert_eq!(found.last().map(|d| d.to.as_str()), Some("zzz"));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_get_following_uses_condenser_params() {
        let transport = Arc::new(ScriptedTransport::new(|_n, req| {
            assert_eq!(req.params, json!(["podping", null, "blog", FOLLOWING_PAGE_LIMIT]));
            Ok(rpc_result(json!([
                {"follower": "podping", "following": "podping.aaa", "what": ["blog"]},
                {"follower": "podping", "following": "podping.bbb", "what": ["blog"]}
            ])))
        }));
        let following = get_following(&client(transport), "podping").await.expect("call");
        assert_eq!(following, vec!["podping.aaa".to_string(), "podping.bbb".to_string()]);
    }

    #[test]
    fn test_grants_posting_to() {
        let info: AccountInfo = serde_json::from_value(json!({
            "name": "podping.bol",
            "posting": {
                "weight_threshold": 1,
                "account_auths": [["podping", 1], ["peakd.app", 1]],
                "key_auths": [["STM5...", 1]]
            }
        }))
        .expect("decodes");
        assert!(info.grants_posting_to("podping"));
        assert!(!info.grants_posting_to("someone"));
    }
}
