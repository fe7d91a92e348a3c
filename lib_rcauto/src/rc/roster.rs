//! # Account Roster
//!
//! The accounts this service manages. Suppliers are the primary account plus
//! configured accounts that granted it posting authority; consumers are the
//! accounts the primary account follows. Accounts outside the roster are never
//! delegated to or from.

use crate::configs::settings::Settings;
use crate::hive::api;
use crate::hive::rpc_client::{RpcClient, RpcError};
use crate::rc::snapshot::Role;

/// Tracked accounts, partitioned into suppliers and consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountRoster {
    delegating: Vec<String>,
    receiving: Vec<String>,
}

impl AccountRoster {
    /// Builds a roster from explicit lists. Receivers that are also
    /// delegators are dropped from the receiving side.
    pub fn new(delegating: Vec<String>, receiving: Vec<String>) -> Self {
        let mut unique_delegating: Vec<String> = Vec::with_capacity(delegating.len());
        for account in delegating {
            if !unique_delegating.contains(&account) {
                unique_delegating.push(account);
            }
        }
        let mut receiving: Vec<String> = receiving
            .into_iter()
            .filter(|a| !unique_delegating.contains(a))
            .collect();
        receiving.sort();
        receiving.dedup();
        Self {
            delegating: unique_delegating,
            receiving,
        }
    }

    /// Queries the chain for the roster.
    ///
    /// When the posting authority lookup fails the configured delegating list
    /// is used unchecked.
    ///
    /// # Errors
    /// Fails when the follow list of the primary account cannot be read.
    pub async fn discover(account_client: &RpcClient, settings: &Settings) -> Result<Self, RpcError> {
        let primary = settings.primary_account.as_str();
        let configured: Vec<String> = settings
            .delegating_accounts
            .iter()
            .filter(|a| a.as_str() != primary)
            .cloned()
            .collect();

        let authorized = match api::get_accounts(account_client, &configured).await {
            Ok(infos) => configured
                .iter()
                .filter(|name| {
                    let granted = infos.iter().any(|i| &i.name == *name && i.grants_posting_to(primary));
                    if !granted {
                        log::warn!("{name} has not granted posting authority to {primary}; not used as a delegator");
                    }
                    granted
                })
                .cloned()
                .collect(),
            Err(e) => {
                log::error!("Posting authority lookup failed, using configured delegators: {e}");
                configured
            }
        };

        let mut delegating = vec![primary.to_string()];
        delegating.extend(authorized);

        let following = api::get_following(account_client, primary).await?;
        let roster = Self::new(delegating, following);
        log::info!(
            "Roster: {} delegating, {} receiving",
            roster.delegating.len(),
            roster.receiving.len()
        );
        Ok(roster)
    }

    /// Suppliers in priority order, primary first.
    pub fn delegating(&self) -> &[String] {
        &self.delegating
    }

    /// Consumers, sorted.
    pub fn receiving(&self) -> &[String] {
        &self.receiving
    }

    /// Delegating followed by receiving accounts.
    pub fn all(&self) -> Vec<String> {
        self.delegating.iter().chain(self.receiving.iter()).cloned().collect()
    }

    /// True when `account` is tracked at all.
    pub fn contains(&self, account: &str) -> bool {
        self.delegating.iter().chain(self.receiving.iter()).any(|a| a == account)
    }

    /// The role of `account`; untracked accounts count as targets.
    pub fn role_of(&self, account: &str) -> Role {
        if self.delegating.iter().any(|a| a == account) {
            Role::Delegating
        } else {
            Role::Target
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hive::mock::{rpc_error, rpc_result, ScriptedTransport};
    use serde_json::json;
    use std::sync::Arc;

    fn settings() -> Settings {
        Settings {
            primary_account: "podping".into(),
            delegating_accounts: vec!["podping.bol".into(), "podping.stale".into()],
            ..Settings::default()
        }
    }

    fn following() -> serde_json::Value {
        rpc_result(json!([
            {"follower": "podping", "following": "podping.zzz", "what": ["blog"]},
            {"follower": "podping", "following": "podping.bol", "what": ["blog"]},
            {"follower": "podping", "following": "podping.aaa", "what": ["blog"]}
        ]))
    }

    #[test]
    fn test_new_dedups_and_sorts() {
        let roster = AccountRoster::new(
            vec!["p".into(), "d".into(), "p".into()],
            vec!["z".into(), "d".into(), "a".into(), "z".into()],
        );
        assert_eq!(roster.delegating(), ["p".to_string(), "d".to_string()]);
        assert_eq!(roster.receiving(), ["a".to_string(), "z".to_string()]);
        assert_eq!(roster.all().len(), 4);
        assert_eq!(roster.role_of("d"), Role::Delegating);
        assert_eq!(roster.role_of("a"), Role::Target);
        assert!(!roster.contains("x"));
    }

    #[tokio::test]
    async fn test_discover_checks_posting_authority() {
        let transport = Arc::new(ScriptedTransport::new(|_n, req| match req.method.as_str() {
            "condenser_api.get_accounts" => Ok(rpc_result(json!([
                {"name": "podping.bol", "posting": {"weight_threshold": 1, "account_auths": [["podping", 1]], "key_auths": []}},
                {"name": "podping.stale", "posting": {"weight_threshold": 1, "account_auths": [], "key_auths": []}}
            ]))),
            _ => Ok(following()),
        }));
        let client = RpcClient::new("accounts", vec!["http://n1".into()], transport).expect("client");

        let roster = AccountRoster::discover(&client, &settings()).await.expect("roster");

        assert_eq!(roster.delegating(), ["podping".to_string(), "podping.bol".to_string()]);
        assert_eq!(roster.receiving(), ["podping.aaa".to_string(), "podping.zzz".to_string()]);
    }

    #[tokio::test]
    async fn test_discover_falls_back_to_configured_list() {
        let transport = Arc::new(ScriptedTransport::new(|_n, req| match req.method.as_str() {
            "condenser_api.get_accounts" => Ok(rpc_error(-32000, "unavailable")),
            _ => Ok(following()),
        }));
        let client = RpcClient::new("accounts", vec!["http://n1".into()], transport).expect("client");

        let roster = AccountRoster::discover(&client, &settings()).await.expect("roster");

        assert_eq!(
            roster.delegating(),
            ["podping".to_string(), "podping.bol".to_string(), "podping.stale".to_string()]
        );
    }
}
