//! # Settings
//!
//! One explicit, immutable configuration struct built once at startup and
//! shared as `Arc<Settings>`. Business logic never reads the environment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chain id of the Hive main network.
pub const MAINNET_CHAIN_ID: &str = "beeab0de00000000000000000000000000000000000000000000000000000000";

/// Public API nodes used when no node list is configured.
pub const DEFAULT_NODES: &[&str] = &[
    "https://rpc.podping.org",
    "https://hived.emre.sh",
    "https://api.hive.blog",
    "https://api.deathwing.me",
    "https://rpc.ausbit.dev",
];

/// Errors raised while validating the settings.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SettingsError {
    /// A setting without a usable default was not provided.
    #[error("Missing required setting: {0}")]
    MissingSetting(String),

    /// A setting was provided but its value cannot be used.
    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting {
        /// Name of the offending setting.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Validated runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// The account whose posting authority is used to sign delegations.
    pub primary_account: String,
    /// Accounts configured as RC suppliers (in priority order).
    pub delegating_accounts: Vec<String>,
    /// Seconds between two polling cycles.
    pub update_frequency_secs: u64,

    /// RC an account keeps for itself before it can delegate (`base_reserve`).
    pub rc_base_level: i64,
    /// Below this percentage an account is LOW.
    pub rc_pct_lower_target: f64,
    /// Above this percentage a delegation receiver is HIGH.
    pub rc_pct_upper_target: f64,
    /// Projected one-hour-ahead percentage that raises the alarm flag.
    pub rc_pct_alarm_level: f64,
    /// Overshoot multiplier applied to reductions so they do not oscillate.
    pub reduction_overshoot: f64,
    /// Corrections smaller than this (absolute RC) are ignored.
    pub minimum_correction: i64,

    /// Run against a test network.
    pub testnet: bool,
    /// Node used for everything when `testnet` is set.
    pub testnet_node: Option<String>,
    /// Chain id used when `testnet` is set.
    pub testnet_chain_id: Option<String>,
    /// Pool for account and posting APIs.
    pub account_nodes: Vec<String>,
    /// Pool for the `rc_api`.
    pub rc_nodes: Vec<String>,
    /// TCP connect timeout for RPC calls.
    pub connect_timeout_secs: u64,
    /// Read timeout for RPC calls; exceeding it counts as a node failure.
    pub read_timeout_secs: u64,

    /// Base URL of the remote signing service holding the keys.
    pub signer_url: Option<String>,
    /// Bearer token presented to the signing service.
    pub signer_token: Option<String>,

    /// PostgreSQL connection string. In-memory history when absent.
    pub database_url: Option<String>,
    /// Collection prefix for persisted documents.
    pub db_name: String,

    /// Rebuild the roster every this many cycles.
    pub roster_refresh_cycles: u64,

    /// Witness account publishing the price feed. The feed task is off when unset.
    pub price_feed_publisher: Option<String>,
    /// Endpoint returning the HIVE price in HBD.
    pub price_feed_url: String,
    /// JSON pointer of the price inside the endpoint's response.
    pub price_feed_pointer: String,
    /// Seconds between two price feed checks.
    pub price_feed_interval_secs: u64,
    /// File remembering the last published base price.
    pub price_feed_state_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        let nodes: Vec<String> = DEFAULT_NODES.iter().map(|n| n.to_string()).collect();
        Self {
            primary_account: String::new(),
            delegating_accounts: Vec::new(),
            update_frequency_secs: 600,
            rc_base_level: 0,
            rc_pct_lower_target: 40.0,
            rc_pct_upper_target: 80.0,
            rc_pct_alarm_level: 20.0,
            reduction_overshoot: 1.3,
            minimum_correction: 0,
            testnet: false,
            testnet_node: None,
            testnet_chain_id: None,
            account_nodes: nodes.clone(),
            rc_nodes: nodes,
            connect_timeout_secs: 3,
            read_timeout_secs: 30,
            signer_url: None,
            signer_token: None,
            database_url: None,
            db_name: "rc_history".to_string(),
            roster_refresh_cycles: 60,
            price_feed_publisher: None,
            price_feed_url: "https://api.v4v.app/v1/cryptoprices/?use_cache=true".to_string(),
            price_feed_pointer: "/v4vapp/Hive_HBD".to_string(),
            price_feed_interval_secs: 600,
            price_feed_state_file: "price_feed.json".to_string(),
        }
    }
}

impl Settings {
    /// Checks every invariant the engine relies on.
    ///
    /// # Errors
    /// Returns the first problem found. Callers at startup are expected to
    /// terminate on it rather than run with undefined thresholds.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.primary_account.trim().is_empty() {
            return Err(SettingsError::MissingSetting("PRIMARY_ACCOUNT".into()));
        }
        if self.update_frequency_secs == 0 {
            return Err(invalid("UPDATE_FREQUENCY_SECS", "must be greater than zero"));
        }
        for (name, value) in [
            ("RC_PCT_LOWER_TARGET", self.rc_pct_lower_target),
            ("RC_PCT_UPPER_TARGET", self.rc_pct_upper_target),
            ("RC_PCT_ALARM_LEVEL", self.rc_pct_alarm_level),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(invalid(name, "must be a percentage between 0 and 100"));
            }
        }
        if self.rc_pct_lower_target >= self.rc_pct_upper_target {
            return Err(invalid("RC_PCT_LOWER_TARGET", "must be below RC_PCT_UPPER_TARGET"));
        }
        if self.rc_base_level < 0 {
            return Err(invalid("RC_BASE_LEVEL", "must not be negative"));
        }
        if self.reduction_overshoot.is_nan() || self.reduction_overshoot <= 0.0 {
            return Err(invalid("RC_REDUCTION_OVERSHOOT", "must be positive"));
        }
        if self.testnet {
            if self.testnet_node.as_deref().map_or(true, str::is_empty) {
                return Err(SettingsError::MissingSetting("TESTNET_NODE".into()));
            }
            if self.testnet_chain_id.as_deref().map_or(true, str::is_empty) {
                return Err(SettingsError::MissingSetting("TESTNET_CHAINID".into()));
            }
        } else {
            if self.account_nodes.is_empty() {
                return Err(invalid("ACCOUNT_NODES", "node list is empty"));
            }
            if self.rc_nodes.is_empty() {
                return Err(invalid("RC_NODES", "node list is empty"));
            }
        }
        if self.roster_refresh_cycles == 0 {
            return Err(invalid("ROSTER_REFRESH_CYCLES", "must be greater than zero"));
        }
        Ok(())
    }

    /// Nodes for account and posting calls, honoring the testnet switch.
    pub fn effective_account_nodes(&self) -> Vec<String> {
        match (&self.testnet, &self.testnet_node) {
            (true, Some(node)) => vec![node.clone()],
            _ => self.account_nodes.clone(),
        }
    }

    /// Nodes for `rc_api` calls, honoring the testnet switch.
    pub fn effective_rc_nodes(&self) -> Vec<String> {
        match (&self.testnet, &self.testnet_node) {
            (true, Some(node)) => vec![node.clone()],
            _ => self.rc_nodes.clone(),
        }
    }

    /// The chain id transactions are signed for.
    pub fn chain_id(&self) -> String {
        match (&self.testnet, &self.testnet_chain_id) {
            (true, Some(id)) => id.clone(),
            _ => MAINNET_CHAIN_ID.to_string(),
        }
    }

    /// Collection holding the per-cycle RC readings.
    pub fn history_collection(&self) -> String {
        if self.testnet {
            format!("testnet_{}", self.db_name)
        } else {
            self.db_name.clone()
        }
    }

    /// Collection holding confirmed delegation records.
    pub fn delegation_collection(&self) -> String {
        format!("{}_deleg", self.history_collection())
    }

    /// Whether `account` is one of the configured suppliers (or the primary).
    pub fn is_delegating(&self, account: &str) -> bool {
        account == self.primary_account || self.delegating_accounts.iter().any(|a| a == account)
    }
}

fn invalid(name: &str, reason: &str) -> SettingsError {
    SettingsError::InvalidSetting {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
