use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use lib_rcauto::configs::settings::{Settings, SettingsError};

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Hive Resource Credit monitor and auto-delegator", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "RC_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RC_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RC_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "PRIMARY_ACCOUNT", help = "Account that delegates and signs with its posting authority.")]
    pub primary_account: Option<String>,

    #[clap(long, env = "DELEGATING_ACCOUNTS", value_delimiter = ',', help = "Additional RC suppliers, comma separated, in priority order.")]
    pub delegating_accounts: Option<Vec<String>>,

    #[clap(long, env = "UPDATE_FREQUENCY_SECS", help = "Seconds between polling cycles.")]
    pub update_frequency_secs: Option<u64>,

    #[clap(long, env = "RC_BASE_LEVEL", help = "RC a supplier keeps for itself.")]
    pub rc_base_level: Option<i64>,

    #[clap(long, env = "RC_PCT_LOWER_TARGET", help = "Percentage below which an account is topped up.")]
    pub rc_pct_lower_target: Option<f64>,

    #[clap(long, env = "RC_PCT_UPPER_TARGET", help = "Percentage above which a receiver's delegation is reduced.")]
    pub rc_pct_upper_target: Option<f64>,

    #[clap(long, env = "RC_PCT_ALARM_LEVEL", help = "Projected percentage that raises the alarm flag.")]
    pub rc_pct_alarm_level: Option<f64>,

    #[clap(long, env = "RC_REDUCTION_OVERSHOOT", help = "Multiplier applied to reductions.")]
    pub reduction_overshoot: Option<f64>,

    #[clap(long, env = "RC_MINIMUM_CORRECTION", help = "Corrections smaller than this are ignored.")]
    pub minimum_correction: Option<i64>,

    #[clap(long, env = "TESTNET", help = "Run against a test network (true/false).")]
    pub testnet: Option<bool>,

    #[clap(long, env = "TESTNET_NODE", help = "API node of the test network.")]
    pub testnet_node: Option<String>,

    #[clap(long, env = "TESTNET_CHAINID", help = "Chain id of the test network.")]
    pub testnet_chainid: Option<String>,

    #[clap(long, env = "ACCOUNT_NODES", value_delimiter = ',', help = "Nodes for account and posting calls, comma separated.")]
    pub account_nodes: Option<Vec<String>>,

    #[clap(long, env = "RC_NODES", value_delimiter = ',', help = "Nodes for rc_api calls, comma separated.")]
    pub rc_nodes: Option<Vec<String>>,

    #[clap(long, env = "CONNECT_TIMEOUT_SECS", help = "TCP connect timeout for RPC calls.")]
    pub connect_timeout_secs: Option<u64>,

    #[clap(long, env = "READ_TIMEOUT_SECS", help = "Read timeout for RPC calls.")]
    pub read_timeout_secs: Option<u64>,

    #[clap(long, env = "SIGNER_URL", help = "Base URL of the signing service.")]
    pub signer_url: Option<String>,

    #[clap(long, env = "SIGNER_TOKEN", help = "Bearer token for the signing service.")]
    pub signer_token: Option<String>,

    #[clap(long, env = "DB_CONNECTION", help = "PostgreSQL connection string for history.")]
    pub db_connection: Option<String>,

    #[clap(long, env = "DB_NAME", help = "Collection prefix for history documents.")]
    pub db_name: Option<String>,

    #[clap(long, env = "ROSTER_REFRESH_CYCLES", help = "Rebuild the account roster every N cycles.")]
    pub roster_refresh_cycles: Option<u64>,

    #[clap(long, env = "PRICE_FEED_PUBLISHER", help = "Witness account publishing the price feed.")]
    pub price_feed_publisher: Option<String>,

    #[clap(long, env = "PRICE_FEED_URL", help = "Endpoint returning the HIVE price in HBD.")]
    pub price_feed_url: Option<String>,

    #[clap(long, env = "PRICE_FEED_POINTER", help = "JSON pointer of the price in the endpoint's response.")]
    pub price_feed_pointer: Option<String>,

    #[clap(long, env = "PRICE_FEED_INTERVAL_SECS", help = "Seconds between price feed checks.")]
    pub price_feed_interval_secs: Option<u64>,

    #[clap(long, env = "PRICE_FEED_STATE_FILE", help = "File remembering the last published price.")]
    pub price_feed_state_file: Option<PathBuf>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            primary_account: other.primary_account.or(self.primary_account),
            delegating_accounts: other.delegating_accounts.or(self.delegating_accounts),
            update_frequency_secs: other.update_frequency_secs.or(self.update_frequency_secs),
            rc_base_level: other.rc_base_level.or(self.rc_base_level),
            rc_pct_lower_target: other.rc_pct_lower_target.or(self.rc_pct_lower_target),
            rc_pct_upper_target: other.rc_pct_upper_target.or(self.rc_pct_upper_target),
            rc_pct_alarm_level: other.rc_pct_alarm_level.or(self.rc_pct_alarm_level),
            reduction_overshoot: other.reduction_overshoot.or(self.reduction_overshoot),
            minimum_correction: other.minimum_correction.or(self.minimum_correction),
            testnet: other.testnet.or(self.testnet),
            testnet_node: other.testnet_node.or(self.testnet_node),
            testnet_chainid: other.testnet_chainid.or(self.testnet_chainid),
            account_nodes: other.account_nodes.or(self.account_nodes),
            rc_nodes: other.rc_nodes.or(self.rc_nodes),
            connect_timeout_secs: other.connect_timeout_secs.or(self.connect_timeout_secs),
            read_timeout_secs: other.read_timeout_secs.or(self.read_timeout_secs),
            signer_url: other.signer_url.or(self.signer_url),
            signer_token: other.signer_token.or(self.signer_token),
            db_connection: other.db_connection.or(self.db_connection),
            db_name: other.db_name.or(self.db_name),
            roster_refresh_cycles: other.roster_refresh_cycles.or(self.roster_refresh_cycles),
            price_feed_publisher: other.price_feed_publisher.or(self.price_feed_publisher),
            price_feed_url: other.price_feed_url.or(self.price_feed_url),
            price_feed_pointer: other.price_feed_pointer.or(self.price_feed_pointer),
            price_feed_interval_secs: other.price_feed_interval_secs.or(self.price_feed_interval_secs),
            price_feed_state_file: other.price_feed_state_file.or(self.price_feed_state_file),
        }
    }

    /// Log directory, `./logs` unless configured.
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    /// Log level, `info` unless configured.
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Turns the merged configuration into validated settings. Anything not
    /// configured falls back to the library defaults.
    pub fn into_settings(self) -> Result<Settings, SettingsError> {
        let defaults = Settings::default();
        let settings = Settings {
            primary_account: self.primary_account.unwrap_or_default().trim().to_string(),
            delegating_accounts: clean_list(self.delegating_accounts).unwrap_or(defaults.delegating_accounts),
            update_frequency_secs: self.update_frequency_secs.unwrap_or(defaults.update_frequency_secs),
            rc_base_level: self.rc_base_level.unwrap_or(defaults.rc_base_level),
            rc_pct_lower_target: self.rc_pct_lower_target.unwrap_or(defaults.rc_pct_lower_target),
            rc_pct_upper_target: self.rc_pct_upper_target.unwrap_or(defaults.rc_pct_upper_target),
            rc_pct_alarm_level: self.rc_pct_alarm_level.unwrap_or(defaults.rc_pct_alarm_level),
            reduction_overshoot: self.reduction_overshoot.unwrap_or(defaults.reduction_overshoot),
            minimum_correction: self.minimum_correction.unwrap_or(defaults.minimum_correction),
            testnet: self.testnet.unwrap_or(defaults.testnet),
            testnet_node: self.testnet_node.or(defaults.testnet_node),
            testnet_chain_id: self.testnet_chainid.or(defaults.testnet_chain_id),
            account_nodes: clean_list(self.account_nodes).unwrap_or(defaults.account_nodes),
            rc_nodes: clean_list(self.rc_nodes).unwrap_or(defaults.rc_nodes),
            connect_timeout_secs: self.connect_timeout_secs.unwrap_or(defaults.connect_timeout_secs),
            read_timeout_secs: self.read_timeout_secs.unwrap_or(defaults.read_timeout_secs),
            signer_url: self.signer_url.or(defaults.signer_url),
            signer_token: self.signer_token.or(defaults.signer_token),
            database_url: self.db_connection.or(defaults.database_url),
            db_name: self.db_name.unwrap_or(defaults.db_name),
            roster_refresh_cycles: self.roster_refresh_cycles.unwrap_or(defaults.roster_refresh_cycles),
            price_feed_publisher: self.price_feed_publisher.or(defaults.price_feed_publisher),
            price_feed_url: self.price_feed_url.unwrap_or(defaults.price_feed_url),
            price_feed_pointer: self.price_feed_pointer.unwrap_or(defaults.price_feed_pointer),
            price_feed_interval_secs: self.price_feed_interval_secs.unwrap_or(defaults.price_feed_interval_secs),
            price_feed_state_file: self
                .price_feed_state_file
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or(defaults.price_feed_state_file),
        };
        settings.validate()?;
        Ok(settings)
    }
}

// Comma separated env values leave stray blanks behind.
fn clean_list(list: Option<Vec<String>>) -> Option<Vec<String>> {
    list.map(|items| {
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => Some(file_config),
            Err(e) => {
                log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                None
            }
        },
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Layers the JSON config file under the command line and environment.
pub fn resolve(cli_args: Config) -> Config {
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_rc.conf"));

    let current_config = match read_config_file(&config_file_path) {
        Some(file_config) => Config::default().merge(file_config),
        None => Config::default(),
    };

    // clap already folded environment variables into the CLI values.
    current_config.merge(cli_args)
}

pub fn load_config() -> Config {
    // A .env next to the binary feeds the env = ... attributes below.
    let _ = dotenvy::dotenv();
    resolve(Config::parse())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("server_rc.conf");
        fs::write(
            &path,
            r#"{"primaryAccount": "podping", "rcPctLowerTarget": 30.0, "delegatingAccounts": ["podping.bol"]}"#,
        )
        .expect("write conf");

        let cli = Config {
            config_path: Some(path),
            rc_pct_lower_target: Some(35.0),
            ..Config::default()
        };
        let settings = resolve(cli).into_settings().expect("valid");

        assert_eq!(settings.primary_account, "podping");
        assert_eq!(settings.rc_pct_lower_target, 35.0);
        assert_eq!(settings.delegating_accounts, vec!["podping.bol".to_string()]);
        assert_eq!(settings.rc_pct_upper_target, Settings::default().rc_pct_upper_target);
    }

    #[test]
    fn test_missing_primary_account_is_rejected() {
        let err = Config::default().into_settings().expect_err("no primary account");
        assert_eq!(err, SettingsError::MissingSetting("PRIMARY_ACCOUNT".into()));
    }

    #[test]
    fn test_comma_separated_lists_are_trimmed() {
        let config = Config::try_parse_from([
            "server_rc",
            "--primary-account",
            "podping",
            "--delegating-accounts",
            "podping.bol, ,podping.aaa",
        ])
        .expect("args");
        let settings = config.into_settings().expect("valid");
        assert_eq!(
            settings.delegating_accounts,
            vec!["podping.bol".to_string(), "podping.aaa".to_string()]
        );
    }

    #[test]
    fn test_testnet_requires_node_and_chain_id() {
        let config = Config {
            primary_account: Some("podping".into()),
            testnet: Some(true),
            testnet_node: Some("http://testnet:8090".into()),
            ..Config::default()
        };
        let err = config.into_settings().expect_err("chain id missing");
        assert_eq!(err, SettingsError::MissingSetting("TESTNET_CHAINID".into()));
    }
}
