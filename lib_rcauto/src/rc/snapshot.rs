//! # RC Snapshots
//!
//! Turns a raw `find_rc_accounts` record into a decision-ready
//! [`AccountRcState`]: regenerated mana, percentage, hourly trend, status and
//! alarm flag. Building a snapshot is a pure function of the raw record, the
//! previous snapshot of the same account, the settings and the clock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::configs::settings::Settings;
use crate::hive::api::{self, RawRcAccount};
use crate::hive::rpc_client::{RpcClient, RpcError};
use crate::rc::ledger::DelegationLedger;
use crate::rc::roster::AccountRoster;
use crate::utils::misc::{from_unix_seconds, group_thousands, mill};

/// Seconds for a manabar to regenerate from empty to full (5 days).
pub const REGEN_PERIOD_SECONDS: i64 = 432_000;

/// Whether an account supplies RC or consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Member of the supply pool.
    Delegating,
    /// Monitored consumer.
    Target,
}

/// Threshold classification of one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Inside the target band.
    #[serde(rename = "OK")]
    Ok,
    /// Below the lower target.
    #[serde(rename = "LOW")]
    Low,
    /// A receiver holding more than the upper target.
    #[serde(rename = "HIGH")]
    High,
}

/// A single account-to-account RC grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectDelegation {
    /// Delegator.
    pub from_account: String,
    /// Receiver.
    pub to_account: String,
    /// RC units granted.
    pub amount: i64,
    /// Marks a decrease; informational only.
    #[serde(default)]
    pub is_reduction: bool,
}

/// One account's RC state at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRcState {
    /// When the snapshot was built.
    pub timestamp: DateTime<Utc>,
    /// Account name.
    pub account: String,
    /// Supplier or consumer.
    pub role: Role,
    /// Stored mana as of `last_update_time`.
    pub raw_mana: i64,
    /// Maximum mana.
    pub max_mana: i64,
    /// Time of the last manabar update.
    pub last_update_time: DateTime<Utc>,
    /// RC delegated away.
    pub delegated_out: i64,
    /// RC received.
    pub delegated_in: i64,
    /// Mana after regeneration, capped at `max_mana`.
    pub real_mana: i64,
    /// `real_mana` as a percentage of `max_mana`, within 0..=100.
    pub real_mana_percent: f64,
    /// Percentage of the previous cycle, when there was one.
    pub previous_percent: Option<f64>,
    /// Change per hour extrapolated from the last cycle.
    pub delta_percent: f64,
    /// Threshold classification.
    pub status: Status,
    /// Projected percentage in one hour is below the alarm level.
    pub alarm: bool,
    /// What this account could delegate without eating into its reserve.
    pub deleg_available: i64,
    /// Outbound grants; only filled for delegating accounts.
    #[serde(default)]
    pub outbound_delegations: Vec<DirectDelegation>,
}

/// Builds a snapshot from a raw record.
///
/// `previous` is last cycle's snapshot of the same account; without one the
/// trend is zero. `now` before `last_update_time` counts as zero elapsed time.
pub fn build_snapshot(
    raw: &RawRcAccount,
    role: Role,
    previous: Option<&AccountRcState>,
    settings: &Settings,
    now: DateTime<Utc>,
) -> AccountRcState {
    let max_mana = raw.max_rc.max(0);
    let last_update_time = from_unix_seconds(raw.rc_manabar.last_update_time);
    let elapsed = (now - last_update_time).num_seconds().max(0);

    let regenerated = i128::from(elapsed) * i128::from(max_mana) / i128::from(REGEN_PERIOD_SECONDS);
    let real_mana = (i128::from(raw.rc_manabar.current_mana) + regenerated).clamp(0, i128::from(max_mana)) as i64;

    let real_mana_percent = if max_mana > 0 {
        (real_mana as f64 * 100.0 / max_mana as f64).clamp(0.0, 100.0)
    } else {
        0.0
    };

    let status = if role != Role::Delegating
        && raw.received_delegated_rc != 0
        && real_mana_percent > settings.rc_pct_upper_target
    {
        Status::High
    } else if real_mana_percent < settings.rc_pct_lower_target {
        Status::Low
    } else {
        Status::Ok
    };

    let previous_percent = previous.map(|p| p.real_mana_percent);
    let delta_percent = previous_percent
        .map(|prev| (real_mana_percent - prev) * 3600.0 / settings.update_frequency_secs as f64)
        .unwrap_or(0.0);

    AccountRcState {
        timestamp: now,
        account: raw.account.clone(),
        role,
        raw_mana: raw.rc_manabar.current_mana,
        max_mana,
        last_update_time,
        delegated_out: raw.delegated_rc,
        delegated_in: raw.received_delegated_rc,
        real_mana,
        real_mana_percent,
        previous_percent,
        delta_percent,
        status,
        alarm: real_mana_percent + delta_percent < settings.rc_pct_alarm_level,
        deleg_available: real_mana - (settings.rc_base_level + raw.received_delegated_rc),
        outbound_delegations: Vec::new(),
    }
}

impl AccountRcState {
    /// Red for LOW, then green/yellow/blue for rising/falling/flat.
    pub fn delta_icon(&self) -> &'static str {
        if self.status == Status::Low {
            "🔴"
        } else if self.delta_percent > 0.0 {
            "✅"
        } else if self.delta_percent < 0.0 {
            "🟡"
        } else {
            "🟦"
        }
    }

    /// One row of the RC table.
    pub fn log_line(&self) -> String {
        let alarm = if self.alarm { " <----- Alarm" } else { "" };
        format!(
            "{:<16} | {} | {:>6.1} %| {:>7.3} %| {:>12} M |{:>12} M |{:>12} M |{}",
            self.account,
            self.delta_icon(),
            self.real_mana_percent,
            self.delta_percent,
            group_thousands(mill(self.real_mana)),
            group_thousands(mill(self.delegated_out)),
            group_thousands(mill(self.delegated_in)),
            alarm
        )
    }

    /// Header matching [`AccountRcState::log_line`].
    pub fn log_line_header() -> String {
        format!(
            "{:<16} |    | {:>6} %| {:>7} %| {:>12} M |{:>12} M |{:>12} M |",
            "Account Name", "RC Now", "RC Dt", "Current RC", "Out Deleg", "Recv Deleg"
        )
    }
}

/// All snapshots of one cycle, in roster order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotSet {
    taken_at: Option<DateTime<Utc>>,
    snapshots: Vec<AccountRcState>,
    index: HashMap<String, usize>,
}

impl SnapshotSet {
    /// Builds a set; later duplicates of an account replace earlier ones.
    pub fn new(taken_at: DateTime<Utc>, snapshots: Vec<AccountRcState>) -> Self {
        let mut set = Self {
            taken_at: Some(taken_at),
            snapshots: Vec::with_capacity(snapshots.len()),
            index: HashMap::new(),
        };
        for snapshot in snapshots {
            match set.index.get(&snapshot.account) {
                Some(&i) => set.snapshots[i] = snapshot,
                None => {
                    set.index.insert(snapshot.account.clone(), set.snapshots.len());
                    set.snapshots.push(snapshot);
                }
            }
        }
        set
    }

    /// When the set was collected.
    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        self.taken_at
    }

    /// Snapshot of `account`.
    pub fn get(&self, account: &str) -> Option<&AccountRcState> {
        self.index.get(account).map(|&i| &self.snapshots[i])
    }

    /// All snapshots in roster order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &AccountRcState> {
        self.snapshots.iter()
    }

    /// Supply pool members in roster order.
    pub fn delegating(&self) -> impl DoubleEndedIterator<Item = &AccountRcState> {
        self.snapshots.iter().filter(|s| s.role == Role::Delegating)
    }

    /// Monitored consumers in roster order.
    pub fn receiving(&self) -> impl DoubleEndedIterator<Item = &AccountRcState> {
        self.snapshots.iter().filter(|s| s.role == Role::Target)
    }

    /// Number of snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// True when nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Copies the ledger's outbound grants onto the delegating snapshots.
    pub fn attach_outbound(&mut self, ledger: &DelegationLedger) {
        for snapshot in self.snapshots.iter_mut().filter(|s| s.role == Role::Delegating) {
            snapshot.outbound_delegations = ledger.list_outbound(&snapshot.account).to_vec();
        }
    }

    /// Logs the RC table at info level.
    pub fn log_table(&self) {
        log::info!("{}", AccountRcState::log_line_header());
        for snapshot in &self.snapshots {
            log::info!("{}", snapshot.log_line());
        }
    }

    /// History documents, one per account.
    pub fn to_documents(&self) -> Vec<Value> {
        self.snapshots
            .iter()
            .filter_map(|s| match serde_json::to_value(s) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    log::error!("Cannot serialize snapshot of {}: {}", s.account, e);
                    None
                }
            })
            .collect()
    }
}

/// Reads every roster account in one `find_rc_accounts` call and builds the
/// cycle's snapshot set. Accounts the node does not return are logged and
/// left out.
///
/// # Errors
/// Propagates pool exhaustion; the caller abandons the cycle.
pub async fn collect_snapshots(
    rc_client: &RpcClient,
    roster: &AccountRoster,
    previous: Option<&SnapshotSet>,
    settings: &Settings,
    now: DateTime<Utc>,
) -> Result<SnapshotSet, RpcError> {
    let accounts = roster.all();
    let raw = api::find_rc_accounts(rc_client, &accounts).await?;
    let by_name: HashMap<&str, &RawRcAccount> = raw.iter().map(|r| (r.account.as_str(), r)).collect();

    let mut snapshots = Vec::with_capacity(accounts.len());
    for account in &accounts {
        match by_name.get(account.as_str()) {
            Some(record) => snapshots.push(build_snapshot(
                record,
                roster.role_of(account),
                previous.and_then(|p| p.get(account)),
                settings,
                now,
            )),
            None => log::warn!("{}: no RC record returned by {}", account, rc_client.current_node()),
        }
    }
    Ok(SnapshotSet::new(now, snapshots))
}
