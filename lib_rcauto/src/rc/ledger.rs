//! # Delegation Ledger
//!
//! Per-cycle cache of the chain's outbound direct delegations, plus the
//! changes queued in the current cycle that have not been broadcast yet. The
//! chain-reported grants are the source of truth; local history is never
//! consulted here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::hive::api;
use crate::hive::operations::DelegateRcInstruction;
use crate::hive::rpc_client::{RpcClient, RpcError};
use crate::rc::snapshot::DirectDelegation;

/// A delegation change waiting for broadcast.
///
/// `delegation.amount` is the new absolute grant; `change` is the signed
/// difference to the grant in place when it was queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelegation {
    /// The grant as it will be after broadcast.
    pub delegation: DirectDelegation,
    /// Signed difference to the existing grant.
    pub change: i64,
}

impl PendingDelegation {
    /// The on-chain instruction for this change.
    pub fn instruction(&self) -> DelegateRcInstruction {
        DelegateRcInstruction {
            from: self.delegation.from_account.clone(),
            to: self.delegation.to_account.clone(),
            max_rc: self.delegation.amount,
        }
    }
}

/// Outbound grants per delegator and this cycle's pending changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelegationLedger {
    outbound: HashMap<String, Vec<DirectDelegation>>,
    pending: Vec<PendingDelegation>,
}

impl DelegationLedger {
    /// Loads the outbound grants of every delegator from the chain.
    ///
    /// # Errors
    /// Propagates pool exhaustion for any delegator.
    pub async fn load(rc_client: &RpcClient, delegators: &[String]) -> Result<Self, RpcError> {
        let mut outbound = HashMap::with_capacity(delegators.len());
        for delegator in delegators {
            let grants = api::list_rc_direct_delegations(rc_client, delegator)
                .await?
                .into_iter()
                .map(|d| DirectDelegation {
                    from_account: d.from,
                    to_account: d.to,
                    amount: d.delegated_rc,
                    is_reduction: false,
                })
                .collect::<Vec<_>>();
            log::debug!("{}: {} outbound delegations", delegator, grants.len());
            outbound.insert(delegator.clone(), grants);
        }
        Ok(Self {
            outbound,
            pending: Vec::new(),
        })
    }

    /// Builds a ledger from known grants.
    pub fn from_grants(grants: Vec<DirectDelegation>) -> Self {
        let mut outbound: HashMap<String, Vec<DirectDelegation>> = HashMap::new();
        for grant in grants {
            outbound.entry(grant.from_account.clone()).or_default().push(grant);
        }
        for list in outbound.values_mut() {
            list.sort_by(|a, b| a.to_account.cmp(&b.to_account));
        }
        Self {
            outbound,
            pending: Vec::new(),
        }
    }

    /// Outbound grants of `account`, ordered by recipient.
    pub fn list_outbound(&self, account: &str) -> &[DirectDelegation] {
        self.outbound.get(account).map(Vec::as_slice).unwrap_or_default()
    }

    /// The grant from `from` to `to` currently on chain, zero if none.
    pub fn existing(&self, from: &str, to: &str) -> i64 {
        self.list_outbound(from)
            .iter()
            .find(|d| d.to_account == to)
            .map_or(0, |d| d.amount)
    }

    /// RC of `from` already committed by increases queued this cycle.
    pub fn pending_total(&self, from: &str) -> i64 {
        self.pending
            .iter()
            .filter(|p| p.delegation.from_account == from && p.change > 0)
            .map(|p| p.change)
            .sum()
    }

    /// Queues a change.
    pub fn queue(&mut self, pending: PendingDelegation) {
        self.pending.push(pending);
    }

    /// Changes queued this cycle, in queue order.
    pub fn pending(&self) -> &[PendingDelegation] {
        &self.pending
    }

    /// Forgets the queued changes.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }
}
