//! # Allocation Engine
//!
//! Decides, for one cycle, which receivers get more RC, which give some back,
//! and which delegator handles each change.
//!
//! ```text
//! Collecting -> Deciding -> Sourcing -> Queued -> Done
//! ```
//!
//! Additions walk the delegators in roster order and take the first that can
//! afford the ask. Reductions walk them in reverse and take the first that
//! actually delegates to the receiver. The asymmetry decides which delegator
//! absorbs load; it is pinned by tests below.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::configs::settings::Settings;
use crate::rc::ledger::{DelegationLedger, PendingDelegation};
use crate::rc::snapshot::{DirectDelegation, SnapshotSet, Status};

/// Position of the polling cycle in the allocation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CyclePhase {
    /// Between cycles.
    Idle,
    /// Reading RC state from the chain.
    Collecting,
    /// Computing corrections.
    Deciding,
    /// Picking delegators.
    Sourcing,
    /// Result assembled.
    Queued,
    /// Handed to the sink.
    Done,
}

/// Why a correction was not turned into a delegation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum AllocationError {
    /// No delegator has enough RC for the addition.
    #[error("no delegator can supply {amount} RC to {account}")]
    NoCapacityAvailable {
        /// Receiver.
        account: String,
        /// Requested addition.
        amount: i64,
    },
    /// No delegator currently delegates to the receiver.
    #[error("nothing delegated to {account}; cannot reduce by {amount} RC")]
    NothingToReduce {
        /// Receiver.
        account: String,
        /// Requested (negative) change.
        amount: i64,
    },
}

/// A signed change of inbound RC for one receiver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    /// Receiver.
    pub account: String,
    /// Positive to add, negative to remove.
    pub amount: i64,
    /// Status that triggered it.
    pub status: Status,
}

/// Output of one engine pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllocationCycleResult {
    /// Corrections in processing order.
    pub corrections: Vec<Correction>,
    /// Changes to broadcast, at most one per receiver.
    pub pending: Vec<PendingDelegation>,
    /// Corrections that could not be sourced.
    pub skipped: Vec<AllocationError>,
}

impl AllocationCycleResult {
    /// True when nothing needs broadcasting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending changes grouped by delegator, groups in order of first
    /// appearance, changes in queue order within a group.
    pub fn by_delegator(&self) -> Vec<(String, Vec<&PendingDelegation>)> {
        let mut groups: Vec<(String, Vec<&PendingDelegation>)> = Vec::new();
        for p in &self.pending {
            let from = &p.delegation.from_account;
            match groups.iter_mut().find(|(g, _)| g == from) {
                Some((_, items)) => items.push(p),
                None => groups.push((from.clone(), vec![p])),
            }
        }
        groups
    }
}

/// The decision algorithm, configured once from the settings.
#[derive(Debug)]
pub struct AllocationEngine {
    settings: Arc<Settings>,
    phase: CyclePhase,
}

impl AllocationEngine {
    /// Creates an idle engine.
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            phase: CyclePhase::Idle,
        }
    }

    /// Where the last pass stopped.
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Runs Deciding, Sourcing and Queued over a complete snapshot set.
    ///
    /// The ledger's pending list is reset first and holds this pass's changes
    /// afterwards, so repeated passes over the same inputs give the same result.
    pub fn allocate(&mut self, snapshots: &SnapshotSet, ledger: &mut DelegationLedger) -> AllocationCycleResult {
        ledger.clear_pending();

        self.phase = CyclePhase::Deciding;
        let corrections = self.decide(snapshots);

        self.phase = CyclePhase::Sourcing;
        let mut skipped = Vec::new();
        for correction in &corrections {
            let sourced = if correction.amount > 0 {
                source_addition(snapshots, ledger, correction)
            } else {
                source_reduction(snapshots, ledger, correction)
            };
            match sourced {
                Ok(pending) => {
                    log::info!(
                        "{} -> {}: {} RC ({:+})",
                        pending.delegation.from_account,
                        pending.delegation.to_account,
                        pending.delegation.amount,
                        pending.change
                    );
                    ledger.queue(pending);
                }
                Err(e) => {
                    log::warn!("{e}");
                    skipped.push(e);
                }
            }
        }

        self.phase = CyclePhase::Queued;
        let result = AllocationCycleResult {
            corrections,
            pending: ledger.pending().to_vec(),
            skipped,
        };
        self.phase = CyclePhase::Done;
        result
    }

    /// Marks the start of snapshot collection.
    pub fn begin_collecting(&mut self) {
        self.phase = CyclePhase::Collecting;
    }

    /// Back to idle after the sink ran or the cycle was abandoned.
    pub fn reset(&mut self) {
        self.phase = CyclePhase::Idle;
    }

    /// Signed corrections for every out-of-band receiver, largest first.
    pub fn decide(&self, snapshots: &SnapshotSet) -> Vec<Correction> {
        let s = &self.settings;
        let mut corrections: Vec<Correction> = snapshots
            .receiving()
            .filter_map(|snap| {
                let amount = match snap.status {
                    Status::Ok => return None,
                    Status::Low => {
                        let gap = s.rc_pct_lower_target - snap.real_mana_percent;
                        (snap.max_mana as f64 * gap / 100.0).round() as i64
                    }
                    Status::High if snap.delta_percent > 0.0 => {
                        let gap = snap.real_mana_percent - s.rc_pct_upper_target;
                        (-(snap.max_mana as f64 * gap / 100.0) * s.reduction_overshoot).round() as i64
                    }
                    Status::High => {
                        log::debug!("{} is HIGH but not rising; no reduction", snap.account);
                        return None;
                    }
                };
                if amount == 0 || amount.abs() < s.minimum_correction {
                    return None;
                }
                Some(Correction {
                    account: snap.account.clone(),
                    amount,
                    status: snap.status,
                })
            })
            .collect();
        corrections.sort_by(|a, b| b.amount.cmp(&a.amount));
        corrections
    }
}

fn source_addition(
    snapshots: &SnapshotSet,
    ledger: &DelegationLedger,
    correction: &Correction,
) -> Result<PendingDelegation, AllocationError> {
    let target = correction.account.as_str();
    for delegator in snapshots.delegating().filter(|d| d.account != target) {
        let existing = ledger.existing(&delegator.account, target);
        let needed = correction.amount - (existing - ledger.pending_total(&delegator.account));
        if delegator.real_mana > needed {
            return Ok(PendingDelegation {
                delegation: DirectDelegation {
                    from_account: delegator.account.clone(),
                    to_account: target.to_string(),
                    amount: existing + correction.amount,
                    is_reduction: false,
                },
                change: correction.amount,
            });
        }
        log::debug!(
            "{} cannot supply {} RC to {} ({} available)",
            delegator.account,
            needed,
            target,
            delegator.real_mana
        );
    }
    Err(AllocationError::NoCapacityAvailable {
        account: target.to_string(),
        amount: correction.amount,
    })
}

fn source_reduction(
    snapshots: &SnapshotSet,
    ledger: &DelegationLedger,
    correction: &Correction,
) -> Result<PendingDelegation, AllocationError> {
    let target = correction.account.as_str();
    for delegator in snapshots.delegating().rev() {
        let existing = ledger.existing(&delegator.account, target);
        if existing > 0 {
            let new_total = (existing + correction.amount).max(0);
            return Ok(PendingDelegation {
                delegation: DirectDelegation {
                    from_account: delegator.account.clone(),
                    to_account: target.to_string(),
                    amount: new_total,
                    is_reduction: true,
                },
                change: new_total - existing,
            });
        }
    }
    Err(AllocationError::NothingToReduce {
        account: target.to_string(),
        amount: correction.amount,
    })
}
