//! # Broadcast & Persistence Sink
//!
//! One transaction per delegator, holding one `delegate_rc` custom_json per
//! receiver. A delegator's records are persisted only after its transaction
//! was accepted; a failed delegator does not stop the others. Snapshot history
//! is written in a detached task.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::configs::settings::Settings;
use crate::connections::history_store::HistoryStore;
use crate::hive::broadcaster::{BroadcastError, BroadcastOutcome, Broadcaster, TrxResult};
use crate::hive::operations::Operation;
use crate::rc::allocation::AllocationCycleResult;
use crate::rc::ledger::PendingDelegation;
use crate::rc::snapshot::SnapshotSet;

/// What happened to each delegator group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkReport {
    /// Delegators whose transaction was included, with the block reference.
    pub confirmed: Vec<(String, TrxResult)>,
    /// Delegators whose grants were already in place.
    pub unchanged: Vec<String>,
    /// Delegators whose broadcast failed, with the error text.
    pub failed: Vec<(String, String)>,
}

/// Submits allocation results and records history.
pub struct RcSink {
    broadcaster: Arc<Broadcaster>,
    store: Arc<dyn HistoryStore>,
    settings: Arc<Settings>,
}

impl RcSink {
    /// Wires the sink.
    pub fn new(broadcaster: Arc<Broadcaster>, store: Arc<dyn HistoryStore>, settings: Arc<Settings>) -> Self {
        Self {
            broadcaster,
            store,
            settings,
        }
    }

    /// Broadcasts every delegator group and persists confirmed records.
    pub async fn submit(&self, result: &AllocationCycleResult) -> SinkReport {
        let mut report = SinkReport::default();

        for (delegator, group) in result.by_delegator() {
            let operations: Vec<Operation> = group.iter().map(|p| p.instruction().to_operation()).collect();
            log::info!("{}: broadcasting {} delegation(s)", delegator, operations.len());

            match self.broadcaster.broadcast(operations).await {
                Ok(BroadcastOutcome::NoOp(message)) if group.len() > 1 => {
                    // One unchanged grant rejects the whole transaction.
                    log::warn!(
                        "{delegator}: batch rejected as unchanged ({message}); resending one by one: {}",
                        describe(&group)
                    );
                    for pending in &group {
                        let outcome = self.broadcaster.broadcast(vec![pending.instruction().to_operation()]).await;
                        self.record(&delegator, &[*pending], outcome, &mut report).await;
                    }
                }
                outcome => self.record(&delegator, &group, outcome, &mut report).await,
            }
        }

        report
    }

    async fn record(
        &self,
        delegator: &str,
        group: &[&PendingDelegation],
        outcome: Result<BroadcastOutcome, BroadcastError>,
        report: &mut SinkReport,
    ) {
        match outcome {
            Ok(BroadcastOutcome::Confirmed(trx)) => {
                self.persist_delegations(group, &trx).await;
                report.confirmed.push((delegator.to_string(), trx));
            }
            Ok(BroadcastOutcome::NoOp(message)) => {
                log::info!("{delegator}: {message} ({})", describe(group));
                if report.unchanged.last().map(String::as_str) != Some(delegator) {
                    report.unchanged.push(delegator.to_string());
                }
            }
            Err(e) => {
                log::error!("{delegator}: delegation broadcast failed ({}): {e}", describe(group));
                report.failed.push((delegator.to_string(), e.to_string()));
            }
        }
    }

    async fn persist_delegations(&self, group: &[&PendingDelegation], trx: &TrxResult) {
        let docs: Vec<Value> = group.iter().map(|p| delegation_record(p, trx)).collect();
        let collection = self.settings.delegation_collection();
        if let Err(e) = self.store.insert_many(&collection, docs).await {
            log::error!("Could not store delegation records of trx {}: {}", trx.trx_id, e);
        }
    }

    /// Writes the cycle's snapshots without waiting for the store.
    pub fn persist_snapshots(&self, snapshots: &SnapshotSet) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let collection = self.settings.history_collection();
        let docs = snapshots.to_documents();
        tokio::spawn(async move {
            let count = docs.len();
            match store.insert_many(&collection, docs).await {
                Ok(()) => log::debug!("Stored {count} RC snapshots in {collection}"),
                Err(e) => log::error!("Could not store RC snapshots: {e}"),
            }
        })
    }
}

fn describe(group: &[&PendingDelegation]) -> String {
    group
        .iter()
        .map(|p| format!("{}={}", p.delegation.to_account, p.delegation.amount))
        .collect::<Vec<_>>()
        .join(", ")
}

/// History record of one confirmed delegation change.
pub fn delegation_record(pending: &PendingDelegation, trx: &TrxResult) -> Value {
    json!({
        "timestamp": Utc::now(),
        "from": pending.delegation.from_account,
        "to": pending.delegation.to_account,
        "delegated_rc": pending.delegation.amount,
        "change": pending.change,
        "is_reduction": pending.delegation.is_reduction,
        "trx_id": trx.trx_id,
        "block_num": trx.block_num,
    })
}
