//! # RC Polling Service
//!
//! The self-scheduling main loop: collect RC snapshots for the roster, run the
//! allocation engine, hand the result to the sink, sleep, repeat.
//!
//! A cycle either completes or is abandoned as a whole. When collection fails
//! nothing is decided or broadcast and the last completed snapshot set stays
//! the baseline for the next cycle's trend.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::configs::settings::Settings;
use crate::hive::rpc_client::{RpcClient, RpcError};
use crate::rc::allocation::{AllocationEngine, CyclePhase};
use crate::rc::ledger::DelegationLedger;
use crate::rc::roster::AccountRoster;
use crate::rc::sink::{RcSink, SinkReport};
use crate::rc::snapshot::{collect_snapshots, SnapshotSet};

/// A cycle that could not complete.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Reading chain state failed; the cycle was abandoned.
    #[error("cycle aborted while {stage}: {source}")]
    CycleAbort {
        /// What the cycle was doing.
        stage: &'static str,
        /// The RPC failure.
        source: RpcError,
    },
}

fn abort(stage: &'static str) -> impl FnOnce(RpcError) -> CycleError {
    move |source| CycleError::CycleAbort { stage, source }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSummary {
    /// Accounts snapshotted.
    pub accounts: usize,
    /// Corrections decided.
    pub corrections: usize,
    /// Delegation changes queued.
    pub pending: usize,
    /// Corrections that could not be sourced.
    pub skipped: usize,
    /// Broadcast outcome per delegator.
    pub report: SinkReport,
}

/// Long-running RC monitor and delegator.
pub struct RcPollingService {
    settings: Arc<Settings>,
    account_client: Arc<RpcClient>,
    rc_client: Arc<RpcClient>,
    engine: AllocationEngine,
    sink: RcSink,
    roster: Option<AccountRoster>,
    previous: Option<SnapshotSet>,
    cycles: u64,
}

impl RcPollingService {
    /// Wires the service. The roster is discovered on the first cycle.
    pub fn new(settings: Arc<Settings>, account_client: Arc<RpcClient>, rc_client: Arc<RpcClient>, sink: RcSink) -> Self {
        Self {
            engine: AllocationEngine::new(Arc::clone(&settings)),
            settings,
            account_client,
            rc_client,
            sink,
            roster: None,
            previous: None,
            cycles: 0,
        }
    }

    /// Starts from a known roster instead of discovering one.
    pub fn with_roster(mut self, roster: AccountRoster) -> Self {
        self.roster = Some(roster);
        self
    }

    /// Where the current or last cycle is.
    pub fn phase(&self) -> CyclePhase {
        self.engine.phase()
    }

    /// Baseline for the next cycle's trend.
    pub fn previous(&self) -> Option<&SnapshotSet> {
        self.previous.as_ref()
    }

    /// The roster in use.
    pub fn roster(&self) -> Option<&AccountRoster> {
        self.roster.as_ref()
    }

    /// Polls until a shutdown signal arrives. A running cycle is finished
    /// before the signal is noticed.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        log::info!(
            "RC polling service started for {} (every {} s)",
            self.settings.primary_account,
            self.settings.update_frequency_secs
        );
        let delay = Duration::from_secs(self.settings.update_frequency_secs);

        loop {
            match self.run_cycle().await {
                Ok(summary) => log::info!(
                    "Cycle {} done: {} accounts, {} corrections, {} queued, {} skipped, {} confirmed, {} failed",
                    self.cycles,
                    summary.accounts,
                    summary.corrections,
                    summary.pending,
                    summary.skipped,
                    summary.report.confirmed.len(),
                    summary.report.failed.len()
                ),
                Err(e) => log::error!("{e}; retrying in {} s", delay.as_secs()),
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("RC polling service received shutdown signal.");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Runs one full cycle.
    ///
    /// # Errors
    /// `CycleError::CycleAbort` when chain state could not be read.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary, CycleError> {
        let cycle = self.cycles;
        self.cycles += 1;

        self.refresh_roster(cycle).await?;
        let Some(roster) = self.roster.as_ref() else {
            return Ok(CycleSummary::default());
        };

        self.engine.begin_collecting();
        let collected = collect_snapshots(
            &self.rc_client,
            roster,
            self.previous.as_ref(),
            &self.settings,
            Utc::now(),
        )
        .await;
        let mut snapshots = match collected {
            Ok(snapshots) => snapshots,
            Err(e) => {
                self.engine.reset();
                return Err(abort("collecting snapshots")(e));
            }
        };
        let mut ledger = match DelegationLedger::load(&self.rc_client, roster.delegating()).await {
            Ok(ledger) => ledger,
            Err(e) => {
                self.engine.reset();
                return Err(abort("loading delegations")(e));
            }
        };
        snapshots.attach_outbound(&ledger);
        snapshots.log_table();

        let result = self.engine.allocate(&snapshots, &mut ledger);

        // Not awaited: history must not hold up the next cycle.
        drop(self.sink.persist_snapshots(&snapshots));

        let report = if result.is_empty() {
            SinkReport::default()
        } else {
            self.sink.submit(&result).await
        };

        let summary = CycleSummary {
            accounts: snapshots.len(),
            corrections: result.corrections.len(),
            pending: result.pending.len(),
            skipped: result.skipped.len(),
            report,
        };
        self.previous = Some(snapshots);
        self.engine.reset();
        Ok(summary)
    }

    async fn refresh_roster(&mut self, cycle: u64) -> Result<(), CycleError> {
        let due = self.roster.is_none() || (cycle > 0 && cycle % self.settings.roster_refresh_cycles == 0);
        if !due {
            return Ok(());
        }
        match AccountRoster::discover(&self.account_client, &self.settings).await {
            Ok(roster) => {
                self.roster = Some(roster);
                Ok(())
            }
            Err(e) if self.roster.is_some() => {
                log::warn!("Roster refresh failed, keeping the current roster: {e}");
                Ok(())
            }
            Err(e) => Err(abort("discovering the roster")(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::history_store::MemoryHistoryStore;
    use crate::hive::broadcaster::Broadcaster;
    use crate::hive::mock::{dgp_result, rpc_error, rpc_result, trx_result, MockSigner, ScriptedTransport};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> Arc<Settings> {
        Arc::new(Settings {
            primary_account: "podping".into(),
            update_frequency_secs: 600,
            ..Settings::default()
        })
    }

    fn rc_account(name: &str, current: i64, max: i64) -> Value {
        json!({
            "account": name,
            "rc_manabar": {"current_mana": current, "last_update_time": Utc::now().timestamp() + 60},
            "max_rc": max,
            "delegated_rc": 0,
            "received_delegated_rc": 0
        })
    }

    /// Scripted chain: one delegator, one low receiver; `find_rc_accounts`
    /// fails on the calls listed in `failing`.
    fn chain(failing: &'static [usize]) -> Arc<ScriptedTransport> {
        let finds = Arc::new(AtomicUsize::new(0));
        Arc::new(ScriptedTransport::new(move |_n, req| match req.method.as_str() {
            "condenser_api.get_accounts" => Ok(rpc_result(json!([]))),
            "condenser_api.get_following" => Ok(rpc_result(json!([
                {"follower": "podping", "following": "podping.aaa", "what": ["blog"]}
            ]))),
            "rc_api.find_rc_accounts" => {
                let n = finds.fetch_add(1, Ordering::SeqCst);
                if failing.contains(&n) {
                    Ok(rpc_error(-32000, "node overloaded"))
                } else {
                    Ok(rpc_result(json!({"rc_accounts": [
                        rc_account("podping", 9_000_000, 10_000_000),
                        rc_account("podping.aaa", 100_000, 1_000_000)
                    ]})))
                }
            }
            "rc_api.list_rc_direct_delegations" => Ok(rpc_result(json!({"rc_direct_delegations": []}))),
            "condenser_api.get_dynamic_global_properties" => Ok(dgp_result()),
            _ => Ok(trx_result("cycle-trx")),
        }))
    }

    fn service(transport: Arc<ScriptedTransport>) -> RcPollingService {
        let settings = settings();
        let client = Arc::new(RpcClient::new("both", vec!["http://n1".into()], transport).expect("client"));
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&client),
            Arc::new(MockSigner::default()),
            settings.chain_id(),
        ));
        let sink = RcSink::new(broadcaster, Arc::new(MemoryHistoryStore::new()), Arc::clone(&settings));
        RcPollingService::new(settings, Arc::clone(&client), client, sink)
    }

    #[tokio::test]
    async fn test_cycle_discovers_roster_and_delegates() {
        let transport = chain(&[]);
        let mut service = service(transport.clone());

        let summary = service.run_cycle().await.expect("cycle");

        assert_eq!(summary.accounts, 2);
        assert_eq!(summary.corrections, 1);
        assert_eq!(summary.report.confirmed.len(), 1);
        assert_eq!(service.phase(), CyclePhase::Idle);
        assert_eq!(
            service.roster().map(|r| r.receiving().to_vec()),
            Some(vec!["podping.aaa".to_string()])
        );

        let broadcast = transport.requests_for("condenser_api.broadcast_transaction_synchronous");
        assert_eq!(broadcast.len(), 1);
        let payload: Value = broadcast[0].params[0]["operations"][0][1]["json"]
            .as_str()
            .and_then(|s| serde_json::from_str(s).ok())
            .expect("delegate_rc payload");
        assert_eq!(payload[1]["max_rc"], 300_000);
        assert_eq!(payload[1]["from"], "podping");
    }

    #[tokio::test]
    async fn test_aborted_cycle_keeps_previous_baseline() {
        let mut service = service(chain(&[1]));

        service.run_cycle().await.expect("first cycle");
        let baseline = service.previous().and_then(SnapshotSet::taken_at);
        assert!(baseline.is_some());

        let err = service.run_cycle().await.expect_err("second cycle aborts");
        assert!(matches!(err, CycleError::CycleAbort { stage: "collecting snapshots", .. }));
        assert_eq!(service.previous().and_then(SnapshotSet::taken_at), baseline);
        assert_eq!(service.phase(), CyclePhase::Idle);

        service.run_cycle().await.expect("third cycle");
        let third = service.previous().and_then(|p| p.get("podping.aaa")).expect("snapshot");
        assert!(third.previous_percent.is_some());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(service(chain(&[])).run(rx));
        tx.send(()).expect("receiver alive");
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("service stopped")
            .expect("no panic");
    }
}
