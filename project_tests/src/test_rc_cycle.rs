use chrono::Utc;
use lib_rcauto::configs::settings::Settings;
use lib_rcauto::connections::{HistoryStore, MemoryHistoryStore};
use lib_rcauto::hive::mock::{dgp_result, rpc_error, rpc_result, trx_result, MockSigner, ScriptedTransport};
use lib_rcauto::hive::{Broadcaster, RpcClient, RpcError, TransportError};
use lib_rcauto::ingestors::RcPollingService;
use lib_rcauto::rc::{
    AccountRoster, AllocationCycleResult, CyclePhase, DirectDelegation, PendingDelegation, RcSink, Status,
};
use serde_json::{json, Value};
use std::sync::Arc;

const BROADCAST: &str = "condenser_api.broadcast_transaction_synchronous";

fn rc_account(name: &str, current: i64, max: i64) -> Value {
    json!({
        "account": name,
        "rc_manabar": {"current_mana": current.to_string(), "last_update_time": Utc::now().timestamp() + 60},
        "max_rc": max.to_string(),
        "delegated_rc": 0,
        "received_delegated_rc": 0
    })
}

/// A: primary, too little RC to cover 300_000. B: second supplier with plenty.
/// T: receiver at 10%.
fn chain() -> Arc<ScriptedTransport> {
    Arc::new(ScriptedTransport::new(|_node, req| match req.method.as_str() {
        "rc_api.find_rc_accounts" => Ok(rpc_result(json!({"rc_accounts": [
            rc_account("A", 200_000, 1_000_000),
            rc_account("B", 5_000_000, 10_000_000),
            rc_account("T", 100_000, 1_000_000)
        ]}))),
        "rc_api.list_rc_direct_delegations" => Ok(rpc_result(json!({"rc_direct_delegations": []}))),
        "condenser_api.get_dynamic_global_properties" => Ok(dgp_result()),
        BROADCAST => Ok(trx_result("e2e-trx")),
        other => Ok(rpc_error(-32601, &format!("unexpected method {other}"))),
    }))
}

fn settings() -> Arc<Settings> {
    Arc::new(Settings {
        primary_account: "A".into(),
        delegating_accounts: vec!["B".into()],
        rc_pct_lower_target: 40.0,
        ..Settings::default()
    })
}

fn broadcaster(client: Arc<RpcClient>, settings: &Settings) -> Arc<Broadcaster> {
    Arc::new(Broadcaster::new(client, Arc::new(MockSigner::default()), settings.chain_id()))
}

#[tokio::test]
async fn test_low_account_is_topped_up_from_first_capable_delegator() {
    let settings = settings();
    let transport = chain();
    let client = Arc::new(RpcClient::new("all", vec!["http://node".into()], transport.clone()).expect("client"));
    let store = Arc::new(MemoryHistoryStore::new());
    let sink = RcSink::new(broadcaster(Arc::clone(&client), &settings), store.clone(), Arc::clone(&settings));
    let mut service = RcPollingService::new(Arc::clone(&settings), Arc::clone(&client), client, sink)
        .with_roster(AccountRoster::new(vec!["A".into(), "B".into()], vec!["T".into()]));

    let summary = service.run_cycle().await.expect("cycle");

    assert_eq!(service.phase(), CyclePhase::Idle);
    let target = service.previous().and_then(|s| s.get("T")).expect("T snapshot");
    assert_eq!(target.real_mana_percent, 10.0);
    assert_eq!(target.status, Status::Low);
    assert_eq!(summary.corrections, 1);
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.report.confirmed.len(), 1);
    assert_eq!(summary.report.confirmed[0].0, "B");

    let broadcasts = transport.requests_for(BROADCAST);
    assert_eq!(broadcasts.len(), 1);
    let op = &broadcasts[0].params[0]["operations"][0];
    assert_eq!(op[0], "custom_json");
    assert_eq!(op[1]["id"], "rc");
    assert_eq!(op[1]["required_posting_auths"], json!(["B"]));
    let payload: Value = op[1]["json"]
        .as_str()
        .and_then(|s| serde_json::from_str(s).ok())
        .expect("payload");
    assert_eq!(payload[0], "delegate_rc");
    assert_eq!(payload[1]["delegatees"], json!(["T"]));
    assert_eq!(payload[1]["max_rc"], 300_000);

    let records = store.find("rc_history_deleg", &json!({"to": "T"})).await.expect("find");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["from"], "B");
    assert_eq!(records[0]["trx_id"], "e2e-trx");
}

fn pending(from: &str, to: &str, amount: i64) -> PendingDelegation {
    PendingDelegation {
        delegation: DirectDelegation {
            from_account: from.into(),
            to_account: to.into(),
            amount,
            is_reduction: false,
        },
        change: amount,
    }
}

#[tokio::test]
async fn test_pending_delegations_are_batched_per_delegator() {
    let settings = settings();
    let transport = chain();
    let client = Arc::new(RpcClient::new("all", vec!["http://node".into()], transport.clone()).expect("client"));
    let sink = RcSink::new(
        broadcaster(client, &settings),
        Arc::new(MemoryHistoryStore::new()),
        Arc::clone(&settings),
    );
    let result = AllocationCycleResult {
        pending: vec![pending("A", "X", 5), pending("A", "Y", 3), pending("B", "Z", 2)],
        ..AllocationCycleResult::default()
    };

    let report = sink.submit(&result).await;

    let broadcasts = transport.requests_for(BROADCAST);
    assert_eq!(broadcasts.len(), 2);
    let sizes: Vec<usize> = broadcasts
        .iter()
        .map(|b| b.params[0]["operations"].as_array().map_or(0, Vec::len))
        .collect();
    assert_eq!(sizes, vec![2, 1]);
    assert_eq!(broadcasts[0].params[0]["operations"][0][1]["required_posting_auths"], json!(["A"]));
    assert_eq!(broadcasts[1].params[0]["operations"][0][1]["required_posting_auths"], json!(["B"]));
    assert_eq!(report.confirmed.len(), 2);
}

#[tokio::test]
async fn test_failover_settles_on_the_working_node() {
    let transport = Arc::new(ScriptedTransport::new(|node, _req| {
        if node == "http://n3" {
            Ok(dgp_result())
        } else {
            Err(TransportError::Timeout)
        }
    }));
    let nodes = vec!["http://n1".to_string(), "http://n2".to_string(), "http://n3".to_string()];
    let client = RpcClient::new("accounts", nodes.clone(), transport.clone()).expect("client");

    client
        .call("condenser_api.get_dynamic_global_properties", json!([]))
        .await
        .expect("third node answers");
    assert_eq!(client.current_node(), "http://n3");

    let dead = Arc::new(ScriptedTransport::new(|_n, _r| Err(TransportError::Timeout)));
    let client = RpcClient::new("accounts", nodes, dead.clone()).expect("client");
    let err = client
        .call("condenser_api.get_dynamic_global_properties", json!([]))
        .await
        .expect_err("all nodes down");
    assert!(matches!(err, RpcError::AllNodesExhausted { attempts: 3, .. }));
    assert_eq!(dead.call_count(), 3);
}
