//! One collection pass: discover the roster, read RC for every account and
//! print the table. Nothing is delegated or broadcast.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;

mod rc_logic;
use rc_logic::{config, wiring};

use lib_rcauto::loggers::setup_logging;
use lib_rcauto::rc::snapshot::collect_snapshots;
use lib_rcauto::rc::{AccountRcState, AccountRoster, DelegationLedger};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    setup_logging(&config.log_dir(), config.log_level(), "rc_snapshot")?;

    let settings = Arc::new(config.into_settings().context("invalid configuration")?);
    let components = wiring::build(Arc::clone(&settings)).await?;

    let roster = AccountRoster::discover(&components.account_client, &settings)
        .await
        .context("discovering the roster")?;
    let mut snapshots = collect_snapshots(&components.rc_client, &roster, None, &settings, Utc::now())
        .await
        .context("reading RC")?;
    let ledger = DelegationLedger::load(&components.rc_client, roster.delegating())
        .await
        .context("reading delegations")?;
    snapshots.attach_outbound(&ledger);

    println!("{}", AccountRcState::log_line_header());
    for snapshot in snapshots.iter() {
        println!("{}", snapshot.log_line());
    }
    for delegator in roster.delegating() {
        for grant in ledger.list_outbound(delegator) {
            println!("{:>16} -> {:<16} {:>14}", grant.from_account, grant.to_account, grant.amount);
        }
    }
    Ok(())
}
