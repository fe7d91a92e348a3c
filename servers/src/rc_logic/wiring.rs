use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use lib_rcauto::configs::settings::Settings;
use lib_rcauto::connections::{HistoryStore, MemoryHistoryStore, PostgresHistoryStore};
use lib_rcauto::hive::{Broadcaster, HttpTransport, NoSigner, RemoteSigner, RpcClient, TransactionSigner};
use lib_rcauto::rc::RcSink;

/// Shared handles built once at startup.
pub struct Components {
    pub settings: Arc<Settings>,
    pub account_client: Arc<RpcClient>,
    pub rc_client: Arc<RpcClient>,
    pub broadcaster: Arc<Broadcaster>,
    pub store: Arc<dyn HistoryStore>,
}

impl Components {
    pub fn sink(&self) -> RcSink {
        RcSink::new(
            Arc::clone(&self.broadcaster),
            Arc::clone(&self.store),
            Arc::clone(&self.settings),
        )
    }
}

pub async fn build(settings: Arc<Settings>) -> Result<Components> {
    let transport = Arc::new(HttpTransport::from_settings(&settings).context("building the RPC transport")?);
    let (account_client, rc_client) =
        RpcClient::pools(&settings, transport).context("building the node pools")?;
    log::info!(
        "Node pools: {} account nodes, {} rc nodes",
        account_client.rotation().len(),
        rc_client.rotation().len()
    );

    let signer: Arc<dyn TransactionSigner> = match &settings.signer_url {
        Some(url) => Arc::new(
            RemoteSigner::new(
                url,
                settings.signer_token.clone(),
                Duration::from_secs(settings.read_timeout_secs),
            )
            .context("connecting the signing service")?,
        ),
        None => {
            log::warn!("SIGNER_URL not set: monitoring only, every broadcast will fail");
            Arc::new(NoSigner)
        }
    };
    let broadcaster = Arc::new(Broadcaster::new(
        Arc::clone(&account_client),
        signer,
        settings.chain_id(),
    ));

    let store: Arc<dyn HistoryStore> = match &settings.database_url {
        Some(url) => {
            let store = PostgresHistoryStore::new(url).context("creating the database pool")?;
            store.ensure_schema().await.context("preparing the history schema")?;
            Arc::new(store)
        }
        None => {
            log::warn!("DB_CONNECTION not set: history is kept in memory only");
            Arc::new(MemoryHistoryStore::new())
        }
    };

    Ok(Components {
        settings,
        account_client,
        rc_client,
        broadcaster,
        store,
    })
}
