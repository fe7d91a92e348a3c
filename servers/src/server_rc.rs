use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;

mod rc_logic;
use rc_logic::{config, wiring};

use lib_rcauto::ingestors::{PriceFeedPlugin, RcPollingService};
use lib_rcauto::loggers::setup_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    let log_path = setup_logging(&config.log_dir(), config.log_level(), "server_rc")?;
    log::info!("Logging to {}", log_path.display());

    let settings = Arc::new(config.into_settings().context("invalid configuration")?);
    let components = wiring::build(Arc::clone(&settings)).await?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let service = RcPollingService::new(
        Arc::clone(&settings),
        Arc::clone(&components.account_client),
        Arc::clone(&components.rc_client),
        components.sink(),
    );
    let polling_handle = tokio::spawn(service.run(shutdown_tx.subscribe()));

    let feed_handle = match PriceFeedPlugin::from_settings(&settings, Arc::clone(&components.broadcaster))? {
        Some(plugin) => {
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move { plugin.run(shutdown).await })
        }
        None => {
            log::info!("PRICE_FEED_PUBLISHER not set: price feed disabled");
            tokio::spawn(async {})
        }
    };

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {e}");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // A running cycle finishes before the service notices the signal.
    let _ = tokio::try_join!(polling_handle, feed_handle);

    log::info!("Shutdown complete.");
    Ok(())
}
