//! # Price Feed Publisher
//!
//! A self-scheduling witness task that runs next to the RC polling service.
//! Each poll fetches the HIVE price in HBD over REST, compares it with the last
//! published base kept in a small state file, and broadcasts a `feed_publish`
//! when the price moved enough or the last publication is getting old.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::Utc;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::configs::settings::Settings;
use crate::hive::broadcaster::{BroadcastOutcome, Broadcaster};
use crate::hive::operations::feed_publish;
use crate::retrieve::ky_http::ApiClient;

/// Relative price move that forces a new publication.
pub const MIN_PRICE_CHANGE: f64 = 0.02;
/// Age in seconds after which the feed is republished regardless of price.
pub const MAX_FEED_AGE_SECS: f64 = 12.0 * 3600.0;

const RETRY_DELAY: Duration = Duration::from_secs(60);

/// The last published price, as stored in the state file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedState {
    /// HBD per HIVE.
    pub base: f64,
    /// Unix seconds of the publication.
    pub timestamp: f64,
}

/// Outcome of a single poll.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPollResult {
    /// The fetched price.
    pub base: f64,
    /// Transaction id when a feed was published.
    pub published: Option<String>,
    /// How long to wait before the next poll.
    pub next_delay: Duration,
}

/// Periodic `feed_publish` task for a witness account.
pub struct PriceFeedPlugin {
    api: ApiClient,
    broadcaster: Arc<Broadcaster>,
    publisher: String,
    pointer: String,
    state_file: PathBuf,
    interval: Duration,
}

impl PriceFeedPlugin {
    /// Builds the plugin, or `None` when no publisher is configured.
    ///
    /// # Errors
    /// Fails when the price URL is not a valid absolute URL.
    pub fn from_settings(settings: &Settings, broadcaster: Arc<Broadcaster>) -> anyhow::Result<Option<Self>> {
        let Some(publisher) = settings.price_feed_publisher.clone() else {
            return Ok(None);
        };
        let api = ApiClient::new(
            &settings.price_feed_url,
            None,
            Duration::from_secs(settings.read_timeout_secs),
        )
        .context("price feed URL")?;
        Ok(Some(Self {
            api,
            broadcaster,
            publisher,
            pointer: settings.price_feed_pointer.clone(),
            state_file: PathBuf::from(&settings.price_feed_state_file),
            interval: Duration::from_secs(settings.price_feed_interval_secs),
        }))
    }

    /// Polls until a shutdown signal arrives.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        log::info!("Price feed publisher started for {}", self.publisher);

        loop {
            let delay = match self.execute_poll().await {
                Ok(result) => {
                    if let Some(trx_id) = &result.published {
                        log::info!("{}: published feed {:.3} HBD in {}", self.publisher, result.base, trx_id);
                    }
                    result.next_delay
                }
                Err(e) => {
                    log::error!("Price feed error: {e:#}. Retrying in {} s", RETRY_DELAY.as_secs());
                    RETRY_DELAY
                }
            };

            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("Price feed publisher received shutdown signal.");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Fetches the price and publishes it if needed.
    ///
    /// # Errors
    /// Fetch, broadcast or state-file failures.
    pub async fn execute_poll(&self) -> anyhow::Result<FeedPollResult> {
        let base = self.fetch_price().await?;
        let published = self.publish_if_needed(base, Utc::now().timestamp() as f64).await?;
        Ok(FeedPollResult {
            base,
            published,
            next_delay: self.interval,
        })
    }

    async fn fetch_price(&self) -> anyhow::Result<f64> {
        let response = self
            .api
            .request::<Value, ()>(Method::GET, "", None, None)
            .await
            .context("price request")?;
        if !response.success {
            return Err(anyhow!(
                "price endpoint returned {}: {}",
                response.status,
                response.error_body.unwrap_or_default()
            ));
        }
        let body = response.data.unwrap_or(Value::Null);
        extract_price(&body, &self.pointer)
    }

    /// Publishes `base` unless the state file says it is not needed.
    ///
    /// # Errors
    /// Broadcast or state-file write failures.
    pub async fn publish_if_needed(&self, base: f64, now: f64) -> anyhow::Result<Option<String>> {
        let previous = read_state(&self.state_file).await;
        if !update_needed(previous, base, now) {
            log::debug!("Feed {base:.3} HBD close to last published value; skipping");
            return Ok(None);
        }

        let outcome = self
            .broadcaster
            .broadcast(vec![feed_publish(&self.publisher, base)])
            .await
            .context("feed_publish broadcast")?;
        let trx_id = match outcome {
            BroadcastOutcome::Confirmed(trx) => trx.trx_id,
            BroadcastOutcome::NoOp(message) => {
                log::info!("{}: {message}", self.publisher);
                return Ok(None);
            }
        };

        let state = serde_json::to_vec(&FeedState { base, timestamp: now })?;
        tokio::fs::write(&self.state_file, state)
            .await
            .with_context(|| format!("writing {}", self.state_file.display()))?;
        Ok(Some(trx_id))
    }
}

/// Reads the number at `pointer` in `body`. Strings holding numbers are accepted.
///
/// # Errors
/// When the pointer does not resolve to a positive number.
pub fn extract_price(body: &Value, pointer: &str) -> anyhow::Result<f64> {
    let price = match body.pointer(pointer) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    match price {
        Some(p) if p.is_finite() && p > 0.0 => Ok(p),
        _ => Err(anyhow!("no price at {pointer}")),
    }
}

/// Whether a feed of `base` should be published given the last publication.
pub fn update_needed(previous: Option<FeedState>, base: f64, now: f64) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    let mean = (base + previous.base) / 2.0;
    if mean <= 0.0 {
        return true;
    }
    let change = (base - previous.base).abs() / mean;
    let age = now - previous.timestamp;
    !(change < MIN_PRICE_CHANGE && age < MAX_FEED_AGE_SECS)
}

async fn read_state(path: &Path) -> Option<FeedState> {
    let raw = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&raw)
        .map_err(|e| log::warn!("Ignoring unreadable feed state {}: {}", path.display(), e))
        .ok()
}
