//! Upstream listings fetcher
//!
//! One throttled HTTP call per fetch, wrapped in an explicit
//! retry-with-backoff combinator. Every attempt resolves to a tagged
//! outcome: success, retryable (transport errors, bad statuses, malformed
//! bodies), or fatal (the upstream reported an application error, which a
//! retry cannot fix). After exhausting retries the fetch soft-fails to an
//! empty snapshot so the polling cycle keeps moving.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};
use types::errors::MarketApiError;
use types::ids::ItemId;
use types::market::{Listing, MarketSnapshot};

use crate::config::ApiConfig;
use crate::metrics::EngineMetrics;

/// Outcome of a single fetch attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    /// Worth retrying after a backoff delay.
    Retryable(MarketApiError),
    /// Retrying cannot help; fail now.
    Fatal(MarketApiError),
}

/// Exponential backoff: `initial * 2^n` after the n-th failed attempt.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts, first try included.
    pub attempts: u32,
    pub initial: Duration,
}

impl BackoffPolicy {
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        self.initial * 2u32.saturating_pow(failed_attempt)
    }
}

/// Drive an attempt closure until success, a fatal outcome, or exhaustion.
///
/// The closure receives the zero-based attempt index. Sleeps the policy's
/// backoff between retryable failures; never sleeps after the final one.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    mut attempt: F,
) -> Result<T, MarketApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Attempt<T>>,
{
    let mut last_error = MarketApiError::Transport("no attempts made".to_string());
    for index in 0..policy.attempts.max(1) {
        match attempt(index).await {
            Attempt::Success(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retryable(err) => {
                debug!(attempt = index + 1, error = %err, "fetch attempt failed");
                last_error = err;
                if index + 1 < policy.attempts {
                    tokio::time::sleep(policy.delay_for(index)).await;
                }
            }
        }
    }
    Err(last_error)
}

/// Fetches live marketplace listings for single items.
pub struct ListingsFetcher {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    policy: BackoffPolicy,
    metrics: Arc<EngineMetrics>,
}

impl ListingsFetcher {
    pub fn new(config: &ApiConfig, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            policy: BackoffPolicy {
                attempts: config.fetch_attempts,
                initial: Duration::from_millis(config.backoff_initial_ms),
            },
            metrics,
        }
    }

    /// Fetch current listings for one item.
    ///
    /// Never errors: exhausted retries and fatal upstream errors both
    /// resolve to the empty snapshot (`min_price: None`), and the caller's
    /// cycle continues with the next item.
    pub async fn fetch(&self, id: ItemId) -> MarketSnapshot {
        self.metrics.record_fetch_attempted();
        match retry_with_backoff(&self.policy, |_| self.attempt(id)).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(item_id = %id, error = %err, "listings fetch soft-failed");
                self.metrics.record_fetch_soft_failed();
                MarketSnapshot::unavailable()
            }
        }
    }

    async fn attempt(&self, id: ItemId) -> Attempt<MarketSnapshot> {
        let url = format!("{}/market/{}/itemmarket", self.base_url, id);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return Attempt::Retryable(MarketApiError::Transport(err.to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            return Attempt::Retryable(MarketApiError::Status {
                status: status.as_u16(),
            });
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => return Attempt::Retryable(MarketApiError::Malformed(err.to_string())),
        };

        parse_market_reply(&body)
    }
}

/// Decode the upstream reply envelope.
///
/// `{error: {code, error}}` is a stable application error — fatal.
/// A missing or non-array listings field is treated as a malformed body and
/// retried; individual malformed listings are dropped silently.
pub fn parse_market_reply(body: &Value) -> Attempt<MarketSnapshot> {
    if let Some(error) = body.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let message = error
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        return Attempt::Fatal(MarketApiError::Upstream { code, message });
    }

    let listings = match body
        .get("itemmarket")
        .and_then(|m| m.get("listings"))
        .and_then(Value::as_array)
    {
        Some(listings) => listings,
        None => {
            return Attempt::Retryable(MarketApiError::Malformed(
                "missing itemmarket.listings".to_string(),
            ))
        }
    };

    let parsed: Vec<Listing> = listings.iter().filter_map(parse_listing).collect();
    Attempt::Success(MarketSnapshot::from_listings(parsed))
}

/// Decode one raw listing, rejecting anything without an integral price and
/// a finite numeric quantity.
fn parse_listing(raw: &Value) -> Option<Listing> {
    let price = raw.get("price")?.as_i64()?;
    let amount = raw.get("amount")?;
    let quantity = match amount.as_i64() {
        Some(n) => n,
        None => {
            let f = amount.as_f64().filter(|f| f.is_finite())?;
            f as i64
        }
    };
    Some(Listing { price, quantity })
}
