//! Per-day price variation log
//!
//! Every detected price change appends one `{t, p}` observation to a list
//! keyed `{logPrefix}:{YYYYMMDD}:{itemId}`. Appends only ever target the
//! current UTC day, and the aggregator only ever reads the previous one, so
//! the two never observe each other mid-flight. Each day's list carries a
//! retention TTL as a backstop for days the aggregator never cleans up.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use types::day::DayKey;
use types::errors::KvError;
use types::ids::ItemId;
use types::observation::PriceObservation;

use crate::config::VariationConfig;
use crate::kv::KvStore;
use crate::metrics::EngineMetrics;

/// Append-only observation log in the cache store.
pub struct VariationLog {
    kv: Arc<dyn KvStore>,
    log_prefix: String,
    retention_secs: u64,
    metrics: Arc<EngineMetrics>,
}

impl VariationLog {
    pub fn new(
        kv: Arc<dyn KvStore>,
        config: &VariationConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            kv,
            log_prefix: config.log_prefix.clone(),
            retention_secs: config.retention_secs,
            metrics,
        }
    }

    /// List key for one item on one day.
    pub fn key(&self, day: &DayKey, id: ItemId) -> String {
        format!("{}:{}:{}", self.log_prefix, day, id)
    }

    /// Scan pattern covering all items for one day.
    pub fn pattern(&self, day: &DayKey) -> String {
        format!("{}:{}:*", self.log_prefix, day)
    }

    /// Extract the item id from a key produced by [`key`](Self::key).
    pub fn parse_item_id(&self, key: &str) -> Option<ItemId> {
        key.rsplit(':').next()?.parse().ok()
    }

    /// Append one observation under the day containing its timestamp.
    ///
    /// Ordering within a day's list matches wall-clock observation order
    /// because appends happen in the per-item sequential pipeline.
    pub async fn append(&self, id: ItemId, observation: &PriceObservation) -> Result<(), KvError> {
        let day = DayKey::from_utc(observation.timestamp);
        let key = self.key(&day, id);
        self.kv.rpush(&key, &[observation.to_entry()]).await?;
        self.kv.expire(&key, self.retention_secs).await?;
        self.metrics.record_variation_append();
        debug!(item_id = %id, day = %day, price = observation.price, "observation logged");
        Ok(())
    }

    /// Convenience append for "observed `price` at `now`".
    pub async fn record(
        &self,
        id: ItemId,
        price: i64,
        now: DateTime<Utc>,
    ) -> Result<(), KvError> {
        self.append(id, &PriceObservation::new(now, price)).await
    }

    /// Full contents of one item's list for one day.
    pub async fn read_day(&self, day: &DayKey, id: ItemId) -> Result<Vec<String>, KvError> {
        self.kv.lrange_all(&self.key(day, id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use chrono::TimeZone;

    fn log_over(kv: Arc<MemoryKv>) -> VariationLog {
        VariationLog::new(kv, &VariationConfig::default(), Arc::new(EngineMetrics::new()))
    }

    #[test]
    fn test_key_layout() {
        let log = log_over(Arc::new(MemoryKv::with_defaults()));
        let day = DayKey::new("20260807");
        assert_eq!(log.key(&day, ItemId::new(5302)), "pricelog:20260807:5302");
        assert_eq!(log.pattern(&day), "pricelog:20260807:*");
        assert_eq!(
            log.parse_item_id("pricelog:20260807:5302"),
            Some(ItemId::new(5302))
        );
        assert_eq!(log.parse_item_id("pricelog:20260807:zzz"), None);
    }

    #[tokio::test]
    async fn test_append_goes_to_timestamp_day() {
        let kv = Arc::new(MemoryKv::with_defaults());
        let log = log_over(kv.clone());
        let at = Utc.with_ymd_and_hms(2026, 8, 7, 23, 59, 59).unwrap();

        log.record(ItemId::new(1), 100, at).await.unwrap();

        let entries = log.read_day(&DayKey::new("20260807"), ItemId::new(1)).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains(r#""p":100"#));
        // Other days see nothing.
        assert!(log
            .read_day(&DayKey::new("20260806"), ItemId::new(1))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_appends_preserve_order() {
        let kv = Arc::new(MemoryKv::with_defaults());
        let log = log_over(kv);
        let day = Utc.with_ymd_and_hms(2026, 8, 7, 10, 0, 0).unwrap();

        for (offset, price) in [(0, 100i64), (60, 110), (120, 105)] {
            log.record(
                ItemId::new(7),
                price,
                day + chrono::Duration::seconds(offset),
            )
            .await
            .unwrap();
        }

        let entries = log.read_day(&DayKey::new("20260807"), ItemId::new(7)).await.unwrap();
        let prices: Vec<i64> = entries
            .iter()
            .map(|e| PriceObservation::parse_entry(e).unwrap().price)
            .collect();
        assert_eq!(prices, vec![100, 110, 105]);
    }

    #[tokio::test]
    async fn test_retention_ttl_applied() {
        let kv = Arc::new(MemoryKv::with_defaults());
        let log = log_over(kv.clone());
        let at = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();

        log.record(ItemId::new(2), 55, at).await.unwrap();

        let ttl = kv.ttl("pricelog:20260807:2").await.unwrap();
        assert_eq!(ttl, Some(VariationConfig::default().retention_secs));
    }
}
