//! Polling cycle and engine wiring
//!
//! `PriceEngine` owns the injected state objects (watch set, name memo,
//! broadcast state) and drives the per-item pipeline: throttled fetch →
//! change detection → store/cache/variation writes → broadcast. The cycle
//! loop ticks on a fixed timer over a snapshot of the watch set; a slow
//! cycle may overlap the next tick, and the shared throttle keeps the
//! outbound rate bounded regardless.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use types::errors::KvError;
use types::ids::ItemId;
use types::item::Item;
use types::market::MarketSnapshot;

use crate::aggregate::DailyAggregator;
use crate::broadcast::{Broadcaster, ConnectionId};
use crate::cache::{CacheError, PriceCache};
use crate::config::EngineConfig;
use crate::docstore::DocumentStore;
use crate::fetcher::ListingsFetcher;
use crate::kv::{KvStore, Scanner};
use crate::messages::{Inbound, Outbound};
use crate::metrics::EngineMetrics;
use crate::throttle::ThrottledQueue;
use crate::variation::VariationLog;
use crate::watch::WatchSet;

/// Errors that prevent the engine from starting.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("cache store probe failed: {0}")]
    Probe(#[from] KvError),
}

/// Lazy display-name resolution with a negative-result memo.
///
/// A failed or empty lookup memoizes `None` so the cycle never hammers the
/// store with lookups that keep failing.
pub struct NameResolver {
    store: Arc<dyn DocumentStore>,
    memo: Mutex<HashMap<ItemId, Option<String>>>,
}

impl NameResolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, id: ItemId) -> Option<String> {
        if let Some(known) = self.memo.lock().expect("name memo lock").get(&id) {
            return known.clone();
        }
        let name = match self.store.find_item(id).await {
            Ok(Some(item)) if !item.name.is_empty() => Some(item.name),
            Ok(_) => None,
            Err(err) => {
                warn!(item_id = %id, error = %err, "name lookup failed; memoizing negative result");
                None
            }
        };
        self.memo
            .lock()
            .expect("name memo lock")
            .insert(id, name.clone());
        name
    }

    /// Memoized entries (tests).
    pub fn memo_len(&self) -> usize {
        self.memo.lock().expect("name memo lock").len()
    }
}

/// The assembled ingestion pipeline.
pub struct PriceEngine {
    config: EngineConfig,
    kv: Arc<dyn KvStore>,
    store: Arc<dyn DocumentStore>,
    scanner: Arc<Scanner>,
    watch: Arc<WatchSet>,
    queue: Arc<ThrottledQueue>,
    fetcher: Arc<ListingsFetcher>,
    cache: Arc<PriceCache>,
    variation: Arc<VariationLog>,
    broadcaster: Arc<Broadcaster>,
    names: NameResolver,
    metrics: Arc<EngineMetrics>,
}

impl PriceEngine {
    /// Wire the pipeline: probe the scan protocol, warm the cache (degrading
    /// on a missing JSON capability), and seed the watch set.
    pub async fn bootstrap(
        config: EngineConfig,
        kv: Arc<dyn KvStore>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Arc<Self>, EngineError> {
        let metrics = Arc::new(EngineMetrics::new());

        let probe_pattern = format!("{}:{}:*", config.cache.prefix, config.cache.struct_version);
        let scanner = Arc::new(Scanner::probe(kv.clone(), &probe_pattern).await?);

        let cache = Arc::new(PriceCache::new(
            kv.clone(),
            scanner.clone(),
            &config.cache,
            metrics.clone(),
        ));
        match cache.warm_up(store.as_ref()).await {
            Ok(report) => info!(?report, "price cache ready"),
            Err(CacheError::JsonUnsupported) => {
                warn!("cache store lacks JSON support; running document-store-only");
            }
            Err(err) => {
                warn!(error = %err, "cache warm-up failed; reads will fall back to the store");
            }
        }

        let watch = Arc::new(WatchSet::new());
        watch.seed_from_store(store.as_ref()).await;

        let variation = Arc::new(VariationLog::new(
            kv.clone(),
            &config.variation,
            metrics.clone(),
        ));
        let broadcaster = Arc::new(Broadcaster::new(metrics.clone()));
        let fetcher = Arc::new(ListingsFetcher::new(&config.api, metrics.clone()));
        let queue = Arc::new(ThrottledQueue::new(config.api.safe_rpm));
        let names = NameResolver::new(store.clone());

        Ok(Arc::new(Self {
            config,
            kv,
            store,
            scanner,
            watch,
            queue,
            fetcher,
            cache,
            variation,
            broadcaster,
            names,
            metrics,
        }))
    }

    pub fn watch(&self) -> &Arc<WatchSet> {
        &self.watch
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build the daily aggregator over this engine's shared parts.
    pub fn aggregator(&self) -> Arc<DailyAggregator> {
        Arc::new(DailyAggregator::new(
            self.kv.clone(),
            self.scanner.clone(),
            self.variation.clone(),
            self.store.clone(),
            self.config.aggregator.clone(),
            self.metrics.clone(),
        ))
    }

    /// Bulk catalog read: cache first, document store as the authority.
    pub async fn all_items(&self) -> Result<Vec<Item>, CacheError> {
        self.cache.all_items(&self.store).await
    }

    /// One polling pass over a snapshot of the watch set.
    ///
    /// Items are processed sequentially behind the shared throttle; one
    /// item's failure never touches the others.
    pub async fn run_cycle(&self) {
        let snapshot = self.watch.snapshot();
        if snapshot.is_empty() {
            return;
        }
        info!(items = snapshot.len(), "polling cycle started");
        for id in snapshot {
            self.process_item(id).await;
        }
    }

    async fn process_item(&self, id: ItemId) {
        let fetcher = self.fetcher.clone();
        let snapshot = match self.queue.enqueue(async move { fetcher.fetch(id).await }).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(item_id = %id, error = %err, "fetch queue rejected task");
                return;
            }
        };
        let name = self.names.resolve(id).await;
        self.apply_snapshot(id, name, snapshot, Utc::now()).await;
    }

    /// Shared write path for the cycle loop and on-demand updates.
    ///
    /// On a detected change the sequence per item is fixed: document-store
    /// price upsert, cache entry write, variation-log append, broadcast.
    /// Each step's failure is logged and the rest still run — consumers see
    /// at worst stale data, never a stalled pipeline.
    pub async fn apply_snapshot(
        &self,
        id: ItemId,
        name: Option<String>,
        snapshot: MarketSnapshot,
        now: DateTime<Utc>,
    ) {
        if !self.broadcaster.detect_change(id, snapshot.min_price) {
            return;
        }

        if let Err(err) = self
            .store
            .upsert_price(id, name.clone(), snapshot.min_price)
            .await
        {
            warn!(item_id = %id, error = %err, "price upsert failed");
        }

        let entry = match self.store.find_item(id).await {
            Ok(Some(mut doc)) => {
                doc.price = snapshot.min_price;
                doc
            }
            // Store unavailable or item unknown: cache the minimal shape.
            _ => Item::minimal(id, name.clone().unwrap_or_default(), snapshot.min_price),
        };
        if let Err(err) = self.cache.write_item(&entry).await {
            self.metrics.record_cache_write_error();
            warn!(item_id = %id, error = %err, "cache write failed");
        }

        // An empty market has no price to observe; the change is still
        // broadcast below.
        if let Some(price) = snapshot.min_price {
            if let Err(err) = self.variation.record(id, price, now).await {
                warn!(item_id = %id, error = %err, "variation-log append failed");
            }
        }

        self.broadcaster
            .broadcast_price_update(now, id, name, &snapshot);
    }

    /// On-demand refresh. A supplied price is authoritative; otherwise the
    /// item is fetched live through the same throttle as the cycle.
    pub async fn update_price(&self, id: ItemId, price: Option<i64>) {
        let snapshot = match price {
            Some(price) => MarketSnapshot {
                min_price: Some(price),
                listings: Vec::new(),
            },
            None => {
                let fetcher = self.fetcher.clone();
                match self.queue.enqueue(async move { fetcher.fetch(id).await }).await {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        warn!(item_id = %id, error = %err, "fetch queue rejected task");
                        return;
                    }
                }
            }
        };
        let name = self.names.resolve(id).await;
        self.apply_snapshot(id, name, snapshot, Utc::now()).await;
    }

    /// Handle one inbound live-connection message.
    pub async fn handle_message(&self, connection: ConnectionId, message: Inbound) {
        match message {
            Inbound::Watch { item_id } => {
                let Some(id) = ItemId::try_new(item_id) else {
                    return;
                };
                self.watch.add(id);
                self.broadcaster.send_to(
                    connection,
                    Outbound::WatchAck {
                        item_id,
                        total: self.watch.len(),
                    },
                );
            }
            Inbound::Unwatch { item_id } => {
                let Some(id) = ItemId::try_new(item_id) else {
                    return;
                };
                self.watch.remove(id);
                self.broadcaster.send_to(
                    connection,
                    Outbound::UnwatchAck {
                        item_id,
                        total: self.watch.len(),
                    },
                );
            }
            Inbound::UpdatePrice { id, price } => {
                let Some(id) = ItemId::try_new(id) else {
                    return;
                };
                self.update_price(id, price).await;
            }
        }
    }

    /// Greeting for a freshly registered connection: welcome, then the
    /// current watch-set snapshot.
    pub fn greet(&self, connection: ConnectionId) {
        self.broadcaster
            .send_to(connection, Outbound::Welcome { time: Utc::now() });
        let items = self
            .watch
            .snapshot()
            .into_iter()
            .map(|id| id.as_u32())
            .collect();
        self.broadcaster
            .send_to(connection, Outbound::WatchList { items });
    }

    /// Fixed-interval cycle loop. Each tick spawns its cycle, so a slow
    /// cycle overlaps the next one instead of delaying it; the shared
    /// throttle turns that overlap into backpressure.
    pub fn spawn_cycle_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(engine.config.cycle.refresh_ms.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine.run_cycle().await;
                });
            }
        })
    }
}
