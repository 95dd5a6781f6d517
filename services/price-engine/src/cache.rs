//! Versioned per-item price cache
//!
//! Cache entries live under `{prefix}:{structVersion}:{itemId}` with a 24h
//! sliding expiration. Bumping the struct version makes every older entry
//! unreachable, which replaces explicit migrations.
//!
//! Warm-up streams the catalog out of the document store in fixed chunks,
//! validates the result with a key scan, and runs one incremental repair
//! pass when keys are missing. Bulk reads prefer the cache but treat it as
//! all-or-nothing: one missing required field anywhere falls the whole read
//! back to the document store and repopulates the cache in the background.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use types::errors::{KvError, StoreError};
use types::ids::ItemId;
use types::item::{has_required_cache_fields, Item};

use crate::config::CacheConfig;
use crate::docstore::DocumentStore;
use crate::kv::{KvCommand, KvReply, KvStore, Scanner};
use crate::metrics::EngineMetrics;

/// Cache-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The store cannot hold JSON documents; the cache is disabled.
    #[error("cache store lacks JSON document support")]
    JsonUnsupported,

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Key layout for one cache generation.
#[derive(Debug, Clone)]
pub struct CacheKeyspace {
    prefix: String,
    version: u32,
}

impl CacheKeyspace {
    pub fn new(prefix: impl Into<String>, version: u32) -> Self {
        Self {
            prefix: prefix.into(),
            version,
        }
    }

    /// Key for one item in the current generation.
    pub fn key(&self, id: ItemId) -> String {
        format!("{}:{}:{}", self.prefix, self.version, id)
    }

    /// Scan pattern matching the current generation only.
    pub fn pattern(&self) -> String {
        format!("{}:{}:*", self.prefix, self.version)
    }

    /// Extract the item id from a key produced by [`key`](Self::key).
    pub fn parse_id(&self, key: &str) -> Option<ItemId> {
        key.rsplit(':').next()?.parse().ok()
    }
}

/// Outcome of a warm-up pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmUpReport {
    /// Documents the store reported.
    pub expected: u64,
    /// Entries written during the initial pass.
    pub written: usize,
    /// Per-key write failures (skipped, not fatal).
    pub write_errors: usize,
    /// Keys visible to the validation scan after warm-up (and repair, if
    /// one ran).
    pub scanned: usize,
    /// Entries written by the repair pass, zero when none was needed.
    pub repaired: usize,
}

/// The per-item price cache.
pub struct PriceCache {
    kv: Arc<dyn KvStore>,
    scanner: Arc<Scanner>,
    keyspace: CacheKeyspace,
    ttl_secs: u64,
    chunk_size: usize,
    scan_batch: usize,
    /// Cleared when the JSON capability probe fails; the engine then runs
    /// document-store-only.
    enabled: AtomicBool,
    metrics: Arc<EngineMetrics>,
}

impl PriceCache {
    pub fn new(
        kv: Arc<dyn KvStore>,
        scanner: Arc<Scanner>,
        config: &CacheConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            kv,
            scanner,
            keyspace: CacheKeyspace::new(config.prefix.clone(), config.struct_version),
            ttl_secs: config.ttl_secs,
            chunk_size: config.chunk_size.max(1),
            scan_batch: config.scan_batch.max(1),
            enabled: AtomicBool::new(true),
            metrics,
        }
    }

    pub fn keyspace(&self) -> &CacheKeyspace {
        &self.keyspace
    }

    /// Whether cache-backed reads are live.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Populate the cache from the document store and validate the result.
    ///
    /// Probes JSON support first; on a missing capability the cache is
    /// disabled and `JsonUnsupported` is returned — callers log it and keep
    /// the process up. Individual write failures are skipped and counted.
    /// If the validation scan comes up short, one repair pass runs.
    pub async fn warm_up(&self, store: &dyn DocumentStore) -> Result<WarmUpReport, CacheError> {
        if !self.kv.supports_json().await {
            self.enabled.store(false, Ordering::SeqCst);
            return Err(CacheError::JsonUnsupported);
        }
        self.enabled.store(true, Ordering::SeqCst);

        let items = store.all_items().await?;
        let expected = store.estimated_count().await.unwrap_or(items.len() as u64);

        let mut written = 0;
        let mut write_errors = 0;
        for chunk in items.chunks(self.chunk_size) {
            let (ok, failed) = self.write_chunk(chunk).await;
            written += ok;
            write_errors += failed;
        }

        let mut scanned = self.scan_keys().await?.len();
        let mut repaired = 0;
        if (scanned as u64) < expected {
            warn!(
                scanned,
                expected, "cache warm-up came up short; running repair pass"
            );
            repaired = self.repair(store).await?;
            scanned = self.scan_keys().await?.len();
        }

        info!(
            expected,
            written, write_errors, scanned, repaired, "cache warm-up complete"
        );
        Ok(WarmUpReport {
            expected,
            written,
            write_errors,
            scanned,
            repaired,
        })
    }

    /// Write one item's entry plus its sliding expiration.
    ///
    /// A no-op in degraded mode, so call sites never branch on cache state.
    pub async fn write_item(&self, item: &Item) -> Result<(), KvError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let key = self.keyspace.key(item.id);
        let value =
            serde_json::to_value(item).map_err(|err| KvError::Protocol(err.to_string()))?;
        self.kv.json_set(&key, &value).await?;
        self.kv.expire(&key, self.ttl_secs).await?;
        self.metrics.record_cache_write();
        Ok(())
    }

    /// Read one item's entry.
    pub async fn read_item(&self, id: ItemId) -> Result<Option<Item>, KvError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let value = self.kv.json_get(&self.keyspace.key(id)).await?;
        Ok(value.and_then(|v| serde_json::from_value(v).ok()))
    }

    /// All cache keys in the current generation.
    pub async fn scan_keys(&self) -> Result<Vec<String>, KvError> {
        self.scanner
            .scan_all(&self.keyspace.pattern(), self.scan_batch)
            .await
    }

    /// Item ids currently present in the cache.
    pub async fn cached_ids(&self) -> Result<HashSet<ItemId>, KvError> {
        let keys = self.scan_keys().await?;
        Ok(keys
            .iter()
            .filter_map(|key| self.keyspace.parse_id(key))
            .collect())
    }

    /// One incremental repair pass: write exactly the items the store has
    /// and the cache is missing. Returns how many were written.
    pub async fn repair(&self, store: &dyn DocumentStore) -> Result<usize, CacheError> {
        if !self.is_enabled() {
            return Ok(0);
        }
        let existing = self.cached_ids().await?;
        let items = store.all_items().await?;
        let missing: Vec<Item> = items
            .into_iter()
            .filter(|item| !existing.contains(&item.id))
            .collect();

        let mut written = 0;
        for chunk in missing.chunks(self.chunk_size) {
            let (ok, _failed) = self.write_chunk(chunk).await;
            written += ok;
        }
        debug!(written, "cache repair pass finished");
        Ok(written)
    }

    /// Bulk read of the full catalog, cache first.
    ///
    /// Falls back to the document store when the cache is disabled, empty,
    /// unreadable, or missing any required field in any entry. A fallback
    /// read repopulates the cache in the background; the returned items are
    /// authoritative either way.
    pub async fn all_items(
        self: &Arc<Self>,
        store: &Arc<dyn DocumentStore>,
    ) -> Result<Vec<Item>, CacheError> {
        if self.is_enabled() {
            match self.read_all_cached().await {
                Ok(Some(items)) => return Ok(items),
                Ok(None) => {
                    debug!("cache read found stale or incomplete entries; falling back");
                }
                Err(err) => {
                    warn!(error = %err, "cache read failed; falling back to document store");
                }
            }
            self.metrics.record_cache_fallback_read();
        }

        let items = store.all_items().await?;
        if self.is_enabled() {
            self.spawn_repopulate(items.clone());
        }
        Ok(items)
    }

    /// Read every cached entry; `None` means the cache as a whole is stale.
    async fn read_all_cached(&self) -> Result<Option<Vec<Item>>, KvError> {
        let keys = self.scan_keys().await?;
        if keys.is_empty() {
            return Ok(None);
        }

        let values = self.batch_read(&keys).await?;
        let mut items = Vec::with_capacity(values.len());
        for value in values {
            let value = match value {
                // A key expired between scan and read: incomplete view.
                None => return Ok(None),
                Some(value) => value,
            };
            if !has_required_cache_fields(&value) {
                return Ok(None);
            }
            match serde_json::from_value::<Item>(value) {
                Ok(item) => items.push(item),
                Err(_) => return Ok(None),
            }
        }
        items.sort_by_key(|item| item.id);
        Ok(Some(items))
    }

    async fn batch_read(&self, keys: &[String]) -> Result<Vec<Option<Value>>, KvError> {
        if self.kv.supports_pipeline() {
            let commands = keys
                .iter()
                .map(|key| KvCommand::JsonGet { key: key.clone() })
                .collect();
            match self.kv.pipeline(commands).await {
                Ok(replies) => {
                    return Ok(replies
                        .into_iter()
                        .map(|reply| match reply {
                            KvReply::Json(value) => value,
                            _ => None,
                        })
                        .collect());
                }
                Err(err) => {
                    debug!(error = %err, "pipelined cache read failed; reading sequentially");
                }
            }
        }
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.kv.json_get(key).await?);
        }
        Ok(values)
    }

    /// Write a chunk of entries, pipelined when the store allows it.
    ///
    /// Returns `(written, failed)`. A pipeline failure falls the chunk back
    /// to sequential writes so individual bad keys are isolated, skipped,
    /// and counted rather than sinking the batch.
    async fn write_chunk(&self, items: &[Item]) -> (usize, usize) {
        if items.is_empty() {
            return (0, 0);
        }

        if self.kv.supports_pipeline() {
            if let Some(commands) = self.chunk_commands(items) {
                match self.kv.pipeline(commands).await {
                    Ok(_) => {
                        for _ in items {
                            self.metrics.record_cache_write();
                        }
                        return (items.len(), 0);
                    }
                    Err(err) => {
                        debug!(error = %err, "pipelined cache write failed; falling back to sequential");
                    }
                }
            }
        }

        let mut written = 0;
        let mut failed = 0;
        for item in items {
            match self.write_item(item).await {
                Ok(()) => written += 1,
                Err(err) => {
                    failed += 1;
                    self.metrics.record_cache_write_error();
                    warn!(item_id = %item.id, error = %err, "cache write skipped");
                }
            }
        }
        (written, failed)
    }

    fn chunk_commands(&self, items: &[Item]) -> Option<Vec<KvCommand>> {
        let mut commands = Vec::with_capacity(items.len() * 2);
        for item in items {
            let key = self.keyspace.key(item.id);
            let value = serde_json::to_value(item).ok()?;
            commands.push(KvCommand::JsonSet { key: key.clone(), value });
            commands.push(KvCommand::Expire {
                key,
                ttl_secs: self.ttl_secs,
            });
        }
        Some(commands)
    }

    /// Fire-and-forget repopulation after a stale bulk read. Racing with
    /// concurrent reads is fine under last-write-wins entries.
    fn spawn_repopulate(self: &Arc<Self>, items: Vec<Item>) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut written = 0;
            let mut failed = 0;
            for chunk in items.chunks(cache.chunk_size) {
                let (ok, bad) = cache.write_chunk(chunk).await;
                written += ok;
                failed += bad;
            }
            debug!(written, failed, "cache repopulated after fallback read");
        });
    }
}
