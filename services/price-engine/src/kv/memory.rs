//! In-memory key-value backend
//!
//! Backs tests and single-process deployments. Configurable to mimic the
//! backend variations the engine must tolerate: either scan reply shape,
//! missing JSON support, missing pipeline support, and injectable per-key
//! write failures.

use dashmap::{DashMap, DashSet};
use serde_json::{json, Value};

use async_trait::async_trait;
use types::errors::KvError;

use super::scan::ScanShape;
use super::{glob_match, KvCommand, KvReply, KvStore};

/// Behavior switches for the memory backend.
#[derive(Debug, Clone)]
pub struct MemoryKvConfig {
    /// Reply shape produced by `scan`.
    pub scan_shape: ScanShape,
    /// Whether JSON-document commands are supported.
    pub json_support: bool,
    /// Whether pipelined batches are supported.
    pub pipeline_support: bool,
}

impl Default for MemoryKvConfig {
    fn default() -> Self {
        Self {
            scan_shape: ScanShape::Array,
            json_support: true,
            pipeline_support: true,
        }
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Json(Value),
    List(Vec<String>),
}

/// In-memory `KvStore` implementation.
pub struct MemoryKv {
    config: MemoryKvConfig,
    slots: DashMap<String, Slot>,
    ttls: DashMap<String, u64>,
    /// Keys whose writes fail with a backend error. Test hook for the
    /// skip-and-count error policy.
    fail_keys: DashSet<String>,
    /// When set, every scan fails. Test hook for abort-on-scan-failure
    /// policies.
    fail_scans: std::sync::atomic::AtomicBool,
}

impl MemoryKv {
    pub fn new(config: MemoryKvConfig) -> Self {
        Self {
            config,
            slots: DashMap::new(),
            ttls: DashMap::new(),
            fail_keys: DashSet::new(),
            fail_scans: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MemoryKvConfig::default())
    }

    /// Make writes to a key fail until cleared.
    pub fn inject_write_failure(&self, key: impl Into<String>) {
        self.fail_keys.insert(key.into());
    }

    /// Clear an injected failure.
    pub fn clear_write_failure(&self, key: &str) {
        self.fail_keys.remove(key);
    }

    /// Make every scan fail until cleared.
    pub fn inject_scan_failure(&self, fail: bool) {
        self.fail_scans
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of stored keys (all types).
    pub fn key_count(&self) -> usize {
        self.slots.len()
    }

    fn check_writable(&self, key: &str) -> Result<(), KvError> {
        if self.fail_keys.contains(key) {
            return Err(KvError::Backend(format!("injected failure for {key}")));
        }
        Ok(())
    }

    fn matching_keys_sorted(&self, pattern: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .slots
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| glob_match(pattern, key))
            .collect();
        keys.sort();
        keys
    }

    fn encode_scan_reply(&self, cursor: u64, keys: Vec<String>) -> Value {
        match self.config.scan_shape {
            // Array-shape backends report the cursor as a decimal string.
            ScanShape::Array => json!([cursor.to_string(), keys]),
            ScanShape::Object => json!({ "cursor": cursor, "keys": keys }),
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn supports_json(&self) -> bool {
        self.config.json_support
    }

    fn supports_pipeline(&self) -> bool {
        self.config.pipeline_support
    }

    async fn json_set(&self, key: &str, value: &Value) -> Result<(), KvError> {
        if !self.config.json_support {
            return Err(KvError::UnsupportedCapability("JSON.SET".to_string()));
        }
        self.check_writable(key)?;
        self.slots.insert(key.to_string(), Slot::Json(value.clone()));
        Ok(())
    }

    async fn json_get(&self, key: &str) -> Result<Option<Value>, KvError> {
        if !self.config.json_support {
            return Err(KvError::UnsupportedCapability("JSON.GET".to_string()));
        }
        match self.slots.get(key) {
            Some(entry) => match entry.value() {
                Slot::Json(value) => Ok(Some(value.clone())),
                Slot::List(_) => Err(KvError::Protocol(format!("{key} holds a list"))),
            },
            None => Ok(None),
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), KvError> {
        if self.slots.contains_key(key) {
            self.ttls.insert(key.to_string(), ttl_secs);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, KvError> {
        Ok(self.ttls.get(key).map(|ttl| *ttl.value()))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<Value, KvError> {
        if self.fail_scans.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(KvError::Backend("injected scan failure".to_string()));
        }
        let matching = self.matching_keys_sorted(pattern);
        let start = cursor as usize;
        let page: Vec<String> = matching.iter().skip(start).take(count.max(1)).cloned().collect();
        let consumed = start + page.len();
        let next_cursor = if consumed >= matching.len() {
            0
        } else {
            consumed as u64
        };
        Ok(self.encode_scan_reply(next_cursor, page))
    }

    async fn rpush(&self, key: &str, entries: &[String]) -> Result<u64, KvError> {
        self.check_writable(key)?;
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::List(Vec::new()));
        match slot.value_mut() {
            Slot::List(list) => {
                list.extend(entries.iter().cloned());
                Ok(list.len() as u64)
            }
            Slot::Json(_) => Err(KvError::Protocol(format!("{key} holds a document"))),
        }
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>, KvError> {
        match self.slots.get(key) {
            Some(entry) => match entry.value() {
                Slot::List(list) => Ok(list.clone()),
                Slot::Json(_) => Err(KvError::Protocol(format!("{key} holds a document"))),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn del(&self, keys: &[String]) -> Result<u64, KvError> {
        let mut removed = 0;
        for key in keys {
            if self.slots.remove(key).is_some() {
                removed += 1;
            }
            self.ttls.remove(key);
        }
        Ok(removed)
    }

    async fn pipeline(&self, commands: Vec<KvCommand>) -> Result<Vec<KvReply>, KvError> {
        if !self.config.pipeline_support {
            return Err(KvError::UnsupportedCapability("pipeline".to_string()));
        }
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            let reply = match command {
                KvCommand::JsonSet { key, value } => {
                    self.json_set(&key, &value).await?;
                    KvReply::Ok
                }
                KvCommand::JsonGet { key } => KvReply::Json(self.json_get(&key).await?),
                KvCommand::Expire { key, ttl_secs } => {
                    self.expire(&key, ttl_secs).await?;
                    KvReply::Ok
                }
                KvCommand::ListRange { key } => KvReply::Entries(self.lrange_all(&key).await?),
                KvCommand::Del { keys } => KvReply::Count(self.del(&keys).await?),
            };
            replies.push(reply);
        }
        Ok(replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Scanner;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_json_set_get_roundtrip() {
        let kv = MemoryKv::with_defaults();
        let doc = json!({"id": 1, "name": "Flower", "price": 120});
        kv.json_set("item:3:1", &doc).await.unwrap();
        assert_eq!(kv.json_get("item:3:1").await.unwrap(), Some(doc));
        assert_eq!(kv.json_get("item:3:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_unsupported() {
        let kv = MemoryKv::new(MemoryKvConfig {
            json_support: false,
            ..MemoryKvConfig::default()
        });
        assert!(!kv.supports_json().await);
        assert!(matches!(
            kv.json_set("k", &json!(1)).await,
            Err(KvError::UnsupportedCapability(_))
        ));
    }

    #[tokio::test]
    async fn test_expire_and_ttl() {
        let kv = MemoryKv::with_defaults();
        kv.json_set("item:3:1", &json!({})).await.unwrap();
        kv.expire("item:3:1", 86_400).await.unwrap();
        assert_eq!(kv.ttl("item:3:1").await.unwrap(), Some(86_400));
        assert_eq!(kv.ttl("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_append_and_read() {
        let kv = MemoryKv::with_defaults();
        let n = kv
            .rpush("pricelog:20260807:1", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(n, 2);
        let entries = kv.lrange_all("pricelog:20260807:1").await.unwrap();
        assert_eq!(entries, vec!["a", "b"]);
        assert!(kv.lrange_all("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_del_counts_existing_keys() {
        let kv = MemoryKv::with_defaults();
        kv.json_set("a", &json!(1)).await.unwrap();
        kv.json_set("b", &json!(2)).await.unwrap();
        let removed = kv
            .del(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(kv.key_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let kv = MemoryKv::with_defaults();
        kv.inject_write_failure("item:3:9");
        assert!(kv.json_set("item:3:9", &json!({})).await.is_err());
        kv.clear_write_failure("item:3:9");
        assert!(kv.json_set("item:3:9", &json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_scan_pages_cover_all_keys() {
        let kv = Arc::new(MemoryKv::with_defaults());
        for id in 1..=25 {
            kv.json_set(&format!("item:3:{id}"), &json!({ "id": id }))
                .await
                .unwrap();
        }
        kv.json_set("other:1", &json!(0)).await.unwrap();

        let scanner = Scanner::probe(kv.clone(), "item:3:*").await.unwrap();
        let keys = scanner.scan_all("item:3:*", 10).await.unwrap();
        assert_eq!(keys.len(), 25);
        assert!(keys.iter().all(|k| k.starts_with("item:3:")));
    }

    #[tokio::test]
    async fn test_scan_object_shape_probe() {
        let kv = Arc::new(MemoryKv::new(MemoryKvConfig {
            scan_shape: ScanShape::Object,
            ..MemoryKvConfig::default()
        }));
        kv.json_set("item:3:1", &json!({})).await.unwrap();

        let scanner = Scanner::probe(kv.clone(), "item:3:*").await.unwrap();
        assert_eq!(scanner.shape(), ScanShape::Object);
        let keys = scanner.scan_all("item:3:*", 10).await.unwrap();
        assert_eq!(keys, vec!["item:3:1"]);
    }

    #[tokio::test]
    async fn test_pipeline_unsupported() {
        let kv = MemoryKv::new(MemoryKvConfig {
            pipeline_support: false,
            ..MemoryKvConfig::default()
        });
        assert!(!kv.supports_pipeline());
        assert!(matches!(
            kv.pipeline(vec![]).await,
            Err(KvError::UnsupportedCapability(_))
        ));
    }

    #[tokio::test]
    async fn test_pipeline_executes_batch() {
        let kv = MemoryKv::with_defaults();
        let replies = kv
            .pipeline(vec![
                KvCommand::JsonSet {
                    key: "item:3:1".to_string(),
                    value: json!({"id": 1}),
                },
                KvCommand::Expire {
                    key: "item:3:1".to_string(),
                    ttl_secs: 60,
                },
            ])
            .await
            .unwrap();
        assert_eq!(replies, vec![KvReply::Ok, KvReply::Ok]);
        assert_eq!(kv.ttl("item:3:1").await.unwrap(), Some(60));
    }
}
