//! Key-value cache store seam
//!
//! The engine talks to its cache store through the `KvStore` trait: JSON
//! documents at a key, sliding expirations, cursor-based scans, append-only
//! lists, and optional pipelined batches. The store's connection lifecycle
//! is owned elsewhere; only the command contract lives here.
//!
//! Scan replies vary by backend version, so scanning goes through the
//! `Scanner` adapter in [`scan`], selected once at startup by probing.

pub mod memory;
pub mod scan;

pub use memory::{MemoryKv, MemoryKvConfig};
pub use scan::{ScanPage, ScanShape, Scanner};

use async_trait::async_trait;
use serde_json::Value;
use types::errors::KvError;

/// One command in a pipelined batch.
#[derive(Debug, Clone, PartialEq)]
pub enum KvCommand {
    /// Store a JSON document at a key.
    JsonSet { key: String, value: Value },
    /// Read the JSON document at a key.
    JsonGet { key: String },
    /// Set a sliding expiration on a key.
    Expire { key: String, ttl_secs: u64 },
    /// Read a list key in full.
    ListRange { key: String },
    /// Delete keys.
    Del { keys: Vec<String> },
}

/// Reply to one pipelined command.
#[derive(Debug, Clone, PartialEq)]
pub enum KvReply {
    /// Command succeeded with nothing to return.
    Ok,
    /// A JSON document, `None` if the key is absent.
    Json(Option<Value>),
    /// Full contents of a list key (empty if the key is absent).
    Entries(Vec<String>),
    /// Number of keys affected.
    Count(u64),
}

/// Command contract for the backing key-value cache.
///
/// All operations are fallible; callers decide per call site whether a
/// failure is skipped, counted, or escalated. Implementations must be safe
/// to share across tasks.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Probe for JSON-document command support.
    ///
    /// Checked once at warm-up. A store without JSON support degrades the
    /// engine to document-store-only reads.
    async fn supports_json(&self) -> bool;

    /// Whether pipelined batch execution is available.
    ///
    /// Callers must degrade to sequential calls when this is false.
    fn supports_pipeline(&self) -> bool;

    /// Store a JSON document at a key.
    async fn json_set(&self, key: &str, value: &Value) -> Result<(), KvError>;

    /// Read the JSON document at a key, `None` if absent.
    async fn json_get(&self, key: &str) -> Result<Option<Value>, KvError>;

    /// Set a sliding expiration on a key, in seconds.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), KvError>;

    /// Remaining TTL in seconds; `None` if the key has no expiration or
    /// does not exist.
    async fn ttl(&self, key: &str) -> Result<Option<u64>, KvError>;

    /// One cursor-scan step over keys matching a glob pattern.
    ///
    /// Returns the backend's raw reply; the shape differs across backend
    /// versions, so callers decode it through a [`Scanner`]. `count` is a
    /// batch-size hint, not a guarantee.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<Value, KvError>;

    /// Append entries to a list key, creating it if absent. Returns the
    /// list's new length.
    async fn rpush(&self, key: &str, entries: &[String]) -> Result<u64, KvError>;

    /// Read a list key in full (empty if the key is absent).
    async fn lrange_all(&self, key: &str) -> Result<Vec<String>, KvError>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, KvError>;

    /// Execute a batch of commands in one round trip.
    ///
    /// Errors with `UnsupportedCapability` when `supports_pipeline()` is
    /// false.
    async fn pipeline(&self, commands: Vec<KvCommand>) -> Result<Vec<KvReply>, KvError>;
}

/// Match a key against a glob pattern supporting `*` wildcards.
///
/// Covers the patterns the engine actually issues (`prefix:version:*`,
/// `prefix:day:*`); not a full glob implementation.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    fn inner(pat: &[u8], key: &[u8]) -> bool {
        match (pat.first(), key.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&pat[1..], key) || (!key.is_empty() && inner(pat, &key[1..]))
            }
            (Some(p), Some(k)) if p == k => inner(&pat[1..], &key[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match_prefix_wildcard() {
        assert!(glob_match("item:3:*", "item:3:5302"));
        assert!(glob_match("item:3:*", "item:3:"));
        assert!(!glob_match("item:3:*", "item:2:5302"));
        assert!(!glob_match("item:3:*", "pricelog:20260807:5302"));
    }

    #[test]
    fn test_glob_match_exact() {
        assert!(glob_match("item:3:42", "item:3:42"));
        assert!(!glob_match("item:3:42", "item:3:421"));
    }

    #[test]
    fn test_glob_match_inner_wildcard() {
        assert!(glob_match("pricelog:*:42", "pricelog:20260807:42"));
        assert!(!glob_match("pricelog:*:42", "pricelog:20260807:421"));
    }
}
