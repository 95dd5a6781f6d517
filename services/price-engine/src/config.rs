//! Service configuration
//!
//! Plain config structs with defaults, overridable from the environment.
//! Every tunable the pipeline reads lives here so tests can construct
//! engines with tight timings.

use std::env;

/// Upstream marketplace API settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the marketplace API.
    pub base_url: String,
    /// API key appended to every request, if required by the upstream.
    pub api_key: Option<String>,
    /// Requests-per-minute budget. Kept strictly below the upstream's real
    /// limit as a safety margin.
    pub safe_rpm: u32,
    /// Total fetch attempts per item (first try + retries).
    pub fetch_attempts: u32,
    /// Initial retry backoff in milliseconds; doubles per attempt.
    pub backoff_initial_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.torn.com/v2".to_string(),
            api_key: None,
            safe_rpm: 50,
            fetch_attempts: 4,
            backoff_initial_ms: 1500,
        }
    }
}

/// Versioned price-cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Key prefix for item cache entries.
    pub prefix: String,
    /// Entry shape version. Bumping it makes all prior keys unreachable,
    /// which stands in for an explicit migration.
    pub struct_version: u32,
    /// Sliding expiration for cache entries, in seconds.
    pub ttl_secs: u64,
    /// Items per warm-up/repopulation chunk.
    pub chunk_size: usize,
    /// Batch-size hint passed to cursor scans.
    pub scan_batch: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "item".to_string(),
            struct_version: 3,
            ttl_secs: 24 * 3600,
            chunk_size: 200,
            scan_batch: 250,
        }
    }
}

/// Variation-log settings.
#[derive(Debug, Clone)]
pub struct VariationConfig {
    /// Key prefix for per-day observation lists.
    pub log_prefix: String,
    /// Retention TTL on each day's list, in seconds. Long enough for the
    /// aggregator to read the previous day, short enough to bound storage.
    pub retention_secs: u64,
}

impl Default for VariationConfig {
    fn default() -> Self {
        Self {
            log_prefix: "pricelog".to_string(),
            retention_secs: 72 * 3600,
        }
    }
}

/// Polling cycle settings.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Interval between cycle ticks, in milliseconds. A cycle that drains
    /// slower than this is allowed to overlap the next tick; the shared
    /// throttle keeps the outbound rate bounded either way.
    pub refresh_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self { refresh_ms: 60_000 }
    }
}

/// Daily aggregation settings.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Delay after UTC midnight before the run starts, in seconds.
    pub delay_after_midnight_secs: u64,
    /// Batch-size hint for the variation-log key scan.
    pub scan_batch: usize,
    /// Parse failures logged per run before going quiet.
    pub parse_error_log_cap: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            delay_after_midnight_secs: 60,
            scan_batch: 100,
            parse_error_log_cap: 3,
        }
    }
}

/// Live-transport settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the WebSocket endpoint.
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8090".to_string(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub variation: VariationConfig,
    pub cycle: CycleConfig,
    pub aggregator: AggregatorConfig,
    pub server: ServerConfig,
}

impl EngineConfig {
    /// Defaults overridden by environment variables where set.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = env::var("MARKET_API_BASE_URL") {
            cfg.api.base_url = url;
        }
        if let Ok(key) = env::var("MARKET_API_KEY") {
            cfg.api.api_key = Some(key);
        }
        if let Some(rpm) = parse_env("MARKET_SAFE_RPM") {
            cfg.api.safe_rpm = rpm;
        }
        if let Some(ms) = parse_env("REFRESH_MS") {
            cfg.cycle.refresh_ms = ms;
        }
        if let Ok(addr) = env::var("BIND_ADDR") {
            cfg.server.bind_addr = addr;
        }
        cfg
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
