//! Price Engine Service
//!
//! Polls the upstream marketplace for live listings on a watched set of
//! items and produces:
//! - A per-item versioned price cache with self-healing warm-up
//! - Price-change broadcasts to subscribed live connections
//! - A per-day variation log of raw price observations
//! - Idempotent per-day average aggregation into the document store
//!
//! # Architecture
//!
//! ```text
//!  WatchSet ──► Cycle Loop ──► ThrottledQueue ──► ListingsFetcher
//!                  │                                    │
//!                  ◄────────── MarketSnapshot ──────────┘
//!                  │
//!          ┌───────┴────────┬───────────────┐
//!          ▼                ▼               ▼
//!     PriceCache      VariationLog     Broadcaster
//!          │                │
//!          ▼                ▼
//!     KV store ◄─── DailyAggregator ───► Document store
//! ```
//!
//! All external fetches pass through one `ThrottledQueue`, which enforces a
//! hard ceiling on outbound request rate. Everything else proceeds
//! concurrently without centralized locking.

pub mod aggregate;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod cycle;
pub mod docstore;
pub mod fetcher;
pub mod kv;
pub mod messages;
pub mod metrics;
pub mod throttle;
pub mod variation;
pub mod watch;
pub mod ws;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
