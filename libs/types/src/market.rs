//! Marketplace listing shapes
//!
//! A listing is one sell offer on the upstream marketplace. The wire field
//! for quantity is `amount`; the serde rename keeps cached and broadcast
//! payloads byte-compatible with the upstream shape.

use serde::{Deserialize, Serialize};

/// One live sell offer for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Asking price in whole currency units
    pub price: i64,
    /// Number of units offered at this price
    #[serde(rename = "amount")]
    pub quantity: i64,
}

/// Result of fetching an item's live listings
///
/// `min_price` is `None` when the item has no usable listings — either the
/// market is empty or the fetch soft-failed after exhausting retries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MarketSnapshot {
    pub min_price: Option<i64>,
    pub listings: Vec<Listing>,
}

impl MarketSnapshot {
    /// Build a snapshot from raw listings, filtering malformed entries.
    ///
    /// A listing is usable when `price > 0`. Listings whose quantity failed
    /// to parse as a finite number never reach this point (the fetcher drops
    /// them while decoding), so the price check is the only filter applied
    /// here.
    pub fn from_listings(raw: Vec<Listing>) -> Self {
        let listings: Vec<Listing> = raw.into_iter().filter(|l| l.price > 0).collect();
        let min_price = listings.iter().map(|l| l.price).min();
        Self { min_price, listings }
    }

    /// The empty snapshot used for soft failures.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// The single cheapest listing, if any.
    pub fn cheapest(&self) -> Option<&Listing> {
        self.min_price
            .and_then(|min| self.listings.iter().find(|l| l.price == min))
    }
}
