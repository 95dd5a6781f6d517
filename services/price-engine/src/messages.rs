//! Live-connection wire messages
//!
//! JSON frames exchanged with live consumers, tagged by a `type` field.
//! Field names follow the established wire contract (camelCase), so the
//! serde renames here are load-bearing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use types::market::Listing;

/// Messages accepted from a live connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum Inbound {
    /// Start watching an item.
    #[serde(rename = "watch")]
    Watch {
        #[serde(rename = "itemId")]
        item_id: u32,
    },
    /// Stop watching an item.
    #[serde(rename = "unwatch")]
    Unwatch {
        #[serde(rename = "itemId")]
        item_id: u32,
    },
    /// Refresh one item's price now. With `price` set, the value is taken
    /// as authoritative; otherwise a live fetch runs through the throttle.
    #[serde(rename = "updatePrice")]
    UpdatePrice {
        id: u32,
        #[serde(default)]
        price: Option<i64>,
    },
}

impl Inbound {
    /// Parse a raw text frame; `None` for anything off-contract.
    pub fn parse(frame: &str) -> Option<Self> {
        serde_json::from_str(frame).ok()
    }
}

/// Messages pushed to live connections.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Outbound {
    #[serde(rename = "welcome")]
    Welcome { time: DateTime<Utc> },

    /// Current watch-set snapshot, sent on connect.
    #[serde(rename = "watchList")]
    WatchList { items: Vec<u32> },

    #[serde(rename = "watchAck")]
    WatchAck {
        #[serde(rename = "itemId")]
        item_id: u32,
        /// Resulting watch-set size.
        total: usize,
    },

    #[serde(rename = "unwatchAck")]
    UnwatchAck {
        #[serde(rename = "itemId")]
        item_id: u32,
        total: usize,
    },

    /// A watched item's minimum price changed.
    #[serde(rename = "priceUpdate")]
    PriceUpdate {
        time: DateTime<Utc>,
        #[serde(rename = "itemId")]
        item_id: u32,
        #[serde(rename = "itemName")]
        item_name: Option<String>,
        /// New minimum price; null means no active listings.
        #[serde(rename = "minBazaar")]
        min_bazaar: Option<i64>,
        /// The single cheapest listing, when one exists.
        listings: Vec<Listing>,
    },
}

impl Outbound {
    /// Serialize to a text frame.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
