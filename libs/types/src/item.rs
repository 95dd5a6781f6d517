//! Item documents and daily price averages
//!
//! The document store owns `Item`; the key-value cache holds a denormalized
//! copy of the same shape. Field names follow the stored JSON documents
//! (camelCase for the averages series, `type` for the item kind).

use crate::day::DayKey;
use crate::ids::ItemId;
use serde::{Deserialize, Serialize};

/// One computed mean price for one item on one UTC calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAverage {
    /// Day the average covers, `YYYYMMDD`
    pub date: DayKey,
    /// Rounded mean of that day's observed prices
    pub avg: i64,
}

/// A tradable catalog item
///
/// `price` is the last known minimum listing price; `None` means no active
/// listings were seen. `daily_price_averages` is ordered, append-only, and
/// unique by day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub price: Option<i64>,
    /// Free-form item category from the upstream catalog
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "dailyPriceAverages", default)]
    pub daily_price_averages: Vec<DailyAverage>,
}

impl Item {
    /// A minimal item carrying only the fields required for cache reads.
    ///
    /// Used when the document store is unavailable and an entry still has to
    /// be written from live fetch data.
    pub fn minimal(id: ItemId, name: impl Into<String>, price: Option<i64>) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            kind: None,
            image: None,
            description: None,
            daily_price_averages: Vec::new(),
        }
    }

    /// Whether an average has already been recorded for the given day.
    pub fn has_average_for(&self, date: &DayKey) -> bool {
        self.daily_price_averages.iter().any(|a| &a.date == date)
    }

    /// Append a daily average with set-insertion semantics.
    ///
    /// Returns `true` if the entry was added, `false` if an average for that
    /// day already existed (the existing entry is left untouched).
    pub fn add_daily_average(&mut self, average: DailyAverage) -> bool {
        if self.has_average_for(&average.date) {
            return false;
        }
        self.daily_price_averages.push(average);
        true
    }
}

/// Check that a raw cache document carries every required field.
///
/// Operates on the JSON value rather than the typed struct: a missing field
/// in the stored document is exactly what marks the cache stale. `price` may
/// be null (no active listings); `id` and `name` must be non-null.
pub fn has_required_cache_fields(value: &serde_json::Value) -> bool {
    let present = |field: &str| value.get(field).is_some();
    let non_null = |field: &str| value.get(field).map(|v| !v.is_null()).unwrap_or(false);
    non_null("id") && non_null("name") && present("price")
}
