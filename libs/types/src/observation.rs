//! Raw price observations for the variation log
//!
//! Each watched item accumulates one observation per detected price change,
//! appended to a per-day list in the cache store. The wire shape is kept
//! short (`t`/`p`) because a busy item can log hundreds of entries per day.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One observed price at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceObservation {
    /// Observation instant, ISO 8601 UTC
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    /// Observed minimum listing price
    #[serde(rename = "p")]
    pub price: i64,
}

impl PriceObservation {
    pub fn new(timestamp: DateTime<Utc>, price: i64) -> Self {
        Self { timestamp, price }
    }

    /// Serialize to the stored list-entry string.
    pub fn to_entry(&self) -> String {
        format!(
            r#"{{"t":"{}","p":{}}}"#,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.price
        )
    }

    /// Parse a stored list entry, tolerating unknown fields.
    ///
    /// Returns `None` for anything that is not a JSON object with an ISO
    /// timestamp and a finite integral price — the aggregator skips such
    /// entries individually.
    pub fn parse_entry(entry: &str) -> Option<Self> {
        serde_json::from_str(entry).ok()
    }
}
