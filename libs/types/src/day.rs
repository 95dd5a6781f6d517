//! UTC calendar-day keys
//!
//! Variation logs and daily averages are bucketed by UTC calendar day,
//! identified by a compact `YYYYMMDD` key. The aggregator always operates on
//! the previous completed day, so day arithmetic lives here next to the key
//! type.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A UTC calendar day in compact `YYYYMMDD` form
///
/// Format: exactly eight ASCII digits (e.g., "20260807"). Used as the middle
/// segment of variation-log keys and as the `date` field of daily averages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(String);

impl DayKey {
    /// Create a DayKey from a string
    ///
    /// # Panics
    /// Panics if the string is not eight ASCII digits
    pub fn new(key: impl Into<String>) -> Self {
        let s = key.into();
        assert!(
            Self::is_valid(&s),
            "DayKey must be eight ASCII digits (YYYYMMDD)"
        );
        Self(s)
    }

    /// Try to create a DayKey, returning None if invalid
    pub fn try_new(key: impl Into<String>) -> Option<Self> {
        let s = key.into();
        if Self::is_valid(&s) {
            Some(Self(s))
        } else {
            None
        }
    }

    /// The day containing the given instant, in UTC
    pub fn from_utc(at: DateTime<Utc>) -> Self {
        Self::from_date(at.date_naive())
    }

    /// The day preceding the one containing the given instant, in UTC
    ///
    /// This is the aggregator's window: the most recent *completed* day.
    pub fn previous_utc_day(at: DateTime<Utc>) -> Self {
        Self::from_date(at.date_naive() - Duration::days(1))
    }

    /// Build from a calendar date
    pub fn from_date(date: NaiveDate) -> Self {
        Self(format!(
            "{:04}{:02}{:02}",
            date.year(),
            date.month(),
            date.day()
        ))
    }

    /// Get the key string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(s: &str) -> bool {
        s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit())
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
