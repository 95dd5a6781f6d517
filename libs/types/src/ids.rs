//! Unique identifier types for catalog entities
//!
//! Item identifiers are assigned by the upstream marketplace catalog and are
//! always positive integers. They are stable across restarts, so they embed
//! directly into cache keys and variation-log keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a tradable item
///
/// Wraps the upstream catalog's positive integer id. Serializes transparently
/// as a bare number so cached documents match the upstream wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(u32);

impl ItemId {
    /// Create a new ItemId from a raw catalog id
    ///
    /// # Panics
    /// Panics if the id is zero (catalog ids start at 1)
    pub fn new(id: u32) -> Self {
        assert!(id > 0, "ItemId must be a positive integer");
        Self(id)
    }

    /// Try to create an ItemId, returning None if invalid
    pub fn try_new(id: u32) -> Option<Self> {
        if id > 0 {
            Some(Self(id))
        } else {
            None
        }
    }

    /// Get the raw id
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ItemId> for u32 {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

impl FromStr for ItemId {
    type Err = ParseItemIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u32 = s.parse().map_err(|_| ParseItemIdError(s.to_string()))?;
        ItemId::try_new(raw).ok_or_else(|| ParseItemIdError(s.to_string()))
    }
}

/// Error returned when a string does not parse into a valid ItemId
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid item id: {0:?}")]
pub struct ParseItemIdError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_creation() {
        let id = ItemId::new(5302);
        assert_eq!(id.as_u32(), 5302);
    }

    #[test]
    fn test_item_id_try_new() {
        assert!(ItemId::try_new(1).is_some());
        assert!(ItemId::try_new(0).is_none());
    }

    #[test]
    #[should_panic(expected = "ItemId must be a positive integer")]
    fn test_item_id_zero_panics() {
        ItemId::new(0);
    }

    #[test]
    fn test_item_id_serialization() {
        let id = ItemId::new(206);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "206");

        let deserialized: ItemId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_item_id_from_str() {
        let id: ItemId = "5302".parse().unwrap();
        assert_eq!(id, ItemId::new(5302));

        assert!("0".parse::<ItemId>().is_err());
        assert!("abc".parse::<ItemId>().is_err());
        assert!("-4".parse::<ItemId>().is_err());
    }

    #[test]
    fn test_item_id_ordering() {
        let mut ids = vec![ItemId::new(10), ItemId::new(2), ItemId::new(7)];
        ids.sort();
        assert_eq!(ids, vec![ItemId::new(2), ItemId::new(7), ItemId::new(10)]);
    }
}
