//! Document store seam
//!
//! The document store owns the item catalog and the long-term daily-average
//! series. Its connection lifecycle is external; the engine consumes only
//! the query/update contract below. The in-memory implementation backs
//! tests and degraded single-process operation.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use types::errors::StoreError;
use types::ids::ItemId;
use types::item::{DailyAverage, Item};

/// Query/update contract over the Items collection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every item, sorted by id.
    async fn all_items(&self) -> Result<Vec<Item>, StoreError>;

    /// One item by id, `None` if absent.
    async fn find_item(&self, id: ItemId) -> Result<Option<Item>, StoreError>;

    /// Upsert an item's last known price. Sets the name too when the item
    /// is created here or has no name yet (names resolve lazily).
    async fn upsert_price(
        &self,
        id: ItemId,
        name: Option<String>,
        price: Option<i64>,
    ) -> Result<(), StoreError>;

    /// Record a daily average with set-insertion semantics: if the item
    /// already has an average for that date, nothing changes. Returns
    /// whether an entry was added. Upserts the item when absent.
    async fn add_daily_average(
        &self,
        id: ItemId,
        average: DailyAverage,
    ) -> Result<bool, StoreError>;

    /// Approximate document count; used to validate cache warm-up.
    async fn estimated_count(&self) -> Result<u64, StoreError>;

    /// Ids of items that already carry historical averages. Seeds the
    /// watch set at startup.
    async fn items_with_averages(&self) -> Result<Vec<ItemId>, StoreError>;
}

/// In-memory `DocumentStore` implementation.
pub struct MemoryStore {
    items: DashMap<ItemId, Item>,
    /// Flip to make every call fail. Test hook for degraded-store paths.
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Seed with a fixed catalog.
    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let store = Self::new();
        for item in items {
            store.items.insert(item.id, item);
        }
        store
    }

    /// Make every subsequent call fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked down".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn all_items(&self) -> Result<Vec<Item>, StoreError> {
        self.check_available()?;
        let mut items: Vec<Item> = self.items.iter().map(|e| e.value().clone()).collect();
        items.sort_by_key(|item| item.id);
        Ok(items)
    }

    async fn find_item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        self.check_available()?;
        Ok(self.items.get(&id).map(|e| e.value().clone()))
    }

    async fn upsert_price(
        &self,
        id: ItemId,
        name: Option<String>,
        price: Option<i64>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut entry = self
            .items
            .entry(id)
            .or_insert_with(|| Item::minimal(id, name.clone().unwrap_or_default(), price));
        let item = entry.value_mut();
        item.price = price;
        if item.name.is_empty() {
            if let Some(name) = name {
                item.name = name;
            }
        }
        Ok(())
    }

    async fn add_daily_average(
        &self,
        id: ItemId,
        average: DailyAverage,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut entry = self
            .items
            .entry(id)
            .or_insert_with(|| Item::minimal(id, String::new(), None));
        Ok(entry.value_mut().add_daily_average(average))
    }

    async fn estimated_count(&self) -> Result<u64, StoreError> {
        self.check_available()?;
        Ok(self.items.len() as u64)
    }

    async fn items_with_averages(&self) -> Result<Vec<ItemId>, StoreError> {
        self.check_available()?;
        let mut ids: Vec<ItemId> = self
            .items
            .iter()
            .filter(|e| !e.value().daily_price_averages.is_empty())
            .map(|e| *e.key())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::day::DayKey;

    fn catalog() -> MemoryStore {
        MemoryStore::with_items([
            Item::minimal(ItemId::new(1), "Flower", Some(120)),
            Item::minimal(ItemId::new(2), "Plushie", Some(95)),
        ])
    }

    #[tokio::test]
    async fn test_all_items_sorted_by_id() {
        let store = MemoryStore::with_items([
            Item::minimal(ItemId::new(9), "Late", None),
            Item::minimal(ItemId::new(3), "Early", None),
        ]);
        let items = store.all_items().await.unwrap();
        assert_eq!(items[0].id, ItemId::new(3));
        assert_eq!(items[1].id, ItemId::new(9));
    }

    #[tokio::test]
    async fn test_upsert_price_updates_existing() {
        let store = catalog();
        store
            .upsert_price(ItemId::new(1), None, Some(130))
            .await
            .unwrap();
        let item = store.find_item(ItemId::new(1)).await.unwrap().unwrap();
        assert_eq!(item.price, Some(130));
        assert_eq!(item.name, "Flower");
    }

    #[tokio::test]
    async fn test_upsert_price_creates_missing_item() {
        let store = catalog();
        store
            .upsert_price(ItemId::new(7), Some("New Thing".to_string()), Some(40))
            .await
            .unwrap();
        let item = store.find_item(ItemId::new(7)).await.unwrap().unwrap();
        assert_eq!(item.name, "New Thing");
        assert_eq!(item.price, Some(40));
    }

    #[tokio::test]
    async fn test_add_daily_average_set_semantics() {
        let store = catalog();
        let avg = DailyAverage {
            date: DayKey::new("20260806"),
            avg: 110,
        };
        assert!(store
            .add_daily_average(ItemId::new(1), avg.clone())
            .await
            .unwrap());
        // Second insert for the same day is a no-op.
        assert!(!store
            .add_daily_average(
                ItemId::new(1),
                DailyAverage {
                    date: DayKey::new("20260806"),
                    avg: 999,
                }
            )
            .await
            .unwrap());
        let item = store.find_item(ItemId::new(1)).await.unwrap().unwrap();
        assert_eq!(item.daily_price_averages, vec![avg]);
    }

    #[tokio::test]
    async fn test_items_with_averages_seeds_watch_set() {
        let store = catalog();
        store
            .add_daily_average(
                ItemId::new(2),
                DailyAverage {
                    date: DayKey::new("20260806"),
                    avg: 90,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            store.items_with_averages().await.unwrap(),
            vec![ItemId::new(2)]
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_calls() {
        let store = catalog();
        store.set_unavailable(true);
        assert!(store.all_items().await.is_err());
        assert!(store.find_item(ItemId::new(1)).await.is_err());
        store.set_unavailable(false);
        assert!(store.all_items().await.is_ok());
    }
}
