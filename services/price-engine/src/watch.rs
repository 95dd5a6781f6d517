//! Watched item set
//!
//! The mutable set of item ids the cycle loop polls. Owned explicitly and
//! injected wherever it is read, so tests can run isolated instances.
//! Iteration order is insertion order; each cycle works from a snapshot, so
//! mutations during a cycle affect only the next one.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::info;
use types::ids::ItemId;

use crate::docstore::DocumentStore;

#[derive(Debug, Default)]
struct Inner {
    order: Vec<ItemId>,
    members: HashSet<ItemId>,
}

/// Insertion-ordered set of watched item ids.
#[derive(Debug, Default)]
pub struct WatchSet {
    inner: Mutex<Inner>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item. Returns false if it was already watched.
    pub fn add(&self, id: ItemId) -> bool {
        let mut inner = self.inner.lock().expect("watch set lock");
        if !inner.members.insert(id) {
            return false;
        }
        inner.order.push(id);
        true
    }

    /// Remove an item. Returns false if it was not watched.
    pub fn remove(&self, id: ItemId) -> bool {
        let mut inner = self.inner.lock().expect("watch set lock");
        if !inner.members.remove(&id) {
            return false;
        }
        inner.order.retain(|member| *member != id);
        true
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.inner.lock().expect("watch set lock").members.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("watch set lock").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed copy of the current membership, in insertion order.
    pub fn snapshot(&self) -> Vec<ItemId> {
        self.inner.lock().expect("watch set lock").order.clone()
    }

    /// Seed from the document store: every item that already carries
    /// historical averages is worth keeping fresh.
    pub async fn seed_from_store(&self, store: &dyn DocumentStore) -> usize {
        let seeded = match store.items_with_averages().await {
            Ok(ids) => {
                let mut added = 0;
                for id in ids {
                    if self.add(id) {
                        added += 1;
                    }
                }
                added
            }
            Err(err) => {
                tracing::warn!(error = %err, "watch-set seeding failed; starting empty");
                0
            }
        };
        info!(seeded, total = self.len(), "watch set seeded");
        seeded
    }
}
