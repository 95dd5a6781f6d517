//! Change detection and live broadcast
//!
//! Tracks the last minimum price broadcast per item and fans price-update
//! events out to every registered live connection that wants them. The
//! state is process-local and starts empty, so the first observation after
//! a restart always counts as a change — one catch-up broadcast per watched
//! item, by contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use types::ids::ItemId;
use types::market::MarketSnapshot;

use crate::messages::Outbound;
use crate::metrics::EngineMetrics;

/// Unique live-connection identifier.
pub type ConnectionId = u64;

struct Connection {
    sender: mpsc::UnboundedSender<Outbound>,
    /// Whether this connection receives price updates.
    price_updates: bool,
}

/// Connection registry plus per-item broadcast state.
pub struct Broadcaster {
    connections: DashMap<ConnectionId, Connection>,
    next_id: AtomicU64,
    /// Last broadcast minimum per item; `Some(None)` in the map means the
    /// last broadcast reported an empty market.
    last_broadcast: Mutex<HashMap<ItemId, Option<i64>>>,
    metrics: Arc<EngineMetrics>,
}

impl Broadcaster {
    pub fn new(metrics: Arc<EngineMetrics>) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            last_broadcast: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Register a live connection. Price updates are on by default; the
    /// transport can opt a connection out later.
    pub fn register(&self, sender: mpsc::UnboundedSender<Outbound>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(
            id,
            Connection {
                sender,
                price_updates: true,
            },
        );
        debug!(connection_id = id, total = self.connections.len(), "connection registered");
        id
    }

    /// Toggle price-update delivery for one connection.
    pub fn set_price_subscription(&self, id: ConnectionId, enabled: bool) {
        if let Some(mut conn) = self.connections.get_mut(&id) {
            conn.price_updates = enabled;
        }
    }

    /// Remove a connection.
    pub fn disconnect(&self, id: ConnectionId) {
        self.connections.remove(&id);
        debug!(connection_id = id, total = self.connections.len(), "connection removed");
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Compare a newly observed minimum against the last broadcast value
    /// and record it. Returns true exactly when the value changed — the
    /// null⇄value transitions count, repeats do not. A previously unseen
    /// item always counts as changed.
    pub fn detect_change(&self, item: ItemId, observed: Option<i64>) -> bool {
        let mut state = self.last_broadcast.lock().expect("broadcast state lock");
        match state.get(&item) {
            Some(last) if *last == observed => false,
            _ => {
                state.insert(item, observed);
                true
            }
        }
    }

    /// Last value recorded for an item, if any observation was recorded.
    pub fn last_value(&self, item: ItemId) -> Option<Option<i64>> {
        self.last_broadcast
            .lock()
            .expect("broadcast state lock")
            .get(&item)
            .copied()
    }

    /// Send one message to one connection. Returns false if delivery
    /// failed, in which case the connection is dropped from the registry.
    pub fn send_to(&self, id: ConnectionId, message: Outbound) -> bool {
        let delivered = match self.connections.get(&id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        };
        if !delivered {
            self.metrics.record_broadcast_failure();
            self.connections.remove(&id);
        }
        delivered
    }

    /// Deliver a price update to every subscribed connection.
    ///
    /// Failures are isolated per connection: a dead consumer is dropped and
    /// counted, and delivery to the rest continues.
    pub fn broadcast_price_update(
        &self,
        time: DateTime<Utc>,
        item: ItemId,
        item_name: Option<String>,
        snapshot: &MarketSnapshot,
    ) {
        let message = Outbound::PriceUpdate {
            time,
            item_id: item.as_u32(),
            item_name,
            min_bazaar: snapshot.min_price,
            listings: snapshot.cheapest().copied().into_iter().collect(),
        };

        let mut dead = Vec::new();
        for entry in self.connections.iter() {
            if !entry.value().price_updates {
                continue;
            }
            if entry.value().sender.send(message.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.metrics.record_broadcast_failure();
            self.connections.remove(&id);
        }
        self.metrics.record_broadcast();
    }
}
