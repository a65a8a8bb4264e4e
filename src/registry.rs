//! ==============================================================================
//! registry.rs - subscription registry
//! ==============================================================================
//!
//! purpose:
//!     tracks which sensor every connection wants updates for.
//!     one sensor per connection; a new subscribe overwrites the old one.
//!
//! relationships:
//!     - written by: gateway.rs (subscribe, unsubscribe, disconnect)
//!     - read by: broadcaster.rs (grouped snapshot once per cycle)
//!     - pruned by: broadcaster.rs (connections whose push came back gone)
//!
//! locking:
//!     a single rwlock around a plain hashmap. writers hold it for one map
//!     mutation, the broadcaster holds the read side while it copies the map
//!     into the grouped view. no i/o ever happens under the lock, so the
//!     snapshot is linearizable and handlers are never stuck behind a store
//!     query.
//!
//! ==============================================================================

use crate::domain::{ConnectionId, SensorId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// point-in-time view: sensor -> connections subscribed to it
pub type SensorGroups = HashMap<SensorId, Vec<ConnectionId>>;

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: RwLock<HashMap<ConnectionId, SensorId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// insert or overwrite the subscription for `conn`.
    /// returns the sensor it was previously subscribed to, if any.
    pub fn set(&self, conn: ConnectionId, sensor: SensorId) -> Option<SensorId> {
        self.subscriptions.write().insert(conn, sensor)
    }

    /// drop the subscription for `conn`; no-op when there is none
    pub fn remove(&self, conn: ConnectionId) -> Option<SensorId> {
        self.subscriptions.write().remove(&conn)
    }

    /// group every current subscription by sensor.
    ///
    /// the whole view is built under one read guard, so it reflects exactly
    /// the state at the instant the guard was taken.
    pub fn snapshot_grouped_by_sensor(&self) -> SensorGroups {
        let subscriptions = self.subscriptions.read();
        let mut groups: SensorGroups = HashMap::new();
        for (conn, sensor) in subscriptions.iter() {
            groups.entry(sensor.clone()).or_default().push(*conn);
        }
        groups
    }

    pub fn sensor_for(&self, conn: ConnectionId) -> Option<SensorId> {
        self.subscriptions.read().get(&conn).cloned()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    /// number of distinct sensors with at least one subscriber
    pub fn distinct_sensors(&self) -> usize {
        let subscriptions = self.subscriptions.read();
        let mut sensors: Vec<&SensorId> = subscriptions.values().collect();
        sensors.sort_unstable();
        sensors.dedup();
        sensors.len()
    }
}
