//! ==============================================================================
//! gateway.rs - connection events to registry operations
//! ==============================================================================
//!
//! purpose:
//!     owns the table of live connections and turns inbound events
//!     (connect, subscribe, unsubscribe, disconnect) into registry updates.
//!     outbound pushes from the broadcaster are routed through here so a
//!     connection id always maps onto the right client.
//!
//! relationships:
//!     - used by: server.rs (one call per websocket event)
//!     - used by: broadcaster.rs (push + prune)
//!     - writes: registry.rs
//!     - reads: store.rs (only the eager lookup right after a subscribe)
//!
//! ==============================================================================

use crate::connection::{ChannelConnection, Connection};
use crate::domain::{ConnectionId, SensorId, ServerMessage};
use crate::error::{ConnectionGone, GatewayError, Result};
use crate::registry::SubscriptionRegistry;
use crate::store::ReadingStore;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// per-connection outbound buffer
    pub channel_capacity: usize,
    /// look the sensor up right after subscribe and answer immediately
    pub eager_lookup: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            eager_lookup: true,
        }
    }
}

pub struct Gateway {
    registry: Arc<SubscriptionRegistry>,
    connections: DashMap<ConnectionId, Arc<dyn Connection>>,
    store: Arc<dyn ReadingStore>,
    next_id: AtomicU64,
    settings: GatewaySettings,
}

impl Gateway {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        store: Arc<dyn ReadingStore>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            registry,
            connections: DashMap::new(),
            store,
            next_id: AtomicU64::new(1),
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_connected(&self, conn: ConnectionId) -> bool {
        self.connections.contains_key(&conn)
    }

    // ==========================================================================
    // inbound events
    // ==========================================================================

    /// accept a connection built by `make` and return its fresh id.
    /// no subscription exists until the client asks for one.
    pub fn on_connect<F>(&self, make: F) -> ConnectionId
    where
        F: FnOnce(ConnectionId) -> Arc<dyn Connection>,
    {
        let id = self.allocate_id();
        self.track(id, make(id));
        id
    }

    /// accept a channel-backed connection; the caller drains the receiver
    pub fn open_channel(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let id = self.allocate_id();
        let (connection, rx) = ChannelConnection::pair(id, self.settings.channel_capacity);
        self.track(id, Arc::new(connection));
        (id, rx)
    }

    fn allocate_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn track(&self, id: ConnectionId, connection: Arc<dyn Connection>) {
        self.connections.insert(id, connection);
        info!("{} connected ({} live)", id, self.connections.len());
    }

    /// subscribe `conn` to `raw_sensor`, replacing any previous subscription.
    ///
    /// an empty sensor id is rejected with an advisory notice and leaves the
    /// registry untouched. when eager lookup is on, the current reading (or a
    /// "no data" notice) is sent right away; that answer never changes the
    /// subscription.
    pub async fn on_subscribe(&self, conn: ConnectionId, raw_sensor: &str) -> Result<SensorId> {
        let connection = self
            .connection(conn)
            .ok_or(GatewayError::UnknownConnection(conn))?;

        let Some(sensor) = SensorId::parse(raw_sensor) else {
            debug!("{} sent an empty sensor id", conn);
            self.deliver(conn, &connection, ServerMessage::notice("sensorId must not be empty"))?;
            return Err(GatewayError::InvalidSubscription);
        };

        // confirm first so no cycle update can overtake the confirmation
        self.deliver(conn, &connection, ServerMessage::Subscribed { sensor_id: sensor.clone() })?;
        if let Some(previous) = self.registry.set(conn, sensor.clone()) {
            debug!("{} moved from {} to {}", conn, previous, sensor);
        } else {
            debug!("{} subscribed to {}", conn, sensor);
        }

        if self.settings.eager_lookup {
            let answer = match self.store.latest(&sensor).await {
                Ok(Some(reading)) => ServerMessage::reading(sensor.clone(), reading),
                Ok(None) => ServerMessage::no_data(&sensor),
                Err(e) => {
                    warn!("lookup for {} failed: {}", sensor, e);
                    ServerMessage::fetch_failed()
                }
            };
            self.deliver(conn, &connection, answer)?;
        }

        Ok(sensor)
    }

    /// drop the subscription but keep the connection open
    pub fn on_unsubscribe(&self, conn: ConnectionId) -> Result<()> {
        if let Some(sensor) = self.registry.remove(conn) {
            debug!("{} unsubscribed from {}", conn, sensor);
        }
        let connection = self
            .connection(conn)
            .ok_or(GatewayError::UnknownConnection(conn))?;
        self.deliver(conn, &connection, ServerMessage::Unsubscribed)
    }

    /// forget the connection and its subscription. idempotent.
    pub fn on_disconnect(&self, conn: ConnectionId) {
        if self.forget(conn) {
            info!("{} disconnected ({} live)", conn, self.connections.len());
        }
    }

    // ==========================================================================
    // outbound
    // ==========================================================================

    /// deliver `message` to `conn`; Err(ConnectionGone) if it no longer exists
    pub fn push(&self, conn: ConnectionId, message: ServerMessage) -> std::result::Result<(), ConnectionGone> {
        match self.connection(conn) {
            Some(connection) => connection.push(message),
            None => Err(ConnectionGone(conn)),
        }
    }

    /// remove a connection whose push came back gone
    pub fn prune(&self, conn: ConnectionId) {
        if self.forget(conn) {
            info!("{} pruned after failed push", conn);
        }
    }

    fn connection(&self, conn: ConnectionId) -> Option<Arc<dyn Connection>> {
        self.connections.get(&conn).map(|entry| entry.value().clone())
    }

    fn deliver(&self, conn: ConnectionId, connection: &Arc<dyn Connection>, message: ServerMessage) -> Result<()> {
        connection.push(message).map_err(|gone| {
            self.prune(conn);
            GatewayError::from(gone)
        })
    }

    fn forget(&self, conn: ConnectionId) -> bool {
        self.registry.remove(conn);
        match self.connections.remove(&conn) {
            Some((_, connection)) => {
                connection.close();
                true
            }
            None => false,
        }
    }
}
