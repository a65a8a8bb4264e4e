//! sensor-relay: pushes the latest sensor readings to subscribed clients.
//!
//! ```text
//! ReadingStore ──(one lookup per distinct sensor)──> Broadcaster
//!                                                       │ push
//! websocket <──> server.rs <──> Gateway <──> SubscriptionRegistry
//! ```
//!
//! Every connection subscribes to at most one sensor. The broadcaster groups
//! the registry by sensor each cycle, so N clients watching the same sensor
//! cost one store query, not N.

pub mod broadcaster;
pub mod config;
pub mod connection;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod server;
pub mod store;

pub use broadcaster::{Broadcaster, BroadcasterSettings, CycleReport};
pub use config::RelayConfig;
pub use connection::{ChannelConnection, Connection};
pub use domain::{ClientMessage, ConnectionId, Reading, SensorId, ServerMessage};
pub use error::{ConnectionGone, GatewayError, StoreError};
pub use gateway::{Gateway, GatewaySettings};
pub use registry::{SensorGroups, SubscriptionRegistry};
pub use server::create_router;
pub use store::{HttpStore, MemoryStore, ReadingStore};
