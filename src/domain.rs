use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// opaque sensor identifier (e.g., "smoke-kitchen-01")
///
/// cheap to clone: the broadcaster hands the same id to every subscriber
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SensorId(Arc<str>);

impl SensorId {
    /// build a sensor id from the raw string, kept verbatim.
    /// returns None for empty or whitespace-only input.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(Arc::from(raw)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// identifier assigned by the gateway when a connection is accepted.
/// monotonic, never reused for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// latest known value for a sensor
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
}

impl Reading {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

// ==============================================================================
// wire messages
// ==============================================================================

/// message sent from client to server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// subscribe to one sensor; replaces any previous subscription
    Subscribe { sensor_id: String },
    /// drop the current subscription
    Unsubscribe,
    Ping,
}

/// message sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// latest reading for the subscribed sensor
    Reading { sensor_id: SensorId, value: f64 },
    /// advisory notice (no data, fetch failure, bad request)
    Error { message: String },
    Subscribed { sensor_id: SensorId },
    Unsubscribed,
    Pong,
}

impl ServerMessage {
    pub fn reading(sensor_id: SensorId, reading: Reading) -> Self {
        Self::Reading {
            sensor_id,
            value: reading.value,
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn no_data(sensor_id: &SensorId) -> Self {
        Self::notice(format!("No data found for sensorId: {}", sensor_id))
    }

    pub fn fetch_failed() -> Self {
        Self::notice("An error occurred while fetching the sensor reading.")
    }
}
