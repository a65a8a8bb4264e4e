//! Error types for the relay core.

use crate::domain::ConnectionId;
use thiserror::Error;

/// Transient failure querying the reading store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("store returned unexpected status {0}")]
    Status(u16),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The id cannot be expressed as a url path segment (`.` or `..`).
    #[error("sensor id {0:?} cannot be addressed over http")]
    Unaddressable(String),
}

/// The push target is no longer reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection {0} is gone")]
pub struct ConnectionGone(pub ConnectionId);

/// Errors returned by gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Empty or whitespace-only sensor identifier.
    #[error("invalid subscription: sensor id must not be empty")]
    InvalidSubscription,

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error(transparent)]
    Gone(#[from] ConnectionGone),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
