//! Push-capable handle to one client.

use crate::domain::{ConnectionId, ServerMessage};
use crate::error::ConnectionGone;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

pub trait Connection: Send + Sync {
    /// Queue `message` for delivery. Never blocks.
    fn push(&self, message: ServerMessage) -> Result<(), ConnectionGone>;

    /// Stop accepting pushes. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Connection backed by a bounded mpsc channel.
///
/// The transport drains the receiving half with a single writer task, so
/// messages reach the client in the order they were pushed.
pub struct ChannelConnection {
    id: ConnectionId,
    tx: mpsc::Sender<ServerMessage>,
    closed: AtomicBool,
}

impl ChannelConnection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Create a connection and the receiver its writer task should drain.
    pub fn pair(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Connection for ChannelConnection {
    fn push(&self, message: ServerMessage) -> Result<(), ConnectionGone> {
        if self.is_closed() {
            return Err(ConnectionGone(self.id));
        }
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            // Slow client: drop this update, the next cycle carries a fresh one.
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("{} send buffer full, dropping message", self.id);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.closed.store(true, Ordering::Release);
                Err(ConnectionGone(self.id))
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}
