//! Lifecycle events.
//!
//! Peer connect/break/reconnect and inbound messages are multicast to every
//! subscriber over a broadcast channel, replacing ad hoc callback fields
//! with an explicit subscription surface.

use tokio::sync::broadcast;

use crate::message::Message;

/// Default broadcast capacity; slow subscribers that fall further behind
/// observe a `Lagged` error, not a stalled transport.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Lifecycle and message events for an endpoint.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A peer session became connected (outbound connect or inbound
    /// registration).
    Connected {
        /// Logical peer name.
        peer: String,
    },
    /// A business message arrived from a peer.
    Message {
        /// Logical peer name.
        peer: String,
        /// The received message.
        message: Message,
    },
    /// A peer session broke.
    Broken {
        /// Logical peer name.
        peer: String,
    },
    /// A broken session reconnected; fired only after the new transport is
    /// in place.
    Reconnected {
        /// Logical peer name.
        peer: String,
    },
    /// Reconnection gave up; the session is terminally broken.
    ReconnectFailed {
        /// Logical peer name.
        peer: String,
        /// Attempts actually made before giving up.
        attempts: u32,
    },
}

/// Multicast event channel shared by an endpoint and its sessions.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PeerEvent>,
}

impl EventBus {
    /// Create a bus with the given buffered capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: PeerEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
