//! Broadcast fan-out.
//!
//! Outbound messages are Arc-wrapped with lazily computed serialized
//! bytes, so sending the same broadcast to N connections clones a
//! pointer instead of a message. The [`Fanout`] trait is the seam the
//! transport layer implements; the in-process adapter below is the
//! default, and a shared pub/sub adapter can replace it when multiple
//! instances must reach each other's connections.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;

use crate::protocol::{PlayerId, ServerEnvelope};

/// An outbound envelope shared across recipients.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    inner: Arc<ServerEnvelope>,
    /// JSON encoding, computed at most once per broadcast
    serialized: Arc<OnceLock<Bytes>>,
}

impl OutboundMessage {
    pub fn new(envelope: ServerEnvelope) -> Self {
        Self {
            inner: Arc::new(envelope),
            serialized: Arc::new(OnceLock::new()),
        }
    }

    pub fn envelope(&self) -> &ServerEnvelope {
        &self.inner
    }

    /// Serialized JSON bytes, shared across all recipients.
    pub fn json_bytes(&self) -> Bytes {
        self.serialized
            .get_or_init(|| match serde_json::to_vec(&*self.inner) {
                Ok(bytes) => Bytes::from(bytes),
                Err(error) => {
                    // Serialization of our own types cannot fail in
                    // practice; degrade to an empty frame if it does
                    tracing::error!(%error, "failed to serialize outbound envelope");
                    Bytes::new()
                }
            })
            .clone()
    }
}

impl From<ServerEnvelope> for OutboundMessage {
    fn from(envelope: ServerEnvelope) -> Self {
        Self::new(envelope)
    }
}

/// Delivery seam between the engine and the transport.
pub trait Fanout: Send + Sync {
    /// Deliver to one connection. Unknown recipients are dropped
    /// silently; the ACK tracker notices the gap.
    fn send_to(&self, player_id: PlayerId, message: OutboundMessage);

    /// Deliver to a set of connections.
    fn broadcast(&self, recipients: &[PlayerId], message: OutboundMessage) {
        for player_id in recipients {
            self.send_to(*player_id, message.clone());
        }
    }
}

/// In-process fan-out: a registry of per-connection channels.
#[derive(Default)]
pub struct LocalFanout {
    connections: DashMap<PlayerId, mpsc::UnboundedSender<OutboundMessage>>,
}

impl LocalFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound channel, replacing any earlier
    /// registration for the same player (newest connection wins).
    pub fn register(&self, player_id: PlayerId) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(player_id, tx);
        rx
    }

    pub fn unregister(&self, player_id: PlayerId) {
        self.connections.remove(&player_id);
    }

    pub fn is_connected(&self, player_id: PlayerId) -> bool {
        self.connections.contains_key(&player_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Fanout for LocalFanout {
    fn send_to(&self, player_id: PlayerId, message: OutboundMessage) {
        if let Some(sender) = self.connections.get(&player_id) {
            if sender.send(message).is_err() {
                // Receiver dropped; connection cleanup will unregister
                tracing::trace!(%player_id, "dropped message to closed connection");
            }
        }
    }
}
