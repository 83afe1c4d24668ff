//! Realtime transport adapter contract.
//!
//! The engine only drives per-room subscriptions. Event delivery runs the
//! other way: the host's transport pump validates raw frames with
//! [`RealtimeEvent::parse`](crate::events::RealtimeEvent::parse) and feeds
//! them to [`RoomEngine::handle_event`](crate::engine::RoomEngine::handle_event).
//! Reconnects are the transport's problem; the host is expected to call
//! [`RoomEngine::resync`](crate::engine::RoomEngine::resync) when the
//! connection comes back.

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by the realtime transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,
    #[error("subscription failed: {0}")]
    Subscription(String),
}

/// Per-room subscription control over the realtime connection.
///
/// Both operations must be idempotent: the engine may subscribe after an
/// optimistic join and again when the server's `user_joined` echo arrives.
#[async_trait]
pub trait RoomTransport: Send + Sync {
    /// Start receiving events for the given room.
    async fn subscribe(&self, room_id: &str) -> Result<(), TransportError>;

    /// Stop receiving events for the given room.
    async fn unsubscribe(&self, room_id: &str) -> Result<(), TransportError>;
}
