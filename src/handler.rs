//! Output events from the engine to the host application.

use async_trait::async_trait;

/// Receives the engine's output signals.
///
/// Implementations must not block: handlers are awaited inside the event
/// dispatch path. Navigation, alerts and re-rendering are the host's job —
/// the engine only reports what happened.
#[async_trait]
pub trait RoomEventHandler: Send + Sync {
    /// The current user was kicked from a room. The host should navigate
    /// away from the room screen if it is showing.
    async fn on_kicked(&self, room_id: &str);

    /// The current user was banned from a room. Distinct from a kick so the
    /// host can show a tailored message.
    async fn on_banned(&self, room_id: &str);

    /// The store changed; derived views may need re-reading. `revision` is
    /// monotonically increasing.
    async fn on_rooms_changed(&self, revision: u64);
}
