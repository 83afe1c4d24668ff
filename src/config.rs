//! Engine configuration.
//!
//! Tunables for the synchronization engine: discovery paging, the tombstone
//! grace window and the member-event deduplication window. All values have
//! production defaults; tests shrink the windows to keep runs fast.

use std::time::Duration;

/// Default discovery page size.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Default grace window during which a closed room id suppresses re-insertion.
pub const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(120);

/// Default window during which a duplicate kick/ban delivery is ignored.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(5);

/// Configuration for a [`RoomEngine`](crate::engine::RoomEngine).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Number of rooms requested per discovery page.
    pub page_size: u32,
    /// Discovery radius in meters. `None` lets the server pick its default.
    pub default_radius_m: Option<f64>,
    /// How long a `room_closed` tombstone suppresses re-insertion.
    pub tombstone_ttl: Duration,
    /// Maximum number of tombstones tracked at once.
    pub tombstone_capacity: usize,
    /// How long a (room, user) kick/ban key is considered already seen.
    pub dedup_ttl: Duration,
    /// Maximum number of dedup keys tracked at once.
    pub dedup_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            default_radius_m: None,
            tombstone_ttl: DEFAULT_TOMBSTONE_TTL,
            tombstone_capacity: 256,
            dedup_ttl: DEFAULT_DEDUP_TTL,
            dedup_capacity: 512,
        }
    }
}
