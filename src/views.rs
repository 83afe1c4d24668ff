//! Derived, memoized views over the room store.
//!
//! The projector only reads. Base views (discovered, my-rooms) are
//! recomputed when the store revision moves and cached otherwise. The
//! expiry-sensitive splits compare timestamps at call time on top of the
//! cached base, so a room sliding past its expiry shows up on the next read
//! without any timer pushing it.

use chrono::{DateTime, Utc};

use crate::room::Room;
use crate::store::RoomStore;

/// My-rooms list partitioned for the sidebar.
#[derive(Clone, Debug, Default)]
pub struct SidebarSplit {
    /// Joined rooms that are still running.
    pub active: Vec<Room>,
    /// Joined rooms whose expiry has passed.
    pub expired: Vec<Room>,
}

/// Memoized view projector.
#[derive(Default)]
pub struct Projector {
    cached_revision: Option<u64>,
    discovered: Vec<Room>,
    my_rooms: Vec<Room>,
}

impl Projector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the base views if the store has changed since last read.
    fn refresh(&mut self, store: &RoomStore) {
        if self.cached_revision == Some(store.revision()) {
            return;
        }

        self.discovered = store
            .discovered_ids()
            .iter()
            .filter_map(|id| store.room(id))
            .map(|room| {
                let mut room = room.clone();
                room.has_joined = store.is_joined(&room.id);
                room
            })
            .collect();
        self.discovered.sort_by(|a, b| a.id.cmp(&b.id));

        self.my_rooms = store
            .joined_ids()
            .iter()
            .filter_map(|id| store.room(id))
            .map(|room| {
                let mut room = room.clone();
                room.has_joined = true;
                room
            })
            .collect();
        self.my_rooms
            .sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        self.cached_revision = Some(store.revision());
    }

    /// Every discovered room, membership flag overlaid.
    pub fn discovered(&mut self, store: &RoomStore) -> Vec<Room> {
        self.refresh(store);
        self.discovered.clone()
    }

    /// Discovered rooms that are not closed and not yet expired.
    pub fn active(&mut self, store: &RoomStore, now: DateTime<Utc>) -> Vec<Room> {
        self.refresh(store);
        self.discovered
            .iter()
            .filter(|room| room.is_active(now))
            .cloned()
            .collect()
    }

    /// Every joined room, newest first.
    pub fn my_rooms(&mut self, store: &RoomStore) -> Vec<Room> {
        self.refresh(store);
        self.my_rooms.clone()
    }

    /// My-rooms partitioned into active and expired, closed rooms excluded.
    /// The partition is evaluated against `now` on every call.
    pub fn sidebar(&mut self, store: &RoomStore, now: DateTime<Utc>) -> SidebarSplit {
        self.refresh(store);
        let mut split = SidebarSplit::default();
        for room in &self.my_rooms {
            if room.status == crate::room::RoomStatus::Closed {
                continue;
            }
            if room.is_expired(now) {
                split.expired.push(room.clone());
            } else {
                split.active.push(room.clone());
            }
        }
        split
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::room::{RoomSnapshot, RoomStatus};
    use chrono::Duration;

    fn snapshot(id: &str, created_offset_min: i64, expires_offset_min: i64) -> RoomSnapshot {
        let now = Utc::now();
        RoomSnapshot {
            id: id.to_string(),
            title: Some(id.to_string()),
            created_at: Some(now + Duration::minutes(created_offset_min)),
            expires_at: Some(now + Duration::minutes(expires_offset_min)),
            ..RoomSnapshot::default()
        }
    }

    #[test]
    fn discovered_overlays_membership() {
        let mut store = RoomStore::new(&EngineConfig::default());
        store.upsert_room(&snapshot("a", 0, 60));
        store.upsert_room(&snapshot("b", 0, 60));
        store.set_discovered("a", true);
        store.set_discovered("b", true);
        store.set_membership("a", true);

        let mut projector = Projector::new();
        let views = projector.discovered(&store);
        assert_eq!(views.len(), 2);
        assert!(views.iter().find(|r| r.id == "a").unwrap().has_joined);
        assert!(!views.iter().find(|r| r.id == "b").unwrap().has_joined);
    }

    #[test]
    fn active_drops_expired_and_closed() {
        let mut store = RoomStore::new(&EngineConfig::default());
        store.upsert_room(&snapshot("live", 0, 60));
        store.upsert_room(&snapshot("dead", 0, -5));
        let mut closed = snapshot("closed", 0, 60);
        closed.status = Some(RoomStatus::Closed);
        store.upsert_room(&closed);
        for id in ["live", "dead", "closed"] {
            store.set_discovered(id, true);
        }

        let mut projector = Projector::new();
        let active = projector.active(&store, Utc::now());
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "live");
    }

    #[test]
    fn my_rooms_sorted_newest_first() {
        let mut store = RoomStore::new(&EngineConfig::default());
        store.upsert_room(&snapshot("old", -30, 60));
        store.upsert_room(&snapshot("new", -1, 60));
        store.set_membership("old", true);
        store.set_membership("new", true);

        let mut projector = Projector::new();
        let rooms = projector.my_rooms(&store);
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].id, "new");
        assert!(rooms.iter().all(|r| r.has_joined));
    }

    #[test]
    fn sidebar_partitions_by_expiry_at_call_time() {
        let mut store = RoomStore::new(&EngineConfig::default());
        store.upsert_room(&snapshot("live", 0, 60));
        store.upsert_room(&snapshot("gone", 0, -5));
        store.set_membership("live", true);
        store.set_membership("gone", true);

        let mut projector = Projector::new();
        let split = projector.sidebar(&store, Utc::now());
        assert_eq!(split.active.len(), 1);
        assert_eq!(split.active[0].id, "live");
        assert_eq!(split.expired.len(), 1);
        assert_eq!(split.expired[0].id, "gone");
    }

    #[test]
    fn cache_reuses_until_revision_moves() {
        let mut store = RoomStore::new(&EngineConfig::default());
        store.upsert_room(&snapshot("a", 0, 60));
        store.set_discovered("a", true);

        let mut projector = Projector::new();
        assert_eq!(projector.discovered(&store).len(), 1);

        store.upsert_room(&snapshot("b", 0, 60));
        store.set_discovered("b", true);
        assert_eq!(projector.discovered(&store).len(), 2);
    }
}
