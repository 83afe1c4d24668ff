//! The room store — single source of truth for room state.
//!
//! One keyed map of rooms plus the membership, discovery and in-flight sets,
//! the tombstone set and the discovery pagination cursor. Three producers
//! funnel into it (fetch results, realtime events, optimistic mutations) but
//! only through the engine; nothing else mutates it.
//!
//! Every mutator is synchronous and bumps a revision counter, so a mutation
//! is one atomic state transition from the caller's perspective. The engine
//! wraps the store in `Arc<RwLock<…>>` and the projector memoizes on the
//! revision.
//!
//! # Invariants
//!
//! - A room's `has_joined` flag mirrors the membership set; snapshots never
//!   write it directly.
//! - A tombstoned id is silently dropped from every insertion path until the
//!   tombstone expires.
//! - An id cannot enter `joining` while it is joined, already joining, or
//!   currently leaving.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::debug;

use crate::config::EngineConfig;
use crate::expiring::ExpiringSet;
use crate::room::{Room, RoomId, RoomPatch, RoomSnapshot, UserId};

/// Discovery pagination state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryCursor {
    /// Index of the last fetched page.
    pub page: u32,
    /// Whether the server reported more pages after the last fetch.
    pub has_more: bool,
}

/// The in-memory room store.
pub struct RoomStore {
    rooms: HashMap<RoomId, Room>,
    joined: HashSet<RoomId>,
    discovered: HashSet<RoomId>,
    joining: HashSet<RoomId>,
    leaving: HashSet<RoomId>,
    tombstones: ExpiringSet<RoomId>,
    member_events_seen: ExpiringSet<(RoomId, UserId)>,
    cursor: DiscoveryCursor,
    loading_more: bool,
    selected: Option<RoomId>,
    revision: u64,
}

impl RoomStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            rooms: HashMap::new(),
            joined: HashSet::new(),
            discovered: HashSet::new(),
            joining: HashSet::new(),
            leaving: HashSet::new(),
            tombstones: ExpiringSet::new(config.tombstone_capacity, config.tombstone_ttl),
            member_events_seen: ExpiringSet::new(config.dedup_capacity, config.dedup_ttl),
            cursor: DiscoveryCursor::default(),
            loading_more: false,
            selected: None,
            revision: 0,
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Monotonic change counter, bumped by every effective mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // ─────────────────────────── Room map ───────────────────────────

    /// Merge a snapshot into the store by id, inserting if absent.
    ///
    /// Present fields win, omitted fields are retained. The membership flag
    /// is re-derived from the membership set, never taken from the snapshot.
    /// Returns `false` (and changes nothing) for empty or tombstoned ids.
    pub fn upsert_room(&mut self, snapshot: &RoomSnapshot) -> bool {
        if snapshot.id.is_empty() {
            return false;
        }
        if self.tombstones.contains(&snapshot.id) {
            debug!(room_id = %snapshot.id, "dropping write for tombstoned room");
            return false;
        }

        match self.rooms.get_mut(&snapshot.id) {
            Some(room) => {
                if snapshot.merge_into(room) {
                    self.touch();
                }
            }
            None => {
                let mut room = snapshot.clone().into_room(Utc::now());
                room.has_joined = self.joined.contains(&room.id);
                self.rooms.insert(room.id.clone(), room);
                self.touch();
            }
        }
        true
    }

    /// Merge the given fields into an existing room. No-op on unknown ids.
    /// Returns whether a change occurred.
    pub fn update_room(&mut self, id: &str, patch: &RoomPatch) -> bool {
        let Some(room) = self.rooms.get_mut(id) else {
            return false;
        };
        let changed = patch.apply_to(room);
        if changed {
            self.touch();
        }
        changed
    }

    /// Delete a room from the map and every set in one transition.
    pub fn remove_room(&mut self, id: &str) {
        let mut changed = self.rooms.remove(id).is_some();
        changed |= self.joined.remove(id);
        changed |= self.discovered.remove(id);
        changed |= self.joining.remove(id);
        changed |= self.leaving.remove(id);
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
            changed = true;
        }
        if changed {
            self.touch();
        }
    }

    pub fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn contains_room(&self, id: &str) -> bool {
        self.rooms.contains_key(id)
    }

    // ─────────────────────────── Membership & discovery ───────────────────────────

    /// Toggle membership for one room, keeping the room's flag in sync.
    pub fn set_membership(&mut self, id: &str, joined: bool) -> bool {
        let changed = if joined {
            self.joined.insert(id.to_string())
        } else {
            self.joined.remove(id)
        };
        if let Some(room) = self.rooms.get_mut(id) {
            room.has_joined = joined;
        }
        if changed {
            self.touch();
        }
        changed
    }

    /// Replace the membership set wholesale — the "my rooms" resync.
    pub fn replace_membership(&mut self, ids: HashSet<RoomId>) {
        if self.joined == ids {
            return;
        }
        self.joined = ids;
        for (id, room) in &mut self.rooms {
            room.has_joined = self.joined.contains(id);
        }
        self.touch();
    }

    pub fn set_discovered(&mut self, id: &str, discovered: bool) -> bool {
        let changed = if discovered {
            self.discovered.insert(id.to_string())
        } else {
            self.discovered.remove(id)
        };
        if changed {
            self.touch();
        }
        changed
    }

    /// Replace the discovery set wholesale — the page-0 fetch reconciliation.
    pub fn replace_discovered(&mut self, ids: HashSet<RoomId>) {
        if self.discovered == ids {
            return;
        }
        self.discovered = ids;
        self.touch();
    }

    pub fn is_joined(&self, id: &str) -> bool {
        self.joined.contains(id)
    }

    pub fn is_discovered(&self, id: &str) -> bool {
        self.discovered.contains(id)
    }

    pub fn joined_ids(&self) -> &HashSet<RoomId> {
        &self.joined
    }

    pub fn discovered_ids(&self) -> &HashSet<RoomId> {
        &self.discovered
    }

    // ─────────────────────────── In-flight guards ───────────────────────────

    /// Claim the join guard for a room. Fails without state change when the
    /// room is already joining, already joined, or currently leaving.
    pub fn begin_join(&mut self, id: &str) -> bool {
        if self.joining.contains(id) || self.joined.contains(id) || self.leaving.contains(id) {
            return false;
        }
        self.joining.insert(id.to_string());
        self.touch();
        true
    }

    pub fn end_join(&mut self, id: &str) {
        if self.joining.remove(id) {
            self.touch();
        }
    }

    /// Claim the leave guard for a room. Fails when a leave is already in
    /// flight.
    pub fn begin_leave(&mut self, id: &str) -> bool {
        if self.leaving.contains(id) {
            return false;
        }
        self.leaving.insert(id.to_string());
        self.touch();
        true
    }

    pub fn end_leave(&mut self, id: &str) {
        if self.leaving.remove(id) {
            self.touch();
        }
    }

    pub fn is_joining(&self, id: &str) -> bool {
        self.joining.contains(id)
    }

    pub fn is_leaving(&self, id: &str) -> bool {
        self.leaving.contains(id)
    }

    // ─────────────────────────── Tombstones & dedup ───────────────────────────

    /// Tombstone a closed room id for the configured grace window. While the
    /// tombstone lives, every insertion path drops writes for the id.
    pub fn tombstone(&mut self, id: &str) {
        self.tombstones.insert(id.to_string());
        self.touch();
    }

    pub fn is_tombstoned(&mut self, id: &str) -> bool {
        self.tombstones.contains(&id.to_string())
    }

    /// Record a (room, user) kick/ban sighting. Returns `true` when this is
    /// the first delivery within the dedup window; redeliveries get `false`.
    pub fn first_member_event(&mut self, room_id: &str, user_id: &str) -> bool {
        self.member_events_seen
            .insert_if_fresh((room_id.to_string(), user_id.to_string()))
    }

    // ─────────────────────────── Pagination & selection ───────────────────────────

    pub fn cursor(&self) -> DiscoveryCursor {
        self.cursor
    }

    /// Reset the cursor after a fresh page-0 fetch.
    pub fn reset_cursor(&mut self, has_more: bool) {
        self.cursor = DiscoveryCursor { page: 0, has_more };
        self.touch();
    }

    /// Advance the cursor after a successful load-more fetch.
    pub fn advance_cursor(&mut self, has_more: bool) {
        self.cursor.page += 1;
        self.cursor.has_more = has_more;
        self.touch();
    }

    /// Claim the load-more guard. Fails when a load-more is already in
    /// flight or the server reported no further pages.
    pub fn begin_load_more(&mut self) -> bool {
        if self.loading_more || !self.cursor.has_more {
            return false;
        }
        self.loading_more = true;
        true
    }

    pub fn end_load_more(&mut self) {
        self.loading_more = false;
    }

    pub fn select_room(&mut self, id: Option<RoomId>) {
        if self.selected != id {
            self.selected = id;
            self.touch();
        }
    }

    pub fn selected_room(&self) -> Option<&str> {
        self.selected.as_deref()
    }
}
