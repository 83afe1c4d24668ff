//! Room entity model.
//!
//! A [`Room`] is the store's canonical record for a single room. Fetch
//! responses and `room_created` events carry a [`RoomSnapshot`] — the same
//! shape with every field optional, because the discovery endpoint and the
//! "my rooms" endpoint disagree about which fields they include. Partial
//! realtime updates arrive as a [`RoomPatch`].
//!
//! The membership flag (`has_joined`) is *never* copied from a snapshot into
//! the stored room. The store derives it from its membership set; snapshots
//! only feed the membership reconciliation in the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned stable room identifier.
pub type RoomId = String;

/// Server-assigned user identifier.
pub type UserId = String;

/// Lifecycle status of a room.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    #[default]
    Active,
    Expiring,
    Expired,
    Closed,
}

/// A geographic position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// The canonical in-store record for a room.
#[derive(Clone, Debug, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub emoji: String,
    /// `None` for global rooms, which have no geographic restriction.
    pub position: Option<GeoPoint>,
    pub radius_m: Option<f64>,
    pub participant_count: u32,
    pub capacity: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: RoomStatus,
    /// Set at creation time, never cleared afterwards.
    pub is_creator: bool,
    /// Maintained by the store from its membership set.
    pub has_joined: bool,
}

impl Room {
    /// Whether the room's expiry timestamp is in the past.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the room is still temporally active: not closed, not expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status != RoomStatus::Closed && !self.is_expired(now)
    }
}

/// A partial room payload as delivered by fetch endpoints and
/// `room_created` events.
///
/// `joined` and `is_creator` are membership hints: the engine forwards them
/// to the membership set, the store ignores them when merging fields.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub id: RoomId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub position: Option<GeoPoint>,
    #[serde(default)]
    pub radius_m: Option<f64>,
    #[serde(default)]
    pub participant_count: Option<u32>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<RoomStatus>,
    #[serde(default)]
    pub joined: Option<bool>,
    #[serde(default)]
    pub is_creator: Option<bool>,
}

impl RoomSnapshot {
    /// Minimal snapshot carrying only an id, used in tests and optimistic
    /// inserts where nothing else is known yet.
    pub fn with_id(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    /// Materialize a full [`Room`] from this snapshot, defaulting absent
    /// fields. The membership flag starts false; the store overlays it.
    pub fn into_room(self, now: DateTime<Utc>) -> Room {
        Room {
            id: self.id,
            title: self.title.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            category: self.category.unwrap_or_default(),
            emoji: self.emoji.unwrap_or_default(),
            position: self.position,
            radius_m: self.radius_m,
            participant_count: self.participant_count.unwrap_or(0),
            capacity: self.capacity.unwrap_or(0),
            created_at: self.created_at.unwrap_or(now),
            expires_at: self.expires_at.unwrap_or(now),
            status: self.status.unwrap_or_default(),
            is_creator: self.is_creator.unwrap_or(false),
            has_joined: false,
        }
    }

    /// Shallow-merge this snapshot into an existing room: present fields
    /// win, omitted fields are retained. `joined` is deliberately not
    /// applied here; `is_creator` can only be raised, never cleared.
    pub fn merge_into(&self, room: &mut Room) -> bool {
        let mut changed = false;

        macro_rules! merge {
            ($field:ident) => {
                if let Some(v) = &self.$field {
                    if &room.$field != v {
                        room.$field = v.clone();
                        changed = true;
                    }
                }
            };
        }

        merge!(title);
        merge!(description);
        merge!(category);
        merge!(emoji);
        merge!(participant_count);
        merge!(capacity);
        merge!(created_at);
        merge!(expires_at);
        merge!(status);
        if self.position.is_some() && room.position != self.position {
            room.position = self.position;
            changed = true;
        }
        if self.radius_m.is_some() && room.radius_m != self.radius_m {
            room.radius_m = self.radius_m;
            changed = true;
        }
        if self.is_creator == Some(true) && !room.is_creator {
            room.is_creator = true;
            changed = true;
        }
        changed
    }
}

impl From<&Room> for RoomSnapshot {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id.clone(),
            title: Some(room.title.clone()),
            description: Some(room.description.clone()),
            category: Some(room.category.clone()),
            emoji: Some(room.emoji.clone()),
            position: room.position,
            radius_m: room.radius_m,
            participant_count: Some(room.participant_count),
            capacity: Some(room.capacity),
            created_at: Some(room.created_at),
            expires_at: Some(room.expires_at),
            status: Some(room.status),
            joined: None,
            is_creator: Some(room.is_creator),
        }
    }
}

/// A set of optional field updates for an existing room, as carried by
/// `room_updated` events.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub participant_count: Option<u32>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<RoomStatus>,
}

impl RoomPatch {
    /// A patch that only updates the participant count.
    pub fn participant_count(count: u32) -> Self {
        Self {
            participant_count: Some(count),
            ..Self::default()
        }
    }

    /// Apply the given fields to a room, reporting whether anything changed.
    pub fn apply_to(&self, room: &mut Room) -> bool {
        let mut changed = false;

        macro_rules! apply {
            ($field:ident) => {
                if let Some(v) = &self.$field {
                    if &room.$field != v {
                        room.$field = v.clone();
                        changed = true;
                    }
                }
            };
        }

        apply!(title);
        apply!(description);
        apply!(category);
        apply!(emoji);
        apply!(participant_count);
        apply!(capacity);
        apply!(expires_at);
        apply!(status);
        changed
    }
}
