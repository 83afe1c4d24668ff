//! Realtime event payloads and boundary validation.
//!
//! The websocket layer delivers `(event name, JSON payload)` pairs. This
//! module turns them into the [`RealtimeEvent`] sum type at the adapter
//! boundary, so the reconciliation layer never inspects untyped JSON.
//! Unknown event names and malformed payloads are rejected here.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::room::{RoomId, RoomPatch, RoomSnapshot, UserId};

/// Wire names of the realtime events consumed by the engine.
pub mod event_names {
    pub const ROOM_CREATED: &str = "room_created";
    pub const ROOM_UPDATED: &str = "room_updated";
    pub const ROOM_CLOSED: &str = "room_closed";
    pub const PARTICIPANT_COUNT: &str = "participant_count";
    pub const USER_JOINED: &str = "user_joined";
    pub const USER_LEFT: &str = "user_left";
    pub const USER_KICKED: &str = "user_kicked";
    pub const USER_BANNED: &str = "user_banned";

    /// All event names the engine subscribes to.
    pub const ALL: [&str; 8] = [
        ROOM_CREATED,
        ROOM_UPDATED,
        ROOM_CLOSED,
        PARTICIPANT_COUNT,
        USER_JOINED,
        USER_LEFT,
        USER_KICKED,
        USER_BANNED,
    ];
}

/// Errors raised while validating an inbound event at the boundary.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("unknown event name: {0}")]
    UnknownEvent(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// A membership event about one user in one room.
///
/// `participant_count` is an optional enrichment; kick events in particular
/// never carry it, which is why the engine re-fetches the room afterwards.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberEvent {
    pub room_id: RoomId,
    pub user_id: UserId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub participant_count: Option<u32>,
}

/// A validated realtime event, one variant per wire event name.
#[derive(Clone, Debug)]
pub enum RealtimeEvent {
    RoomCreated {
        room: RoomSnapshot,
        creator_id: UserId,
    },
    RoomUpdated {
        room_id: RoomId,
        patch: RoomPatch,
    },
    RoomClosed {
        room_id: RoomId,
    },
    ParticipantCount {
        room_id: RoomId,
        count: u32,
    },
    UserJoined(MemberEvent),
    UserLeft(MemberEvent),
    UserKicked(MemberEvent),
    UserBanned(MemberEvent),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomCreatedPayload {
    room: RoomSnapshot,
    creator_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomUpdatedPayload {
    room_id: RoomId,
    #[serde(flatten)]
    patch: RoomPatch,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomIdPayload {
    room_id: RoomId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantCountPayload {
    room_id: RoomId,
    count: u32,
}

impl RealtimeEvent {
    /// Validate a raw `(event name, payload)` pair into a typed event.
    pub fn parse(name: &str, payload: &Value) -> Result<Self, EventError> {
        use event_names::*;

        let event = match name {
            ROOM_CREATED => {
                let p: RoomCreatedPayload = serde_json::from_value(payload.clone())?;
                Self::RoomCreated {
                    room: p.room,
                    creator_id: p.creator_id,
                }
            }
            ROOM_UPDATED => {
                let p: RoomUpdatedPayload = serde_json::from_value(payload.clone())?;
                Self::RoomUpdated {
                    room_id: p.room_id,
                    patch: p.patch,
                }
            }
            ROOM_CLOSED => {
                let p: RoomIdPayload = serde_json::from_value(payload.clone())?;
                Self::RoomClosed { room_id: p.room_id }
            }
            PARTICIPANT_COUNT => {
                let p: ParticipantCountPayload = serde_json::from_value(payload.clone())?;
                Self::ParticipantCount {
                    room_id: p.room_id,
                    count: p.count,
                }
            }
            USER_JOINED => Self::UserJoined(serde_json::from_value(payload.clone())?),
            USER_LEFT => Self::UserLeft(serde_json::from_value(payload.clone())?),
            USER_KICKED => Self::UserKicked(serde_json::from_value(payload.clone())?),
            USER_BANNED => Self::UserBanned(serde_json::from_value(payload.clone())?),
            other => return Err(EventError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }

    /// The room this event is about.
    pub fn room_id(&self) -> &str {
        match self {
            Self::RoomCreated { room, .. } => &room.id,
            Self::RoomUpdated { room_id, .. }
            | Self::RoomClosed { room_id }
            | Self::ParticipantCount { room_id, .. } => room_id,
            Self::UserJoined(ev)
            | Self::UserLeft(ev)
            | Self::UserKicked(ev)
            | Self::UserBanned(ev) => &ev.room_id,
        }
    }
}
