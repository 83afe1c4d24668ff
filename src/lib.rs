//! Client-side room state synchronization engine.
//!
//! Rooms in this app are ephemeral, geographically scoped chat spaces. The
//! engine keeps one device's picture of them consistent while three sources
//! race each other: paginated REST fetches, the realtime event stream and
//! the user's own optimistic join/leave taps.
//!
//! The pieces:
//!
//! - [`store::RoomStore`] — the single source of truth: a keyed room map
//!   plus the membership, discovery, in-flight, and tombstone sets.
//! - [`engine::RoomEngine`] — the reconciliation layer and the only writer.
//!   Screens call it for views and mutations; the host's transport pump
//!   feeds it parsed events.
//! - [`views::Projector`] — memoized derived views (map, list, sidebar).
//! - [`api::RoomApi`], [`transport::RoomTransport`],
//!   [`handler::RoomEventHandler`] — the adapter seams the host implements.
//!
//! Everything is in-memory and per-session; nothing persists across a
//! restart.

pub mod api;
pub mod config;
pub mod engine;
pub mod events;
pub mod expiring;
pub mod handler;
pub mod room;
pub mod store;
pub mod transport;
pub mod views;

pub use api::{ApiError, RoomApi, RoomPage};
pub use config::EngineConfig;
pub use engine::{JoinError, LeaveError, RoomEngine};
pub use events::{EventError, MemberEvent, RealtimeEvent};
pub use handler::RoomEventHandler;
pub use room::{GeoPoint, Room, RoomId, RoomPatch, RoomSnapshot, RoomStatus, UserId};
pub use store::{DiscoveryCursor, RoomStore};
pub use transport::{RoomTransport, TransportError};
pub use views::SidebarSplit;
