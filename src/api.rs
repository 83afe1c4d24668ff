//! Discovery/fetch adapter contract.
//!
//! The engine talks to the REST backend through [`RoomApi`]. The error
//! taxonomy matters more than the transport details: "already joined" is a
//! conflict the engine collapses to success, and a ban must stay
//! distinguishable from a generic failure so the UI can present a specific
//! message.

use async_trait::async_trait;
use thiserror::Error;

use crate::room::RoomSnapshot;

/// Errors returned by the fetch adapter.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The user is already a member of the room. Treated as success by the
    /// join flow.
    #[error("already joined")]
    AlreadyJoined,
    /// The user is banned from the room.
    #[error("banned from room")]
    Banned,
    /// The room is at capacity.
    #[error("room is full")]
    RoomFull,
    /// The room no longer exists.
    #[error("room not found")]
    NotFound,
    /// Transient network or server failure.
    #[error("network error: {0}")]
    Network(#[from] anyhow::Error),
}

/// One page of a discovery query.
#[derive(Debug, Default)]
pub struct RoomPage {
    pub rooms: Vec<RoomSnapshot>,
    pub has_next: bool,
}

/// Paginated discovery and room mutation endpoints.
#[async_trait]
pub trait RoomApi: Send + Sync {
    /// Fetch one page of rooms near the given position. `radius_m = None`
    /// uses the server default.
    async fn nearby_rooms(
        &self,
        lat: f64,
        lng: f64,
        page: u32,
        page_size: u32,
        radius_m: Option<f64>,
    ) -> Result<RoomPage, ApiError>;

    /// Fetch every room the current user is a member of.
    async fn my_rooms(&self) -> Result<Vec<RoomSnapshot>, ApiError>;

    /// Fetch a single room by id.
    async fn room(&self, id: &str) -> Result<RoomSnapshot, ApiError>;

    /// Join a room from the given position.
    async fn join_room(&self, id: &str, lat: f64, lng: f64) -> Result<(), ApiError>;

    /// Leave a room.
    async fn leave_room(&self, id: &str) -> Result<(), ApiError>;
}
