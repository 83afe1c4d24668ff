//! The synchronization engine — reconciliation layer and UI surface.
//!
//! A [`RoomEngine`] reconciles three concurrent sources of truth into the
//! [`RoomStore`]: paginated fetch results, the realtime event stream and
//! locally-initiated optimistic mutations. Screens talk only to the engine:
//! derived views for reads, `join`/`leave` for writes, `handle_event` for
//! the transport pump.
//!
//! There is no locking beyond the store's `RwLock`; "concurrency" here is
//! the interleaving of independent async completions. The in-flight guard
//! sets and the tombstone set convert arbitrary interleavings into
//! last-writer-wins with specific suppression rules. All reconciliation
//! between await points is synchronous under a single write lock, so no
//! mutation is partially observable.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::api::{ApiError, RoomApi};
use crate::config::EngineConfig;
use crate::events::{MemberEvent, RealtimeEvent};
use crate::handler::RoomEventHandler;
use crate::room::{GeoPoint, Room, RoomId, RoomPatch, RoomSnapshot, RoomStatus, UserId};
use crate::store::{DiscoveryCursor, RoomStore};
use crate::transport::RoomTransport;
use crate::views::{Projector, SidebarSplit};

/// Failure modes of the optimistic join flow.
#[derive(Debug, Error)]
pub enum JoinError {
    /// A join or leave for this room is already in flight; no network call
    /// was made.
    #[error("join already in flight")]
    InFlight,
    /// The user is banned from the room. Kept distinct so the UI can show a
    /// specific message instead of a generic failure.
    #[error("banned from room")]
    Banned,
    /// Any other API failure; the optimistic membership was rolled back.
    #[error(transparent)]
    Api(ApiError),
}

/// Failure modes of the leave flow.
#[derive(Debug, Error)]
pub enum LeaveError {
    /// A leave or join for this room is already in flight.
    #[error("leave already in flight")]
    InFlight,
    /// The API call failed; local state is untouched and the room is still
    /// joined.
    #[error(transparent)]
    Api(ApiError),
}

/// The room state synchronization engine.
///
/// Constructed once per app session (at login) and torn down at logout;
/// state does not survive the instance. Tests construct isolated instances
/// with mock adapters.
pub struct RoomEngine<A, T, H> {
    api: Arc<A>,
    transport: Arc<T>,
    handler: Arc<H>,
    store: Arc<RwLock<RoomStore>>,
    projector: Mutex<Projector>,
    user_id: UserId,
    config: EngineConfig,
    last_position: Mutex<Option<GeoPoint>>,
}

impl<A, T, H> RoomEngine<A, T, H>
where
    A: RoomApi,
    T: RoomTransport,
    H: RoomEventHandler,
{
    pub fn new(
        user_id: impl Into<UserId>,
        api: Arc<A>,
        transport: Arc<T>,
        handler: Arc<H>,
        config: EngineConfig,
    ) -> Self {
        let store = RoomStore::new(&config);
        Self {
            api,
            transport,
            handler,
            store: Arc::new(RwLock::new(store)),
            projector: Mutex::new(Projector::new()),
            user_id: user_id.into(),
            config,
            last_position: Mutex::new(None),
        }
    }

    /// Notify the handler when the store revision moved past `before`.
    async fn notify_if_changed(&self, before: u64) {
        let after = self.store.read().await.revision();
        if after != before {
            self.handler.on_rooms_changed(after).await;
        }
    }

    async fn remember_position(&self, lat: f64, lng: f64) {
        *self.last_position.lock().await = Some(GeoPoint { lat, lng });
    }

    // ─────────────────────────── Fetch reconciliation ───────────────────────────

    /// Run a fresh page-0 discovery fetch and reconcile the result.
    ///
    /// The result set becomes authoritative for the discovery set, except
    /// that locally-known rooms which are still temporally active are
    /// preserved when they are currently discovered, joined, or selected —
    /// a just-created or just-joined room briefly missing from a
    /// radius-limited query must not vanish from the map.
    pub async fn refresh_discovery(&self, lat: f64, lng: f64) -> Result<(), ApiError> {
        let page = self
            .api
            .nearby_rooms(lat, lng, 0, self.config.page_size, self.config.default_radius_m)
            .await?;
        self.remember_position(lat, lng).await;

        let before;
        {
            let mut store = self.store.write().await;
            before = store.revision();
            apply_discovery_results(&mut store, &page.rooms, true);
            store.reset_cursor(page.has_next);
        }
        self.notify_if_changed(before).await;
        Ok(())
    }

    /// Fetch the next discovery page. Strictly additive: merge, never
    /// replace. Returns `Ok(false)` when the call was dropped because a
    /// load-more is already in flight or there are no further pages.
    pub async fn load_more(&self, lat: f64, lng: f64) -> Result<bool, ApiError> {
        let next_page = {
            let mut store = self.store.write().await;
            if !store.begin_load_more() {
                debug!("load-more dropped: in flight or no more pages");
                return Ok(false);
            }
            store.cursor().page + 1
        };

        let result = self
            .api
            .nearby_rooms(
                lat,
                lng,
                next_page,
                self.config.page_size,
                self.config.default_radius_m,
            )
            .await;
        self.remember_position(lat, lng).await;

        let before;
        let outcome = {
            let mut store = self.store.write().await;
            store.end_load_more();
            before = store.revision();
            match result {
                Ok(page) => {
                    apply_discovery_results(&mut store, &page.rooms, false);
                    store.advance_cursor(page.has_next);
                    Ok(true)
                }
                Err(err) => Err(err),
            }
        };
        self.notify_if_changed(before).await;
        outcome
    }

    /// Resync membership from the "my rooms" endpoint.
    ///
    /// Unlike the additive discovery merge this is a reset-to-truth: the
    /// membership set is replaced wholesale with the returned ids, closed
    /// rooms filtered out. Run at login and on demand.
    pub async fn refresh_my_rooms(&self) -> Result<(), ApiError> {
        let rooms = self.api.my_rooms().await?;

        let before;
        {
            let mut store = self.store.write().await;
            before = store.revision();
            let mut ids: HashSet<RoomId> = HashSet::new();
            for snap in &rooms {
                if snap.status == Some(RoomStatus::Closed) {
                    continue;
                }
                if !store.upsert_room(snap) {
                    continue;
                }
                ids.insert(snap.id.clone());
            }
            store.replace_membership(ids);
        }
        self.notify_if_changed(before).await;
        Ok(())
    }

    /// Full resync: membership first, then discovery. Intended for the host
    /// to call when the realtime transport reports a reconnect.
    pub async fn resync(&self, lat: f64, lng: f64) -> Result<(), ApiError> {
        self.refresh_my_rooms().await?;
        self.refresh_discovery(lat, lng).await
    }

    // ─────────────────────────── Optimistic mutations ───────────────────────────

    /// Join a room optimistically.
    ///
    /// Membership is set before the API call and rolled back on failure.
    /// "Already joined" conflicts collapse to success; a ban rolls back and
    /// surfaces as the distinguished [`JoinError::Banned`]. On success the
    /// room is re-fetched once for the authoritative participant count.
    pub async fn join(&self, room: &Room) -> Result<(), JoinError> {
        let id = room.id.clone();
        let before;
        {
            let mut store = self.store.write().await;
            before = store.revision();
            if store.is_leaving(&id) {
                return Err(JoinError::InFlight);
            }
            // Covers the optimistic window too: a second tap while the
            // first join is still in flight collapses to success.
            if store.is_joined(&id) {
                return Ok(());
            }
            if !store.begin_join(&id) {
                return Err(JoinError::InFlight);
            }
            store.upsert_room(&RoomSnapshot::from(room));
            store.set_membership(&id, true);
        }

        let remembered = *self.last_position.lock().await;
        let position = remembered
            .or(room.position)
            .unwrap_or(GeoPoint { lat: 0.0, lng: 0.0 });
        let result = self.api.join_room(&id, position.lat, position.lng).await;

        let outcome = match result {
            Ok(()) | Err(ApiError::AlreadyJoined) => Ok(()),
            Err(ApiError::Banned) => Err(JoinError::Banned),
            Err(err) => Err(JoinError::Api(err)),
        };

        {
            let mut store = self.store.write().await;
            // On success this re-asserts membership: a stale leave echo may
            // have cleared the optimistic flag while the call was in flight.
            store.set_membership(&id, outcome.is_ok());
            store.end_join(&id);
        }

        if outcome.is_ok() {
            if let Err(err) = self.transport.subscribe(&id).await {
                warn!(room_id = %id, error = %err, "subscribe after join failed");
            }
            // Skipping this refetch is a known source of stale counts.
            self.refresh_room(&id).await;
        }

        self.notify_if_changed(before).await;
        outcome
    }

    /// Leave a room.
    ///
    /// The API is called first; local state changes only on confirmed
    /// success. A failed leave leaving the user still joined is safer than
    /// an optimistic removal hiding a room they are still in, so there is
    /// no rollback path. Non-members get a no-op success. A leave while a
    /// join for the same room is still in flight is rejected, keeping the
    /// server from seeing join-then-leave with the local outcome decided by
    /// whichever call settles last.
    pub async fn leave(&self, id: &str) -> Result<(), LeaveError> {
        let before;
        {
            let mut store = self.store.write().await;
            before = store.revision();
            if store.is_joining(id) {
                return Err(LeaveError::InFlight);
            }
            if !store.is_joined(id) {
                return Ok(());
            }
            if !store.begin_leave(id) {
                return Err(LeaveError::InFlight);
            }
        }

        let result = self.api.leave_room(id).await;

        let outcome = {
            let mut store = self.store.write().await;
            store.end_leave(id);
            match result {
                Ok(()) => {
                    store.set_membership(id, false);
                    Ok(())
                }
                Err(err) => Err(LeaveError::Api(err)),
            }
        };

        if outcome.is_ok() {
            if let Err(err) = self.transport.unsubscribe(id).await {
                warn!(room_id = %id, error = %err, "unsubscribe after leave failed");
            }
        }

        self.notify_if_changed(before).await;
        outcome
    }

    // ─────────────────────────── Realtime reconciliation ───────────────────────────

    /// Apply one realtime event to the store.
    ///
    /// Infallible from the pump's perspective: every handler is idempotent
    /// under redelivery and failures of best-effort enrichment (single-room
    /// refetches) are logged, never propagated, so one bad event cannot
    /// break the listener chain.
    pub async fn handle_event(&self, event: RealtimeEvent) {
        debug!(room_id = %event.room_id(), "applying realtime event");
        let before = self.store.read().await.revision();

        match event {
            RealtimeEvent::RoomCreated { room, creator_id } => {
                self.on_room_created(room, &creator_id).await;
            }
            RealtimeEvent::RoomUpdated { room_id, patch } => {
                self.store.write().await.update_room(&room_id, &patch);
            }
            RealtimeEvent::RoomClosed { room_id } => {
                let mut store = self.store.write().await;
                // Tombstone before removal so a fetch response already in
                // flight that still lists the room is rejected on arrival.
                store.tombstone(&room_id);
                store.remove_room(&room_id);
            }
            RealtimeEvent::ParticipantCount { room_id, count } => {
                self.store
                    .write()
                    .await
                    .update_room(&room_id, &RoomPatch::participant_count(count));
            }
            RealtimeEvent::UserJoined(ev) => self.on_user_joined(ev).await,
            RealtimeEvent::UserLeft(ev) => self.on_user_left(ev).await,
            RealtimeEvent::UserKicked(ev) => self.on_user_kicked(ev).await,
            RealtimeEvent::UserBanned(ev) => self.on_user_banned(ev).await,
        }

        self.notify_if_changed(before).await;
    }

    /// Geographically-scoped rooms created by others are discovered only
    /// via the next fetch, not via push — the server applies its distance
    /// filter there. Own rooms and global rooms are inserted immediately.
    async fn on_room_created(&self, mut snap: RoomSnapshot, creator_id: &str) {
        let is_self = creator_id == self.user_id;
        let is_global = snap.position.is_none();
        if !is_self && !is_global {
            debug!(room_id = %snap.id, "ignoring scoped room created by another user");
            return;
        }
        if is_self {
            snap.is_creator = Some(true);
        }

        let id = snap.id.clone();
        {
            let mut store = self.store.write().await;
            if !store.upsert_room(&snap) {
                return;
            }
            store.set_discovered(&id, true);
            if is_self {
                store.set_membership(&id, true);
            }
        }

        if is_self {
            if let Err(err) = self.transport.subscribe(&id).await {
                warn!(room_id = %id, error = %err, "subscribe after room creation failed");
            }
        }
    }

    async fn on_user_joined(&self, ev: MemberEvent) {
        let is_self = ev.user_id == self.user_id;
        {
            let mut store = self.store.write().await;
            if let Some(count) = ev.participant_count {
                store.update_room(&ev.room_id, &RoomPatch::participant_count(count));
            }
            if is_self {
                store.set_membership(&ev.room_id, true);
            }
        }
        if is_self {
            if let Err(err) = self.transport.subscribe(&ev.room_id).await {
                warn!(room_id = %ev.room_id, error = %err, "subscribe on join echo failed");
            }
        }
    }

    async fn on_user_left(&self, ev: MemberEvent) {
        let is_self = ev.user_id == self.user_id;
        let unsubscribe = {
            let mut store = self.store.write().await;
            if let Some(count) = ev.participant_count {
                store.update_room(&ev.room_id, &RoomPatch::participant_count(count));
            }
            if is_self {
                store.set_membership(&ev.room_id, false);
                // A device-initiated leave may race its own server echo.
                store.end_leave(&ev.room_id);
                // Rapid leave-then-rejoin: keep the subscription when a join
                // for the same room is already in flight.
                !store.is_joining(&ev.room_id)
            } else {
                false
            }
        };
        if unsubscribe {
            if let Err(err) = self.transport.unsubscribe(&ev.room_id).await {
                warn!(room_id = %ev.room_id, error = %err, "unsubscribe on leave echo failed");
            }
        }
    }

    async fn on_user_kicked(&self, ev: MemberEvent) {
        let is_self = ev.user_id == self.user_id;
        {
            let mut store = self.store.write().await;
            if !store.first_member_event(&ev.room_id, &ev.user_id) {
                debug!(room_id = %ev.room_id, "duplicate kick delivery ignored");
                return;
            }
            if is_self {
                store.set_membership(&ev.room_id, false);
            }
        }

        if is_self {
            if let Err(err) = self.transport.unsubscribe(&ev.room_id).await {
                warn!(room_id = %ev.room_id, error = %err, "unsubscribe after kick failed");
            }
            self.handler.on_kicked(&ev.room_id).await;
        }

        // Kick payloads never carry the participant count.
        self.refresh_room(&ev.room_id).await;
    }

    async fn on_user_banned(&self, ev: MemberEvent) {
        let is_self = ev.user_id == self.user_id;
        {
            let mut store = self.store.write().await;
            if !store.first_member_event(&ev.room_id, &ev.user_id) {
                debug!(room_id = %ev.room_id, "duplicate ban delivery ignored");
                return;
            }
            if is_self {
                store.set_membership(&ev.room_id, false);
                // Unlike a kick, a ban hides the room from browsing.
                store.set_discovered(&ev.room_id, false);
            }
        }

        if is_self {
            if let Err(err) = self.transport.unsubscribe(&ev.room_id).await {
                warn!(room_id = %ev.room_id, error = %err, "unsubscribe after ban failed");
            }
            self.handler.on_banned(&ev.room_id).await;
        } else {
            self.refresh_room(&ev.room_id).await;
        }
    }

    /// Best-effort single-room refetch for the authoritative participant
    /// count. Failures are logged and swallowed: the primary state change
    /// already happened and this is enrichment only.
    async fn refresh_room(&self, id: &str) {
        match self.api.room(id).await {
            Ok(snap) => {
                self.store.write().await.upsert_room(&snap);
            }
            Err(err) => {
                warn!(room_id = %id, error = %err, "room refresh failed");
            }
        }
    }

    // ─────────────────────────── Queries & views ───────────────────────────

    pub async fn is_joined(&self, id: &str) -> bool {
        self.store.read().await.is_joined(id)
    }

    pub async fn is_joining(&self, id: &str) -> bool {
        self.store.read().await.is_joining(id)
    }

    pub async fn is_leaving(&self, id: &str) -> bool {
        self.store.read().await.is_leaving(id)
    }

    pub async fn room_by_id(&self, id: &str) -> Option<Room> {
        self.store.read().await.room(id).cloned()
    }

    /// Mark a room as currently open on screen. Selected rooms survive
    /// page-0 discovery replacement while still active.
    pub async fn select_room(&self, id: Option<RoomId>) {
        let before;
        {
            let mut store = self.store.write().await;
            before = store.revision();
            store.select_room(id);
        }
        self.notify_if_changed(before).await;
    }

    pub async fn cursor(&self) -> DiscoveryCursor {
        self.store.read().await.cursor()
    }

    pub async fn revision(&self) -> u64 {
        self.store.read().await.revision()
    }

    /// Every discovered room with the membership flag overlaid.
    pub async fn discovered_rooms(&self) -> Vec<Room> {
        let store = self.store.read().await;
        self.projector.lock().await.discovered(&store)
    }

    /// Discovered rooms that are neither closed nor expired.
    pub async fn active_rooms(&self) -> Vec<Room> {
        let store = self.store.read().await;
        self.projector.lock().await.active(&store, Utc::now())
    }

    /// Joined rooms, newest first.
    pub async fn my_rooms(&self) -> Vec<Room> {
        let store = self.store.read().await;
        self.projector.lock().await.my_rooms(&store)
    }

    /// Joined rooms partitioned into active and expired for the sidebar.
    pub async fn sidebar(&self) -> SidebarSplit {
        let store = self.store.read().await;
        self.projector.lock().await.sidebar(&store, Utc::now())
    }
}

/// Merge one batch of discovery results into the store.
///
/// With `replace`, the batch becomes authoritative for the discovery set
/// except for preserved rooms: locally-known, still temporally active, and
/// currently discovered, joined, or selected. Without `replace` (load-more)
/// the merge is strictly additive.
fn apply_discovery_results(store: &mut RoomStore, snapshots: &[RoomSnapshot], replace: bool) {
    if replace {
        let now = Utc::now();
        let mut candidates: Vec<RoomId> = store.discovered_ids().iter().cloned().collect();
        candidates.extend(store.joined_ids().iter().cloned());
        if let Some(selected) = store.selected_room() {
            candidates.push(selected.to_string());
        }

        let mut keep: HashSet<RoomId> = HashSet::new();
        for id in candidates {
            let active = store.room(&id).is_some_and(|room| room.is_active(now));
            if active && !store.is_tombstoned(&id) {
                keep.insert(id);
            }
        }
        store.replace_discovered(keep);
    }

    for snap in snapshots {
        if !store.upsert_room(snap) {
            // Empty id or tombstoned: a closed room listed by a stale
            // in-flight response must not resurrect.
            continue;
        }
        store.set_discovered(&snap.id, true);
        if let Some(joined) = snap.joined {
            store.set_membership(&snap.id, joined);
        }
        if snap.is_creator == Some(true) {
            store.set_membership(&snap.id, true);
        }
    }
}
