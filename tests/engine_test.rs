//! End-to-end tests for the fetch and join/leave flows, using mock adapters.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use roomsync::{
    ApiError, EngineConfig, GeoPoint, JoinError, LeaveError, Room, RoomApi, RoomEngine,
    RoomEventHandler, RoomPage, RoomSnapshot, RoomTransport, TransportError,
};

// ─────────────────────────── Mock adapters ───────────────────────────

#[derive(Default)]
struct MockApi {
    nearby_pages: Mutex<VecDeque<RoomPage>>,
    my_rooms_response: Mutex<Vec<RoomSnapshot>>,
    rooms_by_id: Mutex<HashMap<String, RoomSnapshot>>,
    join_results: Mutex<VecDeque<Result<(), ApiError>>>,
    leave_results: Mutex<VecDeque<Result<(), ApiError>>>,
    join_calls: AtomicUsize,
    leave_calls: AtomicUsize,
    nearby_calls: AtomicUsize,
    join_delay_ms: AtomicU64,
    leave_delay_ms: AtomicU64,
}

#[async_trait]
impl RoomApi for MockApi {
    async fn nearby_rooms(
        &self,
        _lat: f64,
        _lng: f64,
        _page: u32,
        _page_size: u32,
        _radius_m: Option<f64>,
    ) -> Result<RoomPage, ApiError> {
        self.nearby_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .nearby_pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn my_rooms(&self) -> Result<Vec<RoomSnapshot>, ApiError> {
        Ok(self.my_rooms_response.lock().unwrap().clone())
    }

    async fn room(&self, id: &str) -> Result<RoomSnapshot, ApiError> {
        self.rooms_by_id
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn join_room(&self, _id: &str, _lat: f64, _lng: f64) -> Result<(), ApiError> {
        self.join_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.join_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(StdDuration::from_millis(delay)).await;
        }
        self.join_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn leave_room(&self, _id: &str) -> Result<(), ApiError> {
        self.leave_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.leave_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(StdDuration::from_millis(delay)).await;
        }
        self.leave_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

#[derive(Default)]
struct MockTransport {
    subscribed: Mutex<Vec<String>>,
    unsubscribed: Mutex<Vec<String>>,
}

#[async_trait]
impl RoomTransport for MockTransport {
    async fn subscribe(&self, room_id: &str) -> Result<(), TransportError> {
        self.subscribed.lock().unwrap().push(room_id.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, room_id: &str) -> Result<(), TransportError> {
        self.unsubscribed.lock().unwrap().push(room_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingHandler {
    kicked: Mutex<Vec<String>>,
    banned: Mutex<Vec<String>>,
    changes: AtomicUsize,
}

#[async_trait]
impl RoomEventHandler for RecordingHandler {
    async fn on_kicked(&self, room_id: &str) {
        self.kicked.lock().unwrap().push(room_id.to_string());
    }

    async fn on_banned(&self, room_id: &str) {
        self.banned.lock().unwrap().push(room_id.to_string());
    }

    async fn on_rooms_changed(&self, _revision: u64) {
        self.changes.fetch_add(1, Ordering::SeqCst);
    }
}

// ─────────────────────────── Fixtures ───────────────────────────

type TestEngine = RoomEngine<MockApi, MockTransport, RecordingHandler>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup() -> (Arc<MockApi>, Arc<MockTransport>, Arc<RecordingHandler>, TestEngine) {
    init_tracing();
    let api = Arc::new(MockApi::default());
    let transport = Arc::new(MockTransport::default());
    let handler = Arc::new(RecordingHandler::default());
    let engine = RoomEngine::new(
        "me",
        api.clone(),
        transport.clone(),
        handler.clone(),
        EngineConfig::default(),
    );
    (api, transport, handler, engine)
}

fn snapshot(id: &str) -> RoomSnapshot {
    RoomSnapshot {
        id: id.to_string(),
        title: Some(format!("room {id}")),
        participant_count: Some(1),
        capacity: Some(50),
        position: Some(GeoPoint {
            lat: 37.77,
            lng: -122.41,
        }),
        created_at: Some(Utc::now()),
        expires_at: Some(Utc::now() + Duration::hours(1)),
        ..RoomSnapshot::default()
    }
}

fn page(ids: &[&str], has_next: bool) -> RoomPage {
    RoomPage {
        rooms: ids.iter().map(|id| snapshot(id)).collect(),
        has_next,
    }
}

fn room(id: &str) -> Room {
    snapshot(id).into_room(Utc::now())
}

// ─────────────────────────── Discovery ───────────────────────────

#[tokio::test]
async fn refresh_discovery_populates_views() {
    let (api, _transport, handler, engine) = setup();
    api.nearby_pages.lock().unwrap().push_back(page(&["a", "b"], true));

    engine.refresh_discovery(37.77, -122.41).await.unwrap();

    let rooms = engine.discovered_rooms().await;
    assert_eq!(rooms.len(), 2);
    assert!(rooms.iter().all(|r| !r.has_joined));
    let cursor = engine.cursor().await;
    assert_eq!(cursor.page, 0);
    assert!(cursor.has_more);
    assert!(handler.changes.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn page_zero_replacement_preserves_joined_rooms() {
    let (api, _transport, _handler, engine) = setup();
    api.nearby_pages
        .lock()
        .unwrap()
        .push_back(page(&["a", "b", "c"], false));
    engine.refresh_discovery(0.0, 0.0).await.unwrap();
    engine.join(&room("c")).await.unwrap();

    // The next page-0 fetch no longer lists c, but it stays discovered
    // because we are a member and it is still active.
    api.nearby_pages.lock().unwrap().push_back(page(&["a", "b"], false));
    engine.refresh_discovery(0.0, 0.0).await.unwrap();

    let ids: Vec<String> = engine.discovered_rooms().await.iter().map(|r| r.id.clone()).collect();
    assert!(ids.contains(&"c".to_string()));
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn page_zero_replacement_keeps_active_discovered_rooms() {
    let (api, _transport, _handler, engine) = setup();
    api.nearby_pages.lock().unwrap().push_back(page(&["a", "b"], false));
    engine.refresh_discovery(0.0, 0.0).await.unwrap();

    api.nearby_pages.lock().unwrap().push_back(page(&["a"], false));
    engine.refresh_discovery(0.0, 0.0).await.unwrap();

    // b dropped out of the radius-limited result but is still active, so
    // it stays on the map until it expires or closes.
    let rooms = engine.discovered_rooms().await;
    assert!(rooms.iter().any(|r| r.id == "a"));
    assert!(rooms.iter().any(|r| r.id == "b"));
}

#[tokio::test]
async fn page_zero_replacement_keeps_selected_room() {
    let (api, _transport, _handler, engine) = setup();
    // Seed sel through the my-rooms path so it is known but neither
    // discovered nor (after leaving) joined; only the selection keeps it.
    *api.my_rooms_response.lock().unwrap() = vec![snapshot("sel")];
    engine.refresh_my_rooms().await.unwrap();
    engine.leave("sel").await.unwrap();
    engine.select_room(Some("sel".to_string())).await;

    api.nearby_pages.lock().unwrap().push_back(page(&["other"], false));
    engine.refresh_discovery(0.0, 0.0).await.unwrap();

    let ids: Vec<String> = engine
        .discovered_rooms()
        .await
        .iter()
        .map(|r| r.id.clone())
        .collect();
    assert!(ids.contains(&"sel".to_string()));
    assert!(ids.contains(&"other".to_string()));
}

#[tokio::test]
async fn load_more_is_additive_and_advances_cursor() {
    let (api, _transport, _handler, engine) = setup();
    api.nearby_pages.lock().unwrap().push_back(page(&["a"], true));
    engine.refresh_discovery(0.0, 0.0).await.unwrap();

    api.nearby_pages.lock().unwrap().push_back(page(&["b"], false));
    let loaded = engine.load_more(0.0, 0.0).await.unwrap();
    assert!(loaded);

    let rooms = engine.discovered_rooms().await;
    assert_eq!(rooms.len(), 2);
    let cursor = engine.cursor().await;
    assert_eq!(cursor.page, 1);
    assert!(!cursor.has_more);
}

#[tokio::test]
async fn load_more_dropped_when_no_more_pages() {
    let (api, _transport, _handler, engine) = setup();
    api.nearby_pages.lock().unwrap().push_back(page(&["a"], false));
    engine.refresh_discovery(0.0, 0.0).await.unwrap();

    let calls_before = api.nearby_calls.load(Ordering::SeqCst);
    let loaded = engine.load_more(0.0, 0.0).await.unwrap();
    assert!(!loaded);
    assert_eq!(api.nearby_calls.load(Ordering::SeqCst), calls_before);
}

// ─────────────────────────── Membership resync ───────────────────────────

#[tokio::test]
async fn refresh_my_rooms_replaces_membership_wholesale() {
    let (api, _transport, _handler, engine) = setup();
    api.nearby_pages.lock().unwrap().push_back(page(&["b"], false));
    engine.refresh_discovery(0.0, 0.0).await.unwrap();
    engine.join(&room("b")).await.unwrap();

    // The server says we are only in a; b's membership must go away.
    *api.my_rooms_response.lock().unwrap() = vec![snapshot("a")];
    engine.refresh_my_rooms().await.unwrap();

    assert!(engine.is_joined("a").await);
    assert!(!engine.is_joined("b").await);
    let mine = engine.my_rooms().await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, "a");
}

#[tokio::test]
async fn refresh_my_rooms_filters_closed_rooms() {
    let (api, _transport, _handler, engine) = setup();
    let mut closed = snapshot("gone");
    closed.status = Some(roomsync::RoomStatus::Closed);
    *api.my_rooms_response.lock().unwrap() = vec![snapshot("a"), closed];

    engine.refresh_my_rooms().await.unwrap();

    assert!(engine.is_joined("a").await);
    assert!(!engine.is_joined("gone").await);
}

// ─────────────────────────── Join ───────────────────────────

#[tokio::test]
async fn join_success_subscribes_and_refetches_count() {
    let (api, transport, _handler, engine) = setup();
    let mut fresh = snapshot("r1");
    fresh.participant_count = Some(5);
    api.rooms_by_id.lock().unwrap().insert("r1".to_string(), fresh);

    engine.join(&room("r1")).await.unwrap();

    assert!(engine.is_joined("r1").await);
    assert!(!engine.is_joining("r1").await);
    assert_eq!(*transport.subscribed.lock().unwrap(), vec!["r1".to_string()]);
    // The post-join refetch pulled the authoritative count.
    assert_eq!(engine.room_by_id("r1").await.unwrap().participant_count, 5);
    let mine = engine.my_rooms().await;
    assert_eq!(mine.len(), 1);
    assert!(mine[0].has_joined);
}

#[tokio::test]
async fn join_failure_rolls_back_membership() {
    let (api, transport, _handler, engine) = setup();
    api.join_results.lock().unwrap().push_back(Err(ApiError::RoomFull));

    let err = engine.join(&room("r1")).await.unwrap_err();
    assert!(matches!(err, JoinError::Api(ApiError::RoomFull)));
    assert!(!engine.is_joined("r1").await);
    assert!(!engine.is_joining("r1").await);
    assert!(transport.subscribed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn join_already_joined_conflict_is_success() {
    let (api, _transport, _handler, engine) = setup();
    api.join_results
        .lock()
        .unwrap()
        .push_back(Err(ApiError::AlreadyJoined));

    engine.join(&room("r1")).await.unwrap();
    assert!(engine.is_joined("r1").await);
}

#[tokio::test]
async fn join_banned_is_distinguished_and_rolled_back() {
    let (api, _transport, _handler, engine) = setup();
    api.join_results.lock().unwrap().push_back(Err(ApiError::Banned));

    let err = engine.join(&room("r1")).await.unwrap_err();
    assert!(matches!(err, JoinError::Banned));
    assert!(!engine.is_joined("r1").await);
}

#[tokio::test]
async fn concurrent_joins_make_one_api_call() {
    let (api, _transport, _handler, engine) = setup();
    api.join_delay_ms.store(20, Ordering::SeqCst);

    let target = room("r1");
    let (first, second) = tokio::join!(engine.join(&target), engine.join(&target));

    // The second tap lands inside the optimistic window and collapses to
    // success without another network call.
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(api.join_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn join_during_inflight_leave_is_rejected() {
    let (api, _transport, _handler, engine) = setup();
    engine.join(&room("r1")).await.unwrap();
    api.leave_delay_ms.store(30, Ordering::SeqCst);

    let target = room("r1");
    let (leave, join) = tokio::join!(engine.leave("r1"), async {
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        engine.join(&target).await
    });

    leave.unwrap();
    assert!(matches!(join.unwrap_err(), JoinError::InFlight));
    assert_eq!(api.join_calls.load(Ordering::SeqCst), 1);
}

// ─────────────────────────── Leave ───────────────────────────

#[tokio::test]
async fn leave_during_inflight_join_is_rejected() {
    let (api, _transport, _handler, engine) = setup();
    api.join_delay_ms.store(30, Ordering::SeqCst);

    let target = room("r1");
    let (join, leave) = tokio::join!(engine.join(&target), async {
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        engine.leave("r1").await
    });

    join.unwrap();
    assert!(matches!(leave.unwrap_err(), LeaveError::InFlight));
    // The join settled normally; the server never saw join-then-leave.
    assert!(engine.is_joined("r1").await);
    assert_eq!(api.leave_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn leave_success_unsubscribes() {
    let (_api, transport, _handler, engine) = setup();
    engine.join(&room("r1")).await.unwrap();

    engine.leave("r1").await.unwrap();

    assert!(!engine.is_joined("r1").await);
    assert!(!engine.is_leaving("r1").await);
    assert_eq!(
        *transport.unsubscribed.lock().unwrap(),
        vec!["r1".to_string()]
    );
}

#[tokio::test]
async fn leave_failure_keeps_membership() {
    let (api, transport, _handler, engine) = setup();
    engine.join(&room("r1")).await.unwrap();
    api.leave_results
        .lock()
        .unwrap()
        .push_back(Err(ApiError::Network(anyhow::anyhow!("timeout"))));

    let result = engine.leave("r1").await;
    assert!(result.is_err());
    // No optimistic removal: the user is still in the room.
    assert!(engine.is_joined("r1").await);
    assert!(!engine.is_leaving("r1").await);
    assert!(transport.unsubscribed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn leave_when_not_joined_is_a_noop() {
    let (api, _transport, _handler, engine) = setup();
    engine.leave("r1").await.unwrap();
    assert_eq!(api.leave_calls.load(Ordering::SeqCst), 0);
}

// ─────────────────────────── Resync ───────────────────────────

#[tokio::test]
async fn resync_refreshes_membership_then_discovery() {
    let (api, _transport, _handler, engine) = setup();
    *api.my_rooms_response.lock().unwrap() = vec![snapshot("mine")];
    api.nearby_pages.lock().unwrap().push_back(page(&["near"], false));

    engine.resync(0.0, 0.0).await.unwrap();

    assert!(engine.is_joined("mine").await);
    assert!(engine.discovered_rooms().await.iter().any(|r| r.id == "near"));
}
