mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use eta_pipeline::api::rest::router;
use eta_pipeline::models::eta::{CalculateEtaRequest, CalculateEtaResponse, EtaSnapshot};
use eta_pipeline::models::geo::GeoPoint;
use eta_pipeline::models::order::{EtaUpdate, Order, StoredEta};
use eta_pipeline::state::AppState;
use eta_pipeline::store::{ChangeFeed, InMemoryOrderStore, OrderStore, WritePolicy};
use eta_pipeline::tracker::client::{
    CalculatorClient, ClientError, EtaReader, HttpCalculatorClient, HttpEtaReader, StoreReader,
};
use eta_pipeline::tracker::push::WebSocketChanges;
use eta_pipeline::tracker::{EtaTracker, TrackerConfig, default_strategies};
use tokio::sync::watch;
use uuid::Uuid;

use common::StubDirections;

const ORDER_ID: &str = "3d8b7f2a-5c1e-4a9b-8e6d-2f4a1b3c5d7e";
const OTHER_ORDER_ID: &str = "9a4e1c7b-3f2d-4b8a-a6c5-1e0d9f8b7a63";

fn order_id() -> Uuid {
    Uuid::parse_str(ORDER_ID).unwrap()
}

fn courier() -> GeoPoint {
    GeoPoint::new(40.71, -74.01)
}

fn order(id: Uuid) -> Order {
    Order::new(id, GeoPoint::new(40.72, -74.0), GeoPoint::new(40.75, -73.98))
}

fn quiet() -> TrackerConfig {
    TrackerConfig {
        poll_interval: Duration::from_secs(3600),
    }
}

struct UnreachableCalculator;

#[async_trait]
impl CalculatorClient for UnreachableCalculator {
    async fn calculate(&self, _request: &CalculateEtaRequest) -> Result<CalculateEtaResponse, ClientError> {
        Err(ClientError::Transport("connection refused".to_string()))
    }
}

struct BrokenReader;

#[async_trait]
impl EtaReader for BrokenReader {
    async fn read_eta(&self, _order_id: Uuid) -> Result<Option<StoredEta>, ClientError> {
        Err(ClientError::Status(503))
    }
}

async fn wait_until(
    rx: &mut watch::Receiver<Option<EtaSnapshot>>,
    predicate: impl FnMut(&Option<EtaSnapshot>) -> bool,
) -> Option<EtaSnapshot> {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
        .await
        .expect("snapshot did not reach the expected state")
        .unwrap()
        .clone()
}

fn has_eta(eta_minutes: i64) -> impl FnMut(&Option<EtaSnapshot>) -> bool {
    move |snapshot| snapshot.as_ref().is_some_and(|snapshot| snapshot.eta_minutes == eta_minutes)
}

#[tokio::test]
async fn falls_back_to_stored_eta_when_calculation_fails() {
    let feed = ChangeFeed::new(16);
    let store = Arc::new(InMemoryOrderStore::new(feed.clone(), WritePolicy::Overwrite));
    let stored_at = Utc.with_ymd_and_hms(2026, 3, 14, 12, 30, 0).unwrap();
    let mut seeded = order(order_id());
    seeded.apply(&EtaUpdate {
        eta_minutes: 12,
        distance_miles: 3.4,
        eta_updated_at: stored_at,
    });
    store.put(seeded);

    let tracker = EtaTracker::mount(
        Some(order_id()),
        default_strategies(Arc::new(UnreachableCalculator), Arc::new(StoreReader(store))),
        feed,
        quiet(),
    );
    tracker.calculate_eta(Some(courier())).await;

    assert_eq!(
        tracker.snapshot(),
        Some(EtaSnapshot {
            eta_minutes: 12,
            distance_miles: 0.0,
            last_updated: stored_at,
            route: None,
        })
    );
}

#[tokio::test]
async fn total_failure_leaves_eta_unknown() {
    let tracker = EtaTracker::mount(
        Some(order_id()),
        default_strategies(Arc::new(UnreachableCalculator), Arc::new(BrokenReader)),
        ChangeFeed::new(16),
        quiet(),
    );

    tracker.calculate_eta(Some(courier())).await;
    assert!(tracker.snapshot().is_none());

    tracker.calculate_eta(None).await;
    assert!(tracker.snapshot().is_none());
}

#[tokio::test]
async fn order_without_stored_eta_is_unknown() {
    let feed = ChangeFeed::new(16);
    let store = Arc::new(InMemoryOrderStore::new(feed.clone(), WritePolicy::Overwrite));
    store.put(order(order_id()));

    let tracker = EtaTracker::mount(
        Some(order_id()),
        default_strategies(Arc::new(UnreachableCalculator), Arc::new(StoreReader(store))),
        feed,
        quiet(),
    );
    tracker.calculate_eta(Some(courier())).await;

    assert!(tracker.snapshot().is_none());
}

#[tokio::test]
async fn unmount_releases_subscription_and_timer() {
    let feed = ChangeFeed::new(16);
    let mut tracker = EtaTracker::mount(
        Some(order_id()),
        default_strategies(Arc::new(UnreachableCalculator), Arc::new(BrokenReader)),
        feed.clone(),
        quiet(),
    );
    assert_eq!(feed.active_subscriptions(), 1);
    assert!(tracker.is_active());

    tracker.unmount().await;

    assert_eq!(feed.active_subscriptions(), 0);
    assert!(!tracker.is_active());
    assert!(tracker.snapshot().is_none());
}

#[tokio::test]
async fn dropping_the_tracker_releases_subscription() {
    let feed = ChangeFeed::new(16);
    let tracker = EtaTracker::mount(
        Some(order_id()),
        default_strategies(Arc::new(UnreachableCalculator), Arc::new(BrokenReader)),
        feed.clone(),
        quiet(),
    );
    assert_eq!(feed.active_subscriptions(), 1);

    drop(tracker);

    tokio::time::timeout(Duration::from_secs(2), async {
        while feed.active_subscriptions() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscription outlived the tracker");
}

#[tokio::test]
async fn mount_without_order_is_inert() {
    let feed = ChangeFeed::new(16);
    let tracker = EtaTracker::mount(
        None,
        default_strategies(Arc::new(UnreachableCalculator), Arc::new(BrokenReader)),
        feed.clone(),
        quiet(),
    );

    tracker.calculate_eta(Some(courier())).await;

    assert_eq!(feed.active_subscriptions(), 0);
    assert!(!tracker.is_active());
    assert!(tracker.order_id().is_none());
    assert!(tracker.snapshot().is_none());
}

#[tokio::test]
async fn pushed_change_replaces_snapshot_and_keeps_route() {
    let (state, store) =
        AppState::in_memory(StubDirections::route(600.0, 3218.0), 16, WritePolicy::Overwrite);
    store.put(order(order_id()));

    let tracker = EtaTracker::mount(
        Some(order_id()),
        default_strategies(state.calculator.clone(), Arc::new(StoreReader(store.clone()))),
        state.feed.clone(),
        quiet(),
    );
    let mut rx = tracker.watch();

    tracker.calculate_eta(Some(courier())).await;
    let calculated = tracker.snapshot().unwrap();
    assert_eq!(calculated.eta_minutes, 10);
    assert_eq!(calculated.distance_miles, 2.0);
    assert!(calculated.route.is_some());

    let pushed_at = Utc::now();
    store
        .update_eta(
            order_id(),
            EtaUpdate {
                eta_minutes: 7,
                distance_miles: 1.5,
                eta_updated_at: pushed_at,
            },
        )
        .await
        .unwrap();

    let pushed = wait_until(&mut rx, has_eta(7)).await.unwrap();
    assert_eq!(pushed.distance_miles, 1.5);
    assert_eq!(pushed.last_updated, pushed_at);
    assert_eq!(pushed.route, calculated.route);
}

#[tokio::test]
async fn changes_for_other_orders_are_ignored() {
    let feed = ChangeFeed::new(16);
    let store = Arc::new(InMemoryOrderStore::new(feed.clone(), WritePolicy::Overwrite));
    let other = Uuid::parse_str(OTHER_ORDER_ID).unwrap();
    store.put(order(order_id()));
    store.put(order(other));

    let tracker = EtaTracker::mount(
        Some(order_id()),
        default_strategies(Arc::new(UnreachableCalculator), Arc::new(StoreReader(store.clone()))),
        feed,
        quiet(),
    );
    let mut rx = tracker.watch();

    let update = |eta_minutes| EtaUpdate {
        eta_minutes,
        distance_miles: 1.0,
        eta_updated_at: Utc::now(),
    };
    store.update_eta(other, update(99)).await.unwrap();
    store.update_eta(order_id(), update(4)).await.unwrap();

    wait_until(&mut rx, has_eta(4)).await;
    assert_eq!(tracker.snapshot().unwrap().eta_minutes, 4);
}

#[tokio::test]
async fn switching_orders_moves_the_subscription() {
    let feed = ChangeFeed::new(16);
    let store = Arc::new(InMemoryOrderStore::new(feed.clone(), WritePolicy::Overwrite));
    let other = Uuid::parse_str(OTHER_ORDER_ID).unwrap();
    store.put(order(order_id()));
    store.put(order(other));

    let mut tracker = EtaTracker::mount(
        Some(order_id()),
        default_strategies(Arc::new(UnreachableCalculator), Arc::new(StoreReader(store.clone()))),
        feed.clone(),
        quiet(),
    );

    tracker.set_order(Some(other)).await;
    assert_eq!(tracker.order_id(), Some(other));
    assert_eq!(feed.active_subscriptions(), 1);

    let mut rx = tracker.watch();
    store
        .update_eta(
            other,
            EtaUpdate {
                eta_minutes: 21,
                distance_miles: 6.0,
                eta_updated_at: Utc::now(),
            },
        )
        .await
        .unwrap();
    wait_until(&mut rx, has_eta(21)).await;

    tracker.set_order(None).await;
    assert_eq!(feed.active_subscriptions(), 0);
    assert!(tracker.snapshot().is_none());
}

#[tokio::test]
async fn polling_picks_up_stored_eta() {
    let feed = ChangeFeed::new(16);
    let store = Arc::new(InMemoryOrderStore::new(feed.clone(), WritePolicy::Overwrite));
    let mut seeded = order(order_id());
    seeded.apply(&EtaUpdate {
        eta_minutes: 15,
        distance_miles: 4.0,
        eta_updated_at: Utc::now(),
    });
    store.put(seeded);

    let tracker = EtaTracker::mount(
        Some(order_id()),
        default_strategies(Arc::new(UnreachableCalculator), Arc::new(StoreReader(store))),
        feed,
        TrackerConfig {
            poll_interval: Duration::from_millis(20),
        },
    );
    let mut rx = tracker.watch();

    let polled = wait_until(&mut rx, has_eta(15)).await.unwrap();
    assert_eq!(polled.distance_miles, 0.0);
    assert!(polled.route.is_none());
}

#[tokio::test]
async fn tracks_over_http_end_to_end() {
    let directions = StubDirections::route(600.0, 3218.0);
    let (state, store) = AppState::in_memory(directions.clone(), 16, WritePolicy::Overwrite);
    store.put(order(order_id()));
    let state = Arc::new(state);
    let base_url = common::serve(router(state.clone())).await;

    let calculator = Arc::new(HttpCalculatorClient::new(&base_url, Duration::from_secs(5)).unwrap());
    let reader = Arc::new(HttpEtaReader::new(&base_url, Duration::from_secs(5)).unwrap());

    let tracker = EtaTracker::mount(
        Some(order_id()),
        default_strategies(calculator, reader.clone()),
        state.feed.clone(),
        quiet(),
    );
    tracker.calculate_eta(Some(courier())).await;

    let snapshot = tracker.snapshot().unwrap();
    assert_eq!(snapshot.eta_minutes, 10);
    assert_eq!(snapshot.distance_miles, 2.0);
    assert_eq!(snapshot.route.unwrap()["type"], "LineString");
    assert_eq!(directions.calls(), 1);

    let saved = store.fetch_order(order_id()).await.unwrap().unwrap();
    assert_eq!(saved.eta_minutes, Some(10));
    assert_eq!(saved.distance_miles, Some(2.0));

    let stored = reader.read_eta(order_id()).await.unwrap().unwrap();
    assert_eq!(stored.eta_minutes, Some(10));
    assert!(reader.read_eta(Uuid::nil()).await.unwrap().is_none());
}

#[tokio::test]
async fn http_calculator_failure_falls_back_over_http() {
    let (state, store) = AppState::in_memory(StubDirections::no_route(), 16, WritePolicy::Overwrite);
    let mut seeded = order(order_id());
    seeded.apply(&EtaUpdate {
        eta_minutes: 18,
        distance_miles: 5.0,
        eta_updated_at: Utc::now(),
    });
    store.put(seeded);
    let state = Arc::new(state);
    let base_url = common::serve(router(state.clone())).await;

    let tracker = EtaTracker::mount(
        Some(order_id()),
        default_strategies(
            Arc::new(HttpCalculatorClient::new(&base_url, Duration::from_secs(5)).unwrap()),
            Arc::new(HttpEtaReader::new(&base_url, Duration::from_secs(5)).unwrap()),
        ),
        state.feed.clone(),
        quiet(),
    );
    tracker.calculate_eta(Some(courier())).await;

    let snapshot = tracker.snapshot().unwrap();
    assert_eq!(snapshot.eta_minutes, 18);
    assert_eq!(snapshot.distance_miles, 0.0);
    assert!(snapshot.route.is_none());
}

#[tokio::test]
async fn stale_calculation_keeps_the_fresher_stored_eta() {
    let (state, store) =
        AppState::in_memory(StubDirections::route(600.0, 3218.0), 16, WritePolicy::Monotonic);
    let mut seeded = order(order_id());
    seeded.apply(&EtaUpdate {
        eta_minutes: 3,
        distance_miles: 0.8,
        eta_updated_at: Utc::now() + chrono::Duration::seconds(60),
    });
    store.put(seeded);

    let tracker = EtaTracker::mount(
        Some(order_id()),
        default_strategies(state.calculator.clone(), Arc::new(StoreReader(store.clone()))),
        state.feed.clone(),
        quiet(),
    );
    tracker.calculate_eta(Some(courier())).await;

    let snapshot = tracker.snapshot().unwrap();
    assert_eq!(snapshot.eta_minutes, 3);
    assert_eq!(snapshot.distance_miles, 0.8);
    let stored = store.fetch_eta(order_id()).await.unwrap().unwrap();
    assert_eq!(stored.eta_minutes, Some(3));
}

#[tokio::test]
async fn adopts_pushes_from_the_websocket_endpoint() {
    let (state, store) =
        AppState::in_memory(StubDirections::route(600.0, 3218.0), 16, WritePolicy::Overwrite);
    store.put(order(order_id()));
    let state = Arc::new(state);
    let base_url = common::serve(router(state.clone())).await;

    let mut tracker = EtaTracker::mount(
        Some(order_id()),
        default_strategies(
            Arc::new(HttpCalculatorClient::new(&base_url, Duration::from_secs(5)).unwrap()),
            Arc::new(HttpEtaReader::new(&base_url, Duration::from_secs(5)).unwrap()),
        ),
        WebSocketChanges::new(&base_url),
        quiet(),
    );
    let mut rx = tracker.watch();

    tokio::time::timeout(Duration::from_secs(2), async {
        while state.feed.active_subscriptions() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("tracker never connected to the push endpoint");

    store
        .update_eta(
            order_id(),
            EtaUpdate {
                eta_minutes: 9,
                distance_miles: 2.5,
                eta_updated_at: Utc::now(),
            },
        )
        .await
        .unwrap();

    let pushed = wait_until(&mut rx, has_eta(9)).await.unwrap();
    assert_eq!(pushed.distance_miles, 2.5);

    tracker.unmount().await;
    tokio::time::timeout(Duration::from_secs(2), async {
        while state.feed.active_subscriptions() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("push subscription outlived unmount");
}
