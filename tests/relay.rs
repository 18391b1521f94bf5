//! End-to-end: two sessions syncing through a relay over real sockets.

use std::sync::Arc;
use std::time::Duration;

use boardsync::config::SyncConfig;
use boardsync::doc::{BoardState, Point, ShapeKind};
use boardsync::routes;
use boardsync::services::{ShapeProperty, SyncSession};
use boardsync::state::RelayState;
use boardsync::store::{MemoryStore, RemoteStore, WsStore};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

async fn spawn_relay(store: MemoryStore) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
    let addr = listener.local_addr().expect("relay addr");
    let app = routes::app(RelayState::with_store(store));
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("relay serve");
    });
    format!("ws://{addr}/ws")
}

async fn connect(url: &str, actor: &str) -> WsStore {
    WsStore::connect(url, Some(actor.to_string())).await.expect("connect to relay")
}

async fn session(url: &str, actor: &str, dir: &std::path::Path) -> SyncSession {
    let mut config = SyncConfig::for_actor(actor);
    config.local_dir = dir.to_path_buf();
    let store: Arc<dyn RemoteStore> = Arc::new(connect(url, actor).await);
    SyncSession::start(config, store).await
}

/// Poll `session` until `check` holds, failing after two seconds.
async fn eventually(session: &SyncSession, check: impl Fn(&BoardState) -> bool) {
    let waited = timeout(Duration::from_secs(2), async {
        while !check(&session.snapshot()) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached; board: {:?}", session.snapshot());
}

#[tokio::test]
async fn store_ops_round_trip_through_relay() {
    let backing = MemoryStore::new();
    let url = spawn_relay(backing.clone()).await;
    let client = connect(&url, "alice").await;

    client.set("shapes/s1", json!({"id": "s1", "x": 1})).await.expect("set");
    assert_eq!(client.get("shapes/s1/x").await.expect("get"), json!(1));

    let updates = [("shapes/s1/x".to_string(), json!(2)), ("shapes/s2/id".to_string(), json!("s2"))];
    client.update(updates.into_iter().collect()).await.expect("update");
    assert_eq!(backing.snapshot("shapes/s1/x"), json!(2));
    assert_eq!(backing.snapshot("shapes/s2"), json!({"id": "s2"}));
}

#[tokio::test]
async fn subscription_sees_other_clients_writes() {
    let url = spawn_relay(MemoryStore::new()).await;
    let alice = connect(&url, "alice").await;
    let bob = connect(&url, "bob").await;

    let mut sub = bob.subscribe("shapes").await.expect("subscribe");
    alice.set("shapes/s1", json!({"id": "s1"})).await.expect("set");

    let snapshot = timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("snapshot timed out")
        .expect("subscription open")
        .expect("snapshot ok");
    assert_eq!(snapshot, json!({"s1": {"id": "s1"}}));
}

#[tokio::test]
async fn two_sessions_converge_through_relay() {
    let url = spawn_relay(MemoryStore::new()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let alice = session(&url, "alice", dir.path()).await;
    let bob = session(&url, "bob", dir.path()).await;

    let id = alice.create_shape(ShapeKind::rect(), Point::new(40.0, 40.0));
    alice.flush().await;
    eventually(&bob, |board| board.shape(&id).is_some()).await;

    // Stamps are wall-clock milliseconds and ties keep the local copy.
    sleep(Duration::from_millis(5)).await;
    assert!(bob.update_shape_property(&id, ShapeProperty::Fill("#ff0000".into())));
    bob.flush().await;
    eventually(&alice, |board| board.shape(&id).is_some_and(|s| s.fill == "#ff0000")).await;

    sleep(Duration::from_millis(5)).await;
    assert!(alice.delete_shape(&id));
    alice.flush().await;
    eventually(&bob, |board| board.shape(&id).is_none()).await;
}

#[tokio::test]
async fn relay_health_probe_answers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
    let addr = listener.local_addr().expect("relay addr");
    tokio::spawn(async move {
        axum::serve(listener, routes::app(RelayState::new())).await.expect("relay serve");
    });

    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream
        .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .expect("write request");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read response");
    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {response}");
}
