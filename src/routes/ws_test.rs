use super::*;
use serde_json::json;
use tokio::time::{Duration, timeout};

struct Harness {
    state: RelayState,
    forwarders: Forwarders,
    client_tx: mpsc::Sender<Frame>,
    client_rx: mpsc::Receiver<Frame>,
}

impl Harness {
    fn new() -> Self {
        let (client_tx, client_rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        Self { state: RelayState::new(), forwarders: Forwarders::new(), client_tx, client_rx }
    }

    async fn send(&mut self, req: &Frame) -> Vec<Frame> {
        let text = serde_json::to_string(req).expect("request should encode");
        self.send_text(&text).await
    }

    async fn send_text(&mut self, text: &str) -> Vec<Frame> {
        process_inbound_text(&self.state, &mut self.forwarders, &self.client_tx, Uuid::nil(), text).await
    }

    async fn recv_pushed(&mut self) -> Frame {
        timeout(Duration::from_millis(500), self.client_rx.recv())
            .await
            .expect("pushed frame timed out")
            .expect("client channel closed unexpectedly")
    }

    async fn assert_nothing_pushed(&mut self) {
        assert!(
            timeout(Duration::from_millis(80), self.client_rx.recv()).await.is_err(),
            "expected no pushed frame"
        );
    }
}

fn request(syscall: &str) -> Frame {
    Frame::request(syscall, Data::new())
}

fn only(frames: Vec<Frame>) -> Frame {
    assert_eq!(frames.len(), 1, "expected exactly one reply, got {frames:?}");
    frames.into_iter().next().expect("one frame")
}

// =============================================================================
// DISPATCH
// =============================================================================

#[tokio::test]
async fn invalid_json_yields_gateway_error() {
    let mut h = Harness::new();
    let reply = only(h.send_text("not json").await);
    assert_eq!(reply.syscall, "gateway:error");
    assert!(reply.data_str("message").unwrap_or("").starts_with("invalid json"));
}

#[tokio::test]
async fn non_request_frames_are_ignored() {
    let mut h = Harness::new();
    let req = request("store:get").with_data("path", "shapes");
    let done = req.done();
    assert!(h.send(&done).await.is_empty());
}

#[tokio::test]
async fn unknown_prefix_and_op_are_errors() {
    let mut h = Harness::new();
    let reply = only(h.send(&request("board:list")).await);
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.data_str("message"), Some("unknown prefix: board"));

    let reply = only(h.send(&request("store:drop")).await);
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.data_str("message"), Some("unknown op: drop"));
}

#[tokio::test]
async fn missing_path_is_an_error() {
    let mut h = Harness::new();
    let reply = only(h.send(&request("store:get")).await);
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.data_str("message"), Some("path required"));
}

// =============================================================================
// STORE OPS
// =============================================================================

#[tokio::test]
async fn set_then_get_returns_value() {
    let mut h = Harness::new();
    let set = request("store:set").with_data("path", "shapes/s1").with_data("value", json!({"id": "s1", "x": 10}));
    let reply = only(h.send(&set).await);
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.parent_id, Some(set.id));

    let get = request("store:get").with_data("path", "shapes/s1/x");
    let reply = only(h.send(&get).await);
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.data.get("value"), Some(&json!(10)));
}

#[tokio::test]
async fn update_applies_every_path() {
    let mut h = Harness::new();
    let update = request("store:update").with_data("updates", json!({"shapes/a/x": 1, "shapes/b/x": 2}));
    assert_eq!(only(h.send(&update).await).status, Status::Done);
    assert_eq!(h.state.store.snapshot("shapes/a"), json!({"x": 1}));
    assert_eq!(h.state.store.snapshot("shapes/b"), json!({"x": 2}));
}

#[tokio::test]
async fn update_without_object_is_an_error() {
    let mut h = Harness::new();
    let update = request("store:update").with_data("updates", json!([1, 2]));
    let reply = only(h.send(&update).await);
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.data_str("message"), Some("updates object required"));
}

#[tokio::test]
async fn unavailable_store_maps_to_error_code() {
    let mut h = Harness::new();
    h.state.store.set_available(false);
    let reply = only(h.send(&request("store:get").with_data("path", "shapes")).await);
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.data_str("code"), Some("E_STORE_UNAVAILABLE"));
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

#[tokio::test]
async fn subscribe_streams_snapshots_as_items() {
    let mut h = Harness::new();
    let sub = request("store:subscribe").with_data("path", "shapes");
    assert_eq!(only(h.send(&sub).await).status, Status::Done);
    h.assert_nothing_pushed().await;

    let set = request("store:set").with_data("path", "shapes/s1").with_data("value", json!({"id": "s1"}));
    h.send(&set).await;

    let item = h.recv_pushed().await;
    assert_eq!(item.status, Status::Item);
    assert_eq!(item.parent_id, Some(sub.id));
    assert_eq!(item.data_str("path"), Some("shapes"));
    assert_eq!(item.data.get("value"), Some(&json!({"s1": {"id": "s1"}})));
}

#[tokio::test]
async fn subscribe_delivers_existing_value_first() {
    let mut h = Harness::new();
    let set = request("store:set").with_data("path", "strokes/k1").with_data("value", json!({"id": "k1"}));
    h.send(&set).await;

    let sub = request("store:subscribe").with_data("path", "strokes");
    h.send(&sub).await;
    let item = h.recv_pushed().await;
    assert_eq!(item.parent_id, Some(sub.id));
    assert_eq!(item.data.get("value"), Some(&json!({"k1": {"id": "k1"}})));
}

#[tokio::test]
async fn unsubscribe_stops_forwarding() {
    let mut h = Harness::new();
    let sub = request("store:subscribe").with_data("path", "shapes");
    h.send(&sub).await;
    assert_eq!(h.forwarders.len(), 1);

    let unsub = request("store:unsubscribe").with_data("subscription", sub.id.to_string());
    assert_eq!(only(h.send(&unsub).await).status, Status::Done);
    assert!(h.forwarders.is_empty());

    let set = request("store:set").with_data("path", "shapes/s1").with_data("value", json!({"id": "s1"}));
    h.send(&set).await;
    h.assert_nothing_pushed().await;
}

#[tokio::test]
async fn unsubscribe_with_bad_id_is_an_error() {
    let mut h = Harness::new();
    let unsub = request("store:unsubscribe").with_data("subscription", "nope");
    let reply = only(h.send(&unsub).await);
    assert_eq!(reply.status, Status::Error);
    assert!(reply.data_str("message").unwrap_or("").starts_with("invalid subscription id"));
}
