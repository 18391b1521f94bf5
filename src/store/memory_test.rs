use super::*;
use serde_json::json;
use tokio::time::{Duration, timeout};

async fn next_value(sub: &mut Subscription) -> Value {
    timeout(Duration::from_millis(200), sub.next())
        .await
        .expect("subscription timed out")
        .expect("subscription closed")
        .expect("subscription error")
}

async fn assert_quiet(sub: &mut Subscription) {
    assert!(timeout(Duration::from_millis(50), sub.next()).await.is_err(), "expected no snapshot");
}

#[tokio::test]
async fn update_writes_every_key() {
    let store = MemoryStore::new();
    let mut updates = UpdateMap::new();
    updates.insert("shapes/a".into(), json!({"id": "a", "x": 1}));
    updates.insert("shapes/b/x".into(), json!(5));
    store.update(updates).await.unwrap();

    assert_eq!(store.get("shapes/a/x").await.unwrap(), json!(1));
    assert_eq!(store.get("shapes/b").await.unwrap(), json!({"x": 5}));
}

#[tokio::test]
async fn field_update_keeps_sibling_fields() {
    let store = MemoryStore::new();
    store.set("shapes/a", json!({"id": "a", "x": 1, "fill": "#fff"})).await.unwrap();
    let mut updates = UpdateMap::new();
    updates.insert("shapes/a/fill".into(), json!("#000"));
    store.update(updates).await.unwrap();

    assert_eq!(store.get("shapes/a").await.unwrap(), json!({"id": "a", "x": 1, "fill": "#000"}));
}

#[tokio::test]
async fn null_removes_and_prunes_empty_parents() {
    let store = MemoryStore::new();
    store.set("strokes/k/points", json!([1, 2])).await.unwrap();
    store.set("strokes/k/points", Value::Null).await.unwrap();
    assert_eq!(store.get("strokes").await.unwrap(), Value::Null);
    assert_eq!(store.get("strokes/k").await.unwrap(), Value::Null);
}

#[tokio::test]
async fn set_replaces_whole_subtree() {
    let store = MemoryStore::new();
    store.set("shapes", json!({"a": {"id": "a"}, "b": {"id": "b"}})).await.unwrap();
    store.set("shapes", json!({"c": {"id": "c"}})).await.unwrap();
    assert_eq!(store.get("shapes").await.unwrap(), json!({"c": {"id": "c"}}));
}

#[tokio::test]
async fn subscribe_delivers_current_value_then_changes() {
    let store = MemoryStore::new();
    store.set("shapes/a", json!({"id": "a"})).await.unwrap();

    let mut sub = store.subscribe("shapes").await.unwrap();
    assert_eq!(sub.path(), "shapes");
    assert_eq!(next_value(&mut sub).await, json!({"a": {"id": "a"}}));

    store.set("shapes/b", json!({"id": "b"})).await.unwrap();
    assert_eq!(next_value(&mut sub).await, json!({"a": {"id": "a"}, "b": {"id": "b"}}));
}

#[tokio::test]
async fn subscribe_to_empty_path_waits_for_first_write() {
    let store = MemoryStore::new();
    let mut sub = store.subscribe("strokes").await.unwrap();
    assert_quiet(&mut sub).await;

    store.set("strokes/k", json!({"id": "k"})).await.unwrap();
    assert_eq!(next_value(&mut sub).await, json!({"k": {"id": "k"}}));
}

#[tokio::test]
async fn unrelated_writes_do_not_notify() {
    let store = MemoryStore::new();
    let mut sub = store.subscribe("shapes").await.unwrap();
    store.set("strokes/k", json!({"id": "k"})).await.unwrap();
    assert_quiet(&mut sub).await;
}

#[tokio::test]
async fn ancestor_write_notifies_descendant_subscriber() {
    let store = MemoryStore::new();
    let mut sub = store.subscribe("shapes/a").await.unwrap();
    store.set("", json!({"shapes": {"a": {"id": "a"}}})).await.unwrap();
    assert_eq!(next_value(&mut sub).await, json!({"id": "a"}));
}

#[tokio::test]
async fn dropped_subscriptions_are_pruned() {
    let store = MemoryStore::new();
    let sub = store.subscribe("shapes").await.unwrap();
    assert_eq!(store.subscriber_count(), 1);
    drop(sub);
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test]
async fn offline_store_refuses_io() {
    let store = MemoryStore::new();
    store.set_available(false);
    assert!(!store.is_available());
    assert!(matches!(store.set("a", json!(1)).await, Err(StoreError::Unavailable)));
    assert!(matches!(store.get("a").await, Err(StoreError::Unavailable)));
    assert!(store.subscribe("a").await.is_err());
}

#[tokio::test]
async fn read_only_store_rejects_writes_but_serves_reads() {
    let store = MemoryStore::new();
    store.set("a", json!(1)).await.unwrap();
    store.set_read_only(true);
    assert!(matches!(store.set("a", json!(2)).await, Err(StoreError::Rejected(_))));
    assert_eq!(store.get("a").await.unwrap(), json!(1));
}

#[test]
fn overlap_is_prefix_on_segments() {
    assert!(paths_overlap("shapes", "shapes/a/x"));
    assert!(paths_overlap("shapes/a/x", "shapes"));
    assert!(paths_overlap("", "shapes"));
    assert!(!paths_overlap("shapes/a", "shapes/ab"));
    assert!(!paths_overlap("strokes", "shapes"));
}
