//! In-process realtime store backed by a JSON tree.
//!
//! Serves as the relay's backing store and as the store sessions use in
//! tests. Writes are applied under one lock and fan out to every subscriber
//! whose path is an ancestor or descendant of a written path.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::{RemoteStore, StoreError, Subscription, paths_overlap, segments};
use crate::patch::UpdateMap;

struct Subscriber {
    path: String,
    tx: mpsc::UnboundedSender<Result<Value, StoreError>>,
}

struct MemoryInner {
    root: Value,
    subscribers: Vec<Subscriber>,
    available: bool,
    read_only: bool,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                root: Value::Null,
                subscribers: Vec::new(),
                available: true,
                read_only: false,
            })),
        }
    }

    fn guard(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the store offline or bring it back. Offline stores refuse all I/O.
    pub fn set_available(&self, available: bool) {
        self.guard().available = available;
    }

    /// Reject writes while still serving reads and subscriptions.
    pub fn set_read_only(&self, read_only: bool) {
        self.guard().read_only = read_only;
    }

    /// Synchronous read for callers outside a runtime.
    #[must_use]
    pub fn snapshot(&self, path: &str) -> Value {
        let inner = self.guard();
        value_at(&inner.root, &segments(path)).map_or(Value::Null, normalized)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.guard();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }

    fn write(&self, writes: Vec<(String, Value)>) -> Result<(), StoreError> {
        let mut inner = self.guard();
        if !inner.available {
            return Err(StoreError::Unavailable);
        }
        if inner.read_only {
            return Err(StoreError::Rejected("store is read-only".into()));
        }

        for (path, value) in &writes {
            write_at(&mut inner.root, &segments(path), value.clone());
        }

        let MemoryInner { root, subscribers, .. } = &mut *inner;
        subscribers.retain(|sub| {
            let touched = writes.iter().any(|(path, _)| paths_overlap(path, &sub.path));
            if !touched {
                return !sub.tx.is_closed();
            }
            let value = value_at(root, &segments(&sub.path)).map_or(Value::Null, normalized);
            sub.tx.send(Ok(value)).is_ok()
        });
        debug!(writes = writes.len(), subscribers = subscribers.len(), "memory store: applied write");
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RemoteStore for MemoryStore {
    fn is_available(&self) -> bool {
        self.guard().available
    }

    async fn update(&self, updates: UpdateMap) -> Result<(), StoreError> {
        if updates.keys().any(|k| segments(k).is_empty()) {
            return Err(StoreError::InvalidPath(String::new()));
        }
        self.write(updates.into_iter().collect())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.write(vec![(path.to_string(), value)])
    }

    async fn get(&self, path: &str) -> Result<Value, StoreError> {
        if !self.is_available() {
            return Err(StoreError::Unavailable);
        }
        Ok(self.snapshot(path))
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let mut inner = self.guard();
        if !inner.available {
            return Err(StoreError::Unavailable);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let current = value_at(&inner.root, &segments(path)).map_or(Value::Null, normalized);
        if !current.is_null() && tx.send(Ok(current)).is_err() {
            return Err(StoreError::Closed);
        }
        inner.subscribers.push(Subscriber { path: path.to_string(), tx });
        Ok(Subscription::new(path, rx))
    }
}

// =============================================================================
// TREE
// =============================================================================

fn value_at<'a>(node: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    segs.iter().try_fold(node, |node, seg| node.get(*seg))
}

/// Empty objects read back as absent.
fn normalized(value: &Value) -> Value {
    match value {
        Value::Object(map) if map.is_empty() => Value::Null,
        other => other.clone(),
    }
}

/// Write `value` at `segs`, creating parents. `null` removes the path and
/// prunes parents left empty.
fn write_at(node: &mut Value, segs: &[&str], value: Value) {
    let Some((head, rest)) = segs.split_first() else {
        *node = value;
        return;
    };

    if value.is_null() {
        let Value::Object(map) = node else { return };
        if rest.is_empty() {
            map.remove(*head);
        } else if let Some(child) = map.get_mut(*head) {
            write_at(child, rest, Value::Null);
            if child.is_null() || child.as_object().is_some_and(Map::is_empty) {
                map.remove(*head);
            }
        }
        return;
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry((*head).to_string()).or_insert(Value::Null);
        write_at(child, rest, value);
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
