//! WebSocket client for the relay — a `RemoteStore` over JSON frames.
//!
//! DESIGN
//! ======
//! One connection, two tasks. The writer drains an mpsc queue of outbound
//! frames into the socket. The reader routes inbound frames by `parent_id`:
//! terminal frames complete the pending request they answer; item frames are
//! snapshots for the subscription opened by that request id.
//!
//! A subscription is registered before its request is sent, so a snapshot
//! pushed right after the relay's `done` cannot be missed. When the consumer
//! drops a subscription, the next snapshot for it fails to deliver and the
//! client tells the relay to stop sending.
//!
//! ERROR HANDLING
//! ==============
//! When the socket closes every pending request resolves to `Closed`, every
//! live subscription receives one `Closed` error, and `is_available` turns
//! false. There is no reconnect; the session falls back to local persistence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{RemoteStore, StoreError, Subscription};
use crate::frame::{Data, FRAME_CODE, FRAME_MESSAGE, Frame, Status};
use crate::patch::UpdateMap;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type SnapshotSender = mpsc::UnboundedSender<Result<Value, StoreError>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct WsInner {
    outbound: mpsc::UnboundedSender<Frame>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<Frame>>>,
    subscriptions: Mutex<HashMap<Uuid, SnapshotSender>>,
    connected: Arc<AtomicBool>,
    actor: Option<String>,
    timeout: Duration,
}

#[derive(Clone)]
pub struct WsStore {
    inner: Arc<WsInner>,
}

impl WsStore {
    /// Connect to a relay at `url` (e.g. `ws://127.0.0.1:3000/ws`).
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the WebSocket handshake fails.
    pub async fn connect(url: &str, actor: Option<String>) -> Result<Self, StoreError> {
        Self::connect_with_timeout(url, actor, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Connect with an explicit per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the WebSocket handshake fails.
    pub async fn connect_with_timeout(
        url: &str,
        actor: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let (stream, _) = connect_async(url).await.map_err(|e| StoreError::Transport(e.to_string()))?;
        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let connected = Arc::new(AtomicBool::new(true));

        let inner = Arc::new(WsInner {
            outbound,
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            connected: Arc::clone(&connected),
            actor,
            timeout,
        });
        info!(%url, "ws store: connected");

        // The writer ends when the last handle drops the outbound sender.
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "ws store: failed to serialize frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    warn!(error = %e, "ws store: send failed");
                    break;
                }
            }
            connected.store(false, Ordering::SeqCst);
        });

        let reader_inner: Weak<WsInner> = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                let Some(inner) = reader_inner.upgrade() else { return };
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(text.as_str()) {
                        Ok(frame) => inner.route(frame),
                        Err(e) => warn!(error = %e, "ws store: invalid inbound frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "ws store: receive failed");
                        break;
                    }
                }
            }
            if let Some(inner) = reader_inner.upgrade() {
                inner.shutdown();
            }
        });

        Ok(Self { inner })
    }

    /// Send `req` and wait for its terminal response.
    async fn request(&self, mut req: Frame) -> Result<Frame, StoreError> {
        if !self.is_available() {
            return Err(StoreError::Unavailable);
        }
        if let Some(actor) = &self.inner.actor {
            req.from = Some(actor.clone());
        }
        let id = req.id;
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(id, tx);

        if self.inner.outbound.send(req).is_err() {
            lock(&self.inner.pending).remove(&id);
            return Err(StoreError::Closed);
        }

        let reply = match tokio::time::timeout(self.inner.timeout, rx).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => return Err(StoreError::Closed),
            Err(_) => {
                lock(&self.inner.pending).remove(&id);
                return Err(StoreError::Timeout);
            }
        };

        match reply.status {
            Status::Error => Err(error_from_frame(&reply)),
            _ => Ok(reply),
        }
    }
}

impl WsInner {
    fn route(&self, frame: Frame) {
        let Some(parent) = frame.parent_id else {
            debug!(syscall = %frame.syscall, "ws store: ignoring uncorrelated frame");
            return;
        };

        if frame.status == Status::Item {
            let mut subs = lock(&self.subscriptions);
            let Some(tx) = subs.get(&parent) else { return };
            let value = frame.data.get("value").cloned().unwrap_or(Value::Null);
            if tx.send(Ok(value)).is_err() {
                subs.remove(&parent);
                drop(subs);
                self.unsubscribe(parent);
            }
            return;
        }

        if let Some(tx) = lock(&self.pending).remove(&parent) {
            if tx.send(frame).is_err() {
                debug!(%parent, "ws store: response arrived after caller gave up");
            }
            return;
        }

        if frame.status == Status::Error {
            if let Some(tx) = lock(&self.subscriptions).remove(&parent) {
                if tx.send(Err(error_from_frame(&frame))).is_err() {
                    debug!(%parent, "ws store: subscription already dropped");
                }
            }
        }
    }

    fn unsubscribe(&self, subscription: Uuid) {
        let req = Frame::request("store:unsubscribe", Data::new()).with_data("subscription", subscription.to_string());
        if self.outbound.send(req).is_err() {
            debug!(%subscription, "ws store: connection gone before unsubscribe");
        }
    }

    fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.pending).clear();
        for (_, tx) in lock(&self.subscriptions).drain() {
            if tx.send(Err(StoreError::Closed)).is_err() {
                continue;
            }
        }
        info!("ws store: disconnected");
    }
}

fn error_from_frame(frame: &Frame) -> StoreError {
    let message = frame.data_str(FRAME_MESSAGE).unwrap_or("unknown error").to_string();
    match frame.data_str(FRAME_CODE) {
        Some("E_STORE_UNAVAILABLE") => StoreError::Unavailable,
        Some("E_INVALID_PATH") => StoreError::InvalidPath(message),
        _ => StoreError::Rejected(message),
    }
}

#[async_trait::async_trait]
impl RemoteStore for WsStore {
    fn is_available(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn update(&self, updates: UpdateMap) -> Result<(), StoreError> {
        let updates: serde_json::Map<String, Value> = updates.into_iter().collect();
        let req = Frame::request("store:update", Data::new()).with_data("updates", Value::Object(updates));
        self.request(req).await.map(|_| ())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let req = Frame::request("store:set", Data::new()).with_data("path", path).with_data("value", value);
        self.request(req).await.map(|_| ())
    }

    async fn get(&self, path: &str) -> Result<Value, StoreError> {
        let req = Frame::request("store:get", Data::new()).with_data("path", path);
        let reply = self.request(req).await?;
        Ok(reply.data.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let req = Frame::request("store:subscribe", Data::new()).with_data("path", path);
        let id = req.id;
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscriptions).insert(id, tx);

        if let Err(e) = self.request(req).await {
            lock(&self.inner.subscriptions).remove(&id);
            return Err(e);
        }
        Ok(Subscription::new(path, rx))
    }
}
