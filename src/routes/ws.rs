//! WebSocket handler — the store protocol served to `WsStore` clients.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall
//! - Snapshot frames from this client's subscriptions → forward to client
//!
//! Handlers validate the request, call the store, and return an `Outcome`.
//! The dispatch layer turns the outcome into the reply frame.
//!
//! SUBSCRIPTIONS
//! =============
//! `store:subscribe` answers `done` and then streams one `item` frame per
//! snapshot, each with `parent_id` set to the subscribe request's id. One
//! forwarder task per subscription feeds the connection's outbound queue; it
//! is aborted by `store:unsubscribe` or when the connection closes.

use std::collections::HashMap;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status};
use crate::patch::UpdateMap;
use crate::state::RelayState;
use crate::store::{RemoteStore, Subscription};

const CLIENT_QUEUE_CAPACITY: usize = 256;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions.
enum Outcome {
    /// Send done+data to sender.
    Reply(Data),
    /// Send empty done to sender.
    Done,
}

/// Live subscriptions of one connection, keyed by subscribe request id.
type Forwarders = HashMap<Uuid, JoinHandle<()>>;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<RelayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: RelayState) {
    let client_id = Uuid::new_v4();

    // Snapshot frames produced by this client's subscriptions.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(CLIENT_QUEUE_CAPACITY);
    let mut forwarders = Forwarders::new();

    info!(%client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &mut forwarders, &client_tx, client_id, text.as_str()).await;
                        if send_all(&mut socket, &replies).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    for (_, forwarder) in forwarders.drain() {
        forwarder.abort();
    }
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Transport concerns stay in `run_ws`, so tests can drive the protocol
/// without a socket.
async fn process_inbound_text(
    state: &RelayState,
    forwarders: &mut Forwarders,
    client_tx: &mpsc::Sender<Frame>,
    client_id: Uuid,
    text: &str,
) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };
    if req.status != Status::Request {
        debug!(%client_id, id = %req.id, status = ?req.status, "ws: ignoring non-request frame");
        return Vec::new();
    }

    info!(%client_id, id = %req.id, syscall = %req.syscall, from = ?req.from, "ws: recv frame");

    let result = match req.prefix() {
        "store" => handle_store(state, forwarders, client_tx, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// STORE HANDLERS
// =============================================================================

async fn handle_store(
    state: &RelayState,
    forwarders: &mut Forwarders,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let store = &state.store;
    match req.op() {
        "get" => {
            let path = required_path(req)?;
            let value = store.get(path).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(Data::from([("value".to_string(), value)])))
        }
        "set" => {
            let path = required_path(req)?;
            let value = req.data.get("value").cloned().unwrap_or(Value::Null);
            store.set(path, value).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Done)
        }
        "update" => {
            let Some(Value::Object(updates)) = req.data.get("updates") else {
                return Err(req.error("updates object required"));
            };
            let updates: UpdateMap = updates.clone().into_iter().collect();
            store.update(updates).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Done)
        }
        "subscribe" => {
            let path = required_path(req)?;
            let subscription = store.subscribe(path).await.map_err(|e| req.error_from(&e))?;
            let forwarder = tokio::spawn(forward(subscription, req.clone(), client_tx.clone()));
            if let Some(previous) = forwarders.insert(req.id, forwarder) {
                previous.abort();
            }
            Ok(Outcome::Done)
        }
        "unsubscribe" => {
            let Some(raw) = req.data_str("subscription") else {
                return Err(req.error("subscription required"));
            };
            let id = Uuid::parse_str(raw).map_err(|e| req.error(format!("invalid subscription id: {e}")))?;
            if let Some(forwarder) = forwarders.remove(&id) {
                forwarder.abort();
            }
            Ok(Outcome::Done)
        }
        op => Err(req.error(format!("unknown op: {op}"))),
    }
}

fn required_path(req: &Frame) -> Result<&str, Frame> {
    match req.data_str("path") {
        Some(path) => Ok(path),
        None => Err(req.error("path required")),
    }
}

/// Relay snapshots of `subscription` to the client as item frames.
async fn forward(mut subscription: Subscription, req: Frame, client_tx: mpsc::Sender<Frame>) {
    while let Some(snapshot) = subscription.next().await {
        let frame = match snapshot {
            Ok(value) => req.item(Data::from([
                ("path".to_string(), Value::String(subscription.path().to_string())),
                ("value".to_string(), value),
            ])),
            Err(e) => req.error_from(&e),
        };
        let terminal = frame.status.is_terminal();
        if client_tx.send(frame).await.is_err() || terminal {
            return;
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_all(socket: &mut WebSocket, frames: &[Frame]) -> Result<(), ()> {
    for frame in frames {
        send_frame(socket, frame).await?;
    }
    Ok(())
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.data_str("code").unwrap_or("-");
        let message = frame.data_str("message").unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        debug!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
