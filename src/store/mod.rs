//! Remote store — the key-path realtime database the board syncs through.
//!
//! DESIGN
//! ======
//! The session only needs five operations: availability, a multi-key partial
//! update, a full overwrite, a one-shot read, and push subscriptions. Any
//! backend offering those (an in-process tree, a WebSocket relay, a hosted
//! realtime database) plugs in behind `RemoteStore`.
//!
//! Paths are slash-separated (`shapes/{id}/fill`). Writing `null` removes the
//! path. A subscription yields the full value at its path after every write
//! that touches it; duplicate deliveries are allowed.

pub mod local;
pub mod memory;
pub mod ws;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::frame::ErrorCode;
use crate::patch::UpdateMap;

pub use local::{LocalStore, LocalStoreError, export_board, import_board};
pub use memory::MemoryStore;
pub use ws::WsStore;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("remote store is not available")]
    Unavailable,
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable => "E_STORE_UNAVAILABLE",
            Self::InvalidPath(_) => "E_INVALID_PATH",
            Self::Rejected(_) => "E_REJECTED",
            Self::Transport(_) => "E_TRANSPORT",
            Self::Timeout => "E_TIMEOUT",
            Self::Closed => "E_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Transport(_) | Self::Timeout)
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Stream of snapshots at one path. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    path: String,
    rx: mpsc::UnboundedReceiver<Result<Value, StoreError>>,
}

impl Subscription {
    #[must_use]
    pub fn new(path: impl Into<String>, rx: mpsc::UnboundedReceiver<Result<Value, StoreError>>) -> Self {
        Self { path: path.into(), rx }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next snapshot, or `None` once the store side has gone away.
    pub async fn next(&mut self) -> Option<Result<Value, StoreError>> {
        self.rx.recv().await
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Whether the backend is configured and reachable. When false the session
    /// runs local-only.
    fn is_available(&self) -> bool;

    /// Apply every `path → value` pair as one write.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write is rejected or cannot be sent.
    async fn update(&self, updates: UpdateMap) -> Result<(), StoreError>;

    /// Replace the value at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write is rejected or cannot be sent.
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Read the value at `path`; `Value::Null` when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read cannot be performed.
    async fn get(&self, path: &str) -> Result<Value, StoreError>;

    /// Subscribe to `path`. The current value is delivered first when present.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the subscription cannot be registered.
    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError>;
}

// =============================================================================
// PATHS
// =============================================================================

/// Split a slash path into its non-empty segments.
#[must_use]
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// True when one path is an ancestor of (or equal to) the other.
#[must_use]
pub fn paths_overlap(a: &str, b: &str) -> bool {
    let a = segments(a);
    let b = segments(b);
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}
