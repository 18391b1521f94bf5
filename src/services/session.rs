//! Sync session — wires one editor to a remote store.
//!
//! ARCHITECTURE
//! ============
//! ```text
//! caller ─▶ SyncSession ─▶ BoardEditor (under mutex) ─▶ Change
//!                │                                        │
//!                │            debounce / throttle / now ◀─┘
//!                ▼
//!          writer task ─▶ RemoteStore::update ─▶ subscribers
//!                                                     │
//!   subscription tasks ◀──────────────────────────────┘
//!          │
//!          └─▶ decode_entries ─▶ BoardEditor::merge_remote_*
//! ```
//!
//! DESIGN
//! ======
//! Local edits apply synchronously; the session only decides when each
//! resulting `Change` is written. Property edits are debounced per shape and
//! field, drags and resizes are throttled per shape and lane, and everything
//! else is written at once. Before a change is queued, every older pending
//! write it could overtake is flushed, so one record's writes reach the
//! writer in stamp order.
//!
//! A single writer task performs all remote I/O in submission order. It keeps
//! the newest stamp written per record and drops patches that would regress
//! one. Our own writes echo back through the subscriptions and merge as
//! no-ops; there is no local-echo filtering.
//!
//! ERROR HANDLING
//! ==============
//! Remote failures never roll back local state. A failed write is logged, a
//! local backup is written, and a `Notice` is broadcast. While the store is
//! unavailable every write is replaced by a local save.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::board::{BoardEditor, Change, ChangeKind, Resize, ShapeProperty};
use crate::config::SyncConfig;
use crate::consts::{SHAPES_PATH, STROKES_PATH};
use crate::doc::{BoardState, Entity, EntityId, Point, Shape, ShapeKind, Stroke, StrokeStyle, Timestamp};
use crate::frame::ErrorCode;
use crate::merge::{Entry, decode_entries};
use crate::patch::{Patch, to_update_map};
use crate::rate_limit::{Debouncer, Sink, Throttler};
use crate::store::{LocalStore, LocalStoreError, RemoteStore, StoreError, export_board, import_board};

const NOTICE_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("remote store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Local(#[from] LocalStoreError),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("session writer has stopped")]
    Closed,
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Store(e) => e.error_code(),
            Self::Local(LocalStoreError::InvalidFormat(_)) => "E_INVALID_FILE_FORMAT",
            Self::Local(_) => "E_LOCAL_STORE",
            Self::Encode(_) => "E_ENCODE",
            Self::Closed => "E_SESSION_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.retryable())
    }
}

/// Non-blocking user notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A remote write failed; a local backup was attempted.
    RemoteWriteFailed { message: String },
    /// The store was unavailable, so the board was saved locally instead.
    SavedLocally,
    /// A collection subscription could not be opened or ended with an error.
    SubscriptionFailed { path: String, message: String },
}

enum Outbound {
    Write(Change),
    Push { state: BoardState, reply: oneshot::Sender<Result<(), SessionError>> },
    Barrier(oneshot::Sender<()>),
    Stop,
}

/// Independent write channel of one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Lane {
    Property(&'static str),
    Move,
    Resize,
}

enum Shaper {
    Debounce(Debouncer<Change>),
    Throttle(Throttler<Change>),
}

impl Shaper {
    fn call(&self, change: Change) {
        match self {
            Shaper::Debounce(d) => d.call(change),
            Shaper::Throttle(t) => t.call(change),
        }
    }

    fn flush(&self) -> bool {
        match self {
            Shaper::Debounce(d) => d.flush(),
            Shaper::Throttle(t) => t.flush(),
        }
    }

    fn dispose(&self) {
        match self {
            Shaper::Debounce(d) => d.dispose(),
            Shaper::Throttle(t) => t.dispose(),
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

pub struct SyncSession {
    editor: Arc<Mutex<BoardEditor>>,
    config: SyncConfig,
    local: LocalStore,
    outbound: mpsc::UnboundedSender<Outbound>,
    writer: Mutex<Option<JoinHandle<()>>>,
    followers: Mutex<Vec<JoinHandle<()>>>,
    channels: Mutex<HashMap<(EntityId, Lane), Shaper>>,
    notices: broadcast::Sender<Notice>,
}

impl SyncSession {
    /// Start a session with a fresh editor built from `config`.
    pub async fn start(config: SyncConfig, store: Arc<dyn RemoteStore>) -> Self {
        let editor = BoardEditor::from_config(&config);
        Self::start_with_editor(config, editor, store).await
    }

    /// Start a session around an existing editor.
    ///
    /// With the store available both collections are subscribed. Otherwise
    /// the local copy, if any, is loaded and the session runs local-only.
    pub async fn start_with_editor(config: SyncConfig, editor: BoardEditor, store: Arc<dyn RemoteStore>) -> Self {
        let editor = Arc::new(Mutex::new(editor));
        let local = LocalStore::new(config.local_dir.clone());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let (outbound, rx) = mpsc::unbounded_channel();

        let mut followers = Vec::new();
        if store.is_available() {
            followers.push(tokio::spawn(follow::<Shape>(
                Arc::clone(&store),
                Arc::clone(&editor),
                notices.clone(),
                BoardEditor::merge_remote_shapes,
            )));
            followers.push(tokio::spawn(follow::<Stroke>(
                Arc::clone(&store),
                Arc::clone(&editor),
                notices.clone(),
                BoardEditor::merge_remote_strokes,
            )));
        } else {
            match local.load(&config.local_key).await {
                Ok(Some(state)) => lock(&editor).load(state),
                Ok(None) => debug!(key = %config.local_key, "session: no local copy to load"),
                Err(e) => warn!(error = %e, key = %config.local_key, "session: local copy unreadable"),
            }
        }

        let writer = Writer {
            store,
            editor: Arc::clone(&editor),
            local: local.clone(),
            local_key: config.local_key.clone(),
            notices: notices.clone(),
            written: HashMap::new(),
        };
        let writer = tokio::spawn(writer.run(rx));

        info!(actor = %config.actor_id, subscribed = !followers.is_empty(), "session: started");
        Self {
            editor,
            config,
            local,
            outbound,
            writer: Mutex::new(Some(writer)),
            followers: Mutex::new(followers),
            channels: Mutex::new(HashMap::new()),
            notices,
        }
    }

    /// Receiver for notices produced from now on.
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Copy of the current board.
    #[must_use]
    pub fn snapshot(&self) -> BoardState {
        lock(&self.editor).state().clone()
    }

    /// Run `f` against the editor without producing a write.
    pub fn inspect<R>(&self, f: impl FnOnce(&BoardEditor) -> R) -> R {
        f(&lock(&self.editor))
    }

    fn edit<R>(&self, f: impl FnOnce(&mut BoardEditor) -> R) -> R {
        f(&mut lock(&self.editor))
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

impl SyncSession {
    pub fn create_shape(&self, kind: ShapeKind, origin: Point) -> EntityId {
        let (id, change) = self.edit(|ed| ed.create_shape(kind, origin));
        self.submit(change);
        id
    }

    pub fn delete_shape(&self, id: &str) -> bool {
        self.apply(|ed| ed.delete_shape(id))
    }

    pub fn delete_selected(&self) -> bool {
        self.apply(BoardEditor::delete_selected)
    }

    pub fn move_shape(&self, id: &str, to: Point) -> bool {
        self.apply(|ed| ed.move_shape(id, to))
    }

    pub fn resize_shape(&self, id: &str, resize: Resize) -> bool {
        self.apply(|ed| ed.resize_shape(id, resize))
    }

    pub fn update_shape_property(&self, id: &str, property: ShapeProperty) -> bool {
        self.apply(|ed| ed.update_shape_property(id, property))
    }

    pub fn duplicate_shape(&self, id: &str) -> Option<EntityId> {
        let (new_id, change) = self.edit(|ed| ed.duplicate_shape(id))?;
        self.submit(change);
        Some(new_id)
    }

    pub fn bring_to_front(&self, id: &str) -> bool {
        self.apply(|ed| ed.bring_to_front(id))
    }

    pub fn send_to_back(&self, id: &str) -> bool {
        self.apply(|ed| ed.send_to_back(id))
    }

    pub fn move_forward(&self, id: &str) -> bool {
        self.apply(|ed| ed.move_forward(id))
    }

    pub fn move_backward(&self, id: &str) -> bool {
        self.apply(|ed| ed.move_backward(id))
    }

    pub fn select_shape(&self, id: &str) -> bool {
        self.edit(|ed| ed.select_shape(id))
    }

    pub fn clear_selection(&self) {
        self.edit(BoardEditor::clear_selection);
    }

    /// Pointer-up after a drag, resize or edit burst.
    pub fn end_gesture(&self) {
        self.edit(BoardEditor::end_gesture);
    }

    pub fn start_stroke(&self, point: Point, style: &StrokeStyle) -> EntityId {
        self.edit(|ed| ed.start_stroke(point, style))
    }

    pub fn add_point_to_stroke(&self, id: &str, point: Point) -> bool {
        self.edit(|ed| ed.add_point_to_stroke(id, point))
    }

    /// Erase with the configured radius.
    pub fn erase_at_point(&self, point: Point) -> usize {
        let radius = self.config.erase_radius;
        self.edit(|ed| ed.erase_at_point(point, radius))
    }

    /// Pointer-up while drawing or erasing. Returns whether anything was sent.
    pub fn end_stroke(&self) -> bool {
        self.apply(BoardEditor::end_stroke)
    }

    pub fn undo(&self) -> bool {
        self.apply(BoardEditor::undo)
    }

    pub fn redo(&self) -> bool {
        self.apply(BoardEditor::redo)
    }

    fn apply(&self, f: impl FnOnce(&mut BoardEditor) -> Option<Change>) -> bool {
        let Some(change) = self.edit(f) else {
            return false;
        };
        self.submit(change);
        true
    }
}

// =============================================================================
// RATE SHAPING
// =============================================================================

impl SyncSession {
    fn submit(&self, change: Change) {
        let lane = match (change.kind, change.target.as_ref()) {
            (ChangeKind::Property(field), Some(_)) => Some(Lane::Property(field)),
            (ChangeKind::Move, Some(_)) => Some(Lane::Move),
            (ChangeKind::Resize, Some(_)) => Some(Lane::Resize),
            _ => None,
        };

        match (lane, change.target.clone()) {
            (Some(lane), Some(id)) => self.shape_channel(id, lane, change),
            _ => {
                if let (ChangeKind::Delete, Some(id)) = (change.kind, change.target.as_deref()) {
                    self.dispose_channels(id);
                }
                self.flush_pending();
                self.send(Outbound::Write(change));
            }
        }
    }

    fn shape_channel(&self, id: EntityId, lane: Lane, change: Change) {
        let mut channels = lock(&self.channels);
        for ((owner, other), shaper) in channels.iter() {
            if *owner == id && *other != lane {
                shaper.flush();
            }
        }

        let shaper = channels.entry((id, lane)).or_insert_with(|| {
            let sink = self.sink();
            match lane {
                Lane::Property(_) => Shaper::Debounce(Debouncer::new(self.config.property_debounce, sink)),
                Lane::Move | Lane::Resize => Shaper::Throttle(Throttler::new(self.config.drag_throttle, sink)),
            }
        });
        shaper.call(change);
    }

    fn sink(&self) -> Sink<Change> {
        let outbound = self.outbound.clone();
        Arc::new(move |change: Change| {
            if outbound.send(Outbound::Write(change)).is_err() {
                debug!("session: writer gone, dropping shaped write");
            }
        })
    }

    fn dispose_channels(&self, id: &str) {
        lock(&self.channels).retain(|(owner, _), shaper| {
            if owner != id {
                return true;
            }
            shaper.dispose();
            false
        });
    }

    /// Release every pending debounced or throttled write now.
    pub fn flush_pending(&self) -> usize {
        lock(&self.channels).values().filter(|shaper| shaper.flush()).count()
    }

    fn send(&self, message: Outbound) {
        if self.outbound.send(message).is_err() {
            warn!("session: writer has stopped, dropping write");
        }
    }
}

// =============================================================================
// PERSISTENCE
// =============================================================================

impl SyncSession {
    /// Flush pending writes and wait until the writer has handled them.
    pub async fn flush(&self) {
        self.flush_pending();
        let (tx, rx) = oneshot::channel();
        self.send(Outbound::Barrier(tx));
        if rx.await.is_err() {
            debug!("session: writer stopped before barrier");
        }
    }

    /// Overwrite the remote collections with the local board.
    ///
    /// # Errors
    ///
    /// Returns the store error after backing the board up locally.
    pub async fn push_board(&self) -> Result<(), SessionError> {
        self.flush_pending();
        let state = self.snapshot();
        let (reply, rx) = oneshot::channel();
        self.send(Outbound::Push { state, reply });
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Replace the local board, discarding history, and save it locally.
    ///
    /// Pending writes for the old board are dropped. The remote store is not
    /// touched; follow with `push_board` to publish.
    ///
    /// # Errors
    ///
    /// Returns `Local` if the local copy cannot be written.
    pub async fn restore(&self, state: BoardState) -> Result<(), SessionError> {
        let channels = std::mem::take(&mut *lock(&self.channels));
        for shaper in channels.into_values() {
            shaper.dispose();
        }
        let state = self.edit(|ed| {
            ed.load(state);
            ed.state().clone()
        });
        self.local.save(&self.config.local_key, &state).await?;
        Ok(())
    }

    /// Load a board file. The current board is untouched if the file is not
    /// a valid board document.
    ///
    /// # Errors
    ///
    /// Returns `Local(InvalidFormat)` for unparseable files.
    pub async fn import_file(&self, path: &Path) -> Result<(), SessionError> {
        let state = import_board(path).await?;
        self.restore(state).await
    }

    /// Write the current board to a file.
    ///
    /// # Errors
    ///
    /// Returns `Local` if the file cannot be written.
    pub async fn export_file(&self, path: &Path) -> Result<(), SessionError> {
        export_board(&self.snapshot(), path).await?;
        Ok(())
    }

    /// Flush, drain the writer, and stop every background task.
    pub async fn shutdown(self) {
        self.flush().await;
        for task in lock(&self.followers).drain(..) {
            task.abort();
        }
        self.send(Outbound::Stop);
        let writer = lock(&self.writer).take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "session: writer task failed");
            }
        }
        info!(actor = %self.config.actor_id, "session: stopped");
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        for task in lock(&self.followers).drain(..) {
            task.abort();
        }
    }
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

fn notify(notices: &broadcast::Sender<Notice>, notice: Notice) {
    if notices.send(notice).is_err() {
        debug!("session: no notice listeners");
    }
}

/// Merge every snapshot of `T`'s collection into the editor until the
/// subscription ends.
async fn follow<T: Entity>(
    store: Arc<dyn RemoteStore>,
    editor: Arc<Mutex<BoardEditor>>,
    notices: broadcast::Sender<Notice>,
    merge: fn(&mut BoardEditor, Vec<Entry<T>>),
) {
    let path = T::COLLECTION.as_str();
    let mut subscription = match store.subscribe(path).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(error = %e, path, "session: subscribe failed");
            notify(&notices, Notice::SubscriptionFailed { path: path.into(), message: e.to_string() });
            return;
        }
    };

    while let Some(snapshot) = subscription.next().await {
        match snapshot {
            Ok(value) => {
                let entries = decode_entries::<T>(&value);
                debug!(path, entries = entries.len(), "session: remote snapshot");
                merge(&mut lock(&editor), entries);
            }
            Err(e) => {
                warn!(error = %e, path, "session: subscription failed");
                notify(&notices, Notice::SubscriptionFailed { path: path.into(), message: e.to_string() });
                return;
            }
        }
    }
    debug!(path, "session: subscription ended");
}

// =============================================================================
// WRITER
// =============================================================================

struct Writer {
    store: Arc<dyn RemoteStore>,
    editor: Arc<Mutex<BoardEditor>>,
    local: LocalStore,
    local_key: String,
    notices: broadcast::Sender<Notice>,
    /// Newest stamp written per record path.
    written: HashMap<String, Timestamp>,
}

impl Writer {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Outbound>) {
        while let Some(message) = rx.recv().await {
            match message {
                Outbound::Write(change) => self.write(change).await,
                Outbound::Push { state, reply } => {
                    let result = self.push(&state).await;
                    if reply.send(result).is_err() {
                        debug!("session: push caller went away");
                    }
                }
                Outbound::Barrier(done) => {
                    if done.send(()).is_err() {
                        debug!("session: flush caller went away");
                    }
                }
                Outbound::Stop => break,
            }
        }
        debug!("session: writer stopped");
    }

    async fn write(&mut self, change: Change) {
        if !self.store.is_available() {
            self.save_locally().await;
            notify(&self.notices, Notice::SavedLocally);
            return;
        }

        let patches = self.admit(change.patches, change.stamp);
        if patches.is_empty() {
            return;
        }
        let updates = match to_update_map(&patches) {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, kind = ?change.kind, "session: could not encode write");
                notify(&self.notices, Notice::RemoteWriteFailed { message: e.to_string() });
                return;
            }
        };

        match self.store.update(updates).await {
            Ok(()) => {
                for patch in &patches {
                    let stamp = patch_stamp(patch, change.stamp);
                    self.written.insert(patch.path().to_string(), stamp);
                }
                debug!(kind = ?change.kind, patches = patches.len(), "session: write sent");
            }
            Err(e) => {
                warn!(error = %e, kind = ?change.kind, "session: remote write failed");
                self.save_locally().await;
                notify(&self.notices, Notice::RemoteWriteFailed { message: e.to_string() });
            }
        }
    }

    /// Drop patches for records that already received a write at least as new.
    fn admit(&self, patches: Vec<Patch>, fallback: Timestamp) -> Vec<Patch> {
        patches
            .into_iter()
            .filter(|patch| {
                let stamp = patch_stamp(patch, fallback);
                let fresh = self.written.get(patch.path()).is_none_or(|seen| stamp > *seen);
                if !fresh {
                    debug!(key = %patch.key(), stamp, "session: dropping superseded write");
                }
                fresh
            })
            .collect()
    }

    async fn push(&mut self, state: &BoardState) -> Result<(), SessionError> {
        let result = self.push_collections(state).await;
        match &result {
            Ok(()) => {
                for shape in &state.shapes {
                    self.written.insert(Shape::COLLECTION.path(&shape.id), shape.updated_at.unwrap_or(0));
                }
                for stroke in &state.strokes {
                    self.written.insert(Stroke::COLLECTION.path(&stroke.id), stroke.updated_at.unwrap_or(0));
                }
                info!(shapes = state.shapes.len(), strokes = state.strokes.len(), "session: board pushed");
            }
            Err(e) => {
                warn!(error = %e, "session: board push failed");
                self.save_locally().await;
            }
        }
        result
    }

    async fn push_collections(&self, state: &BoardState) -> Result<(), SessionError> {
        if !self.store.is_available() {
            return Err(StoreError::Unavailable.into());
        }
        self.store.set(SHAPES_PATH, keyed(&state.shapes)?).await?;
        self.store.set(STROKES_PATH, keyed(&state.strokes)?).await?;
        Ok(())
    }

    async fn save_locally(&self) {
        let state = lock(&self.editor).state().clone();
        if let Err(e) = self.local.save(&self.local_key, &state).await {
            warn!(error = %e, key = %self.local_key, "session: local save failed");
        }
    }
}

/// Stamp a patch asserts for its record.
fn patch_stamp(patch: &Patch, fallback: Timestamp) -> Timestamp {
    match patch {
        Patch::FullObject { value, .. } => value.updated_at().unwrap_or(fallback),
        Patch::Tombstone { ts, .. } => *ts,
        Patch::FieldSet { .. } => fallback,
    }
}

/// Collection value as stored remotely: records keyed by id.
fn keyed<T: Entity>(items: &[T]) -> Result<Value, serde_json::Error> {
    let mut map = Map::new();
    for item in items {
        map.insert(item.id().to_string(), serde_json::to_value(item)?);
    }
    Ok(Value::Object(map))
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
