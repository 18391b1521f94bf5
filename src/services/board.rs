//! Board editor — local shape and stroke mutations with LWW stamping.
//!
//! DESIGN
//! ======
//! Every mutation updates the in-memory board immediately, stamps the touched
//! records with a fresh `updatedAt`/`updatedBy`, records an undo entry, and
//! returns a `Change` describing what must be written remotely. The editor
//! never talks to the store; the session decides when and how each change
//! reaches it.
//!
//! Stamps are strictly increasing per editor (`max(now, last + 1)`), so two
//! edits in the same millisecond still order correctly against each other.
//!
//! Remote snapshots enter through `merge_remote_shapes`/`merge_remote_strokes`.
//! They replace state underneath the history log without recording anything,
//! and keep a tombstone ledger per collection so late deliveries of deleted
//! records cannot resurrect them.
//!
//! PERMISSIONS
//! ===========
//! A shape whose meta forbids an operation is left untouched and the
//! operation returns `None`. Strokes are only removable by the eraser when
//! `isErasable` is set.
//!
//! STROKES
//! =======
//! A stroke is stamped when it starts and frozen when it ends. Strokes are
//! written on pointer-up, together with any eraser tombstones produced during
//! the gesture, as one multi-key update.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::consts::{CANVAS_HEIGHT, CANVAS_WIDTH, DEFAULT_GRID_SIZE, DUPLICATE_OFFSET, MAX_HISTORY_SIZE};
use crate::doc::{
    ActorId, BoardSlice, BoardState, Entity, EntityId, Point, Shape, ShapeKind, Snapshot, Stroke, StrokeStyle,
    TextAlign, Timestamp, VerticalAlign, snap_to_grid,
};
use crate::history::{ActionKind, History, HistoryEntry};
use crate::merge::{Entry, Tombstone, TombstoneLedger, merge_remote};
use crate::patch::{Object, Patch};

// =============================================================================
// TYPES
// =============================================================================

/// What produced a `Change`. The session picks a write policy from this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Create,
    Delete,
    Move,
    Resize,
    Duplicate,
    /// Edit of one property, named by its store field path.
    Property(&'static str),
    Reorder,
    StrokeFlush,
    Undo,
    Redo,
}

/// Outbound effect of one local mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    /// Shape the change is about, when there is exactly one.
    pub target: Option<EntityId>,
    /// Stamp written on the touched records.
    pub stamp: Timestamp,
    pub patches: Vec<Patch>,
}

impl Change {
    fn new(kind: ChangeKind, target: Option<EntityId>, stamp: Timestamp, patches: Vec<Patch>) -> Self {
        Self { kind, target, stamp, patches }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

/// New geometry for a resize. Position is optional because handles on the
/// right and bottom edges only change the size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resize {
    pub width: f64,
    pub height: f64,
    pub x: Option<f64>,
    pub y: Option<f64>,
}

impl Resize {
    #[must_use]
    pub fn size(width: f64, height: f64) -> Self {
        Self { width, height, x: None, y: None }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: Point) -> Self {
        self.x = Some(origin.x);
        self.y = Some(origin.y);
        self
    }
}

/// One editable property of a shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeProperty {
    Fill(String),
    Opacity(f64),
    Rotation(f64),
    Content(String),
    TextAlign(TextAlign),
    VerticalAlign(VerticalAlign),
    FontSize(f64),
    ImageSrc(String),
    Movable(bool),
    Deletable(bool),
    Resizable(bool),
    Erasable(bool),
}

impl ShapeProperty {
    /// Store field path, relative to the shape record.
    #[must_use]
    pub fn field(&self) -> &'static str {
        match self {
            ShapeProperty::Fill(_) => "fill",
            ShapeProperty::Opacity(_) => "opacity",
            ShapeProperty::Rotation(_) => "rotation",
            ShapeProperty::Content(_) => "content",
            ShapeProperty::TextAlign(_) => "textAlign",
            ShapeProperty::VerticalAlign(_) => "verticalAlign",
            ShapeProperty::FontSize(_) => "fontSize",
            ShapeProperty::ImageSrc(_) => "imageSrc",
            ShapeProperty::Movable(_) => "meta/isMovable",
            ShapeProperty::Deletable(_) => "meta/isDeletable",
            ShapeProperty::Resizable(_) => "meta/isResizable",
            ShapeProperty::Erasable(_) => "meta/isErasable",
        }
    }

    /// Write the property into `shape`. Returns the stored value, or `None`
    /// when the property does not exist on the shape's variant.
    fn apply_to(&self, shape: &mut Shape) -> Option<Value> {
        let value = match (self, &mut shape.kind) {
            (ShapeProperty::Fill(fill), _) => {
                shape.fill.clone_from(fill);
                json!(fill)
            }
            (ShapeProperty::Opacity(opacity), _) => {
                shape.opacity = opacity.clamp(0.0, 1.0);
                json!(shape.opacity)
            }
            (ShapeProperty::Rotation(rotation), _) => {
                shape.rotation = *rotation;
                json!(rotation)
            }
            (ShapeProperty::Content(text), ShapeKind::Text { content, .. }) => {
                content.clone_from(text);
                json!(text)
            }
            (ShapeProperty::TextAlign(align), ShapeKind::Text { text_align, .. }) => {
                *text_align = *align;
                json!(align.as_str())
            }
            (ShapeProperty::VerticalAlign(align), ShapeKind::Text { vertical_align, .. }) => {
                *vertical_align = *align;
                json!(align.as_str())
            }
            (ShapeProperty::FontSize(size), ShapeKind::Text { font_size, .. }) if *size > 0.0 => {
                *font_size = *size;
                json!(size)
            }
            (ShapeProperty::ImageSrc(src), ShapeKind::Image { image_src }) => {
                *image_src = Some(src.clone());
                json!(src)
            }
            (ShapeProperty::Movable(flag), _) => {
                shape.meta.is_movable = *flag;
                json!(flag)
            }
            (ShapeProperty::Deletable(flag), _) => {
                shape.meta.is_deletable = *flag;
                json!(flag)
            }
            (ShapeProperty::Resizable(flag), _) => {
                shape.meta.is_resizable = *flag;
                json!(flag)
            }
            (ShapeProperty::Erasable(flag), _) => {
                shape.meta.is_erasable = *flag;
                json!(flag)
            }
            _ => return None,
        };
        Some(value)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn z_of(index: usize) -> i64 {
    index as i64
}

// =============================================================================
// EDITOR
// =============================================================================

pub struct BoardEditor {
    state: BoardState,
    actor: ActorId,
    grid_size: f64,
    clock: Arc<dyn Clock>,
    last_stamp: Timestamp,
    history: History,
    shape_graveyard: TombstoneLedger,
    stroke_graveyard: TombstoneLedger,
    /// Stroke currently receiving points.
    drawing: Option<EntityId>,
    /// Writes produced during the current pointer gesture, sent on pointer-up.
    unflushed: Vec<Patch>,
}

impl std::fmt::Debug for BoardEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardEditor")
            .field("actor", &self.actor)
            .field("shapes", &self.state.shapes.len())
            .field("strokes", &self.state.strokes.len())
            .field("drawing", &self.drawing)
            .finish_non_exhaustive()
    }
}

impl BoardEditor {
    /// Empty board for `actor` on the system clock.
    #[must_use]
    pub fn new(actor: impl Into<ActorId>) -> Self {
        Self {
            state: BoardState::default(),
            actor: actor.into(),
            grid_size: DEFAULT_GRID_SIZE,
            clock: Arc::new(SystemClock),
            last_stamp: 0,
            history: History::with_capacity(MAX_HISTORY_SIZE),
            shape_graveyard: TombstoneLedger::new(),
            stroke_graveyard: TombstoneLedger::new(),
            drawing: None,
            unflushed: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.actor_id.clone())
            .with_grid_size(config.grid_size)
            .with_history_size(config.history_size)
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_grid_size(mut self, grid_size: f64) -> Self {
        self.grid_size = grid_size;
        self
    }

    #[must_use]
    pub fn with_history_size(mut self, capacity: usize) -> Self {
        self.history = History::with_capacity(capacity);
        self
    }

    #[must_use]
    pub fn state(&self) -> &BoardState {
        &self.state
    }

    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    #[must_use]
    pub fn shape(&self, id: &str) -> Option<&Shape> {
        self.state.shape(id)
    }

    #[must_use]
    pub fn stroke(&self, id: &str) -> Option<&Stroke> {
        self.state.stroke(id)
    }

    #[must_use]
    pub fn selected_id(&self) -> Option<&str> {
        self.state.selected_id.as_deref()
    }

    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.history.can_undo() || self.drawing.is_some()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    #[must_use]
    pub fn is_drawing(&self) -> bool {
        self.drawing.is_some()
    }

    fn next_stamp(&mut self) -> Timestamp {
        let ts = self.clock.now_ms().max(self.last_stamp + 1);
        self.last_stamp = ts;
        ts
    }

    fn snap(&self, value: f64) -> f64 {
        snap_to_grid(value, self.grid_size)
    }

    fn select(&mut self, id: Option<EntityId>) {
        self.state.selected_id = id;
        self.state.apply_selection();
    }
}

// =============================================================================
// SHAPES
// =============================================================================

impl BoardEditor {
    /// Create a shape with the variant defaults at `origin`, snapped to the
    /// grid, on top of the stack. The new shape becomes the selection.
    pub fn create_shape(&mut self, kind: ShapeKind, origin: Point) -> (EntityId, Change) {
        let id = Uuid::new_v4().to_string();
        let ids = [id.clone()];
        let before = BoardSlice::shapes_of(&self.state, &ids);
        let origin = Point::new(self.snap(origin.x), self.snap(origin.y));

        let mut shape = Shape::new(id.clone(), kind, origin);
        shape.z_index = z_of(self.state.shapes.len());
        let ts = self.next_stamp();
        shape.stamp(ts, &self.actor);

        self.state.shapes.push(shape.clone());
        self.select(Some(id.clone()));
        self.history
            .record(HistoryEntry::new(ActionKind::CreateShape, ts, before, BoardSlice::shapes_of(&self.state, &ids)));

        debug!(%id, kind = shape.kind.type_name(), "board: shape created");
        (id.clone(), Change::new(ChangeKind::Create, Some(id), ts, vec![Patch::full(shape)]))
    }

    /// Delete a shape, leaving a tombstone so peers drop it too.
    pub fn delete_shape(&mut self, id: &str) -> Option<Change> {
        let index = self.state.shape_index(id)?;
        if !self.state.shapes[index].meta.is_deletable {
            debug!(%id, "board: delete refused, shape is not deletable");
            return None;
        }

        let ids = [id.to_string()];
        let before = BoardSlice::shapes_of(&self.state, &ids);
        self.state.shapes.remove(index);
        self.state.apply_selection();

        let ts = self.next_stamp();
        self.shape_graveyard.record(Tombstone {
            id: id.to_string(),
            updated_at: Some(ts),
            updated_by: Some(self.actor.clone()),
        });
        self.history
            .record(HistoryEntry::new(ActionKind::DeleteShape, ts, before, BoardSlice::shapes_of(&self.state, &ids)));

        let patch = Patch::tombstone(Shape::COLLECTION, id, &self.actor, ts);
        Some(Change::new(ChangeKind::Delete, Some(id.to_string()), ts, vec![patch]))
    }

    /// Delete whatever is selected.
    pub fn delete_selected(&mut self) -> Option<Change> {
        let id = self.state.selected_id.clone()?;
        self.delete_shape(&id)
    }

    /// Move a shape's origin to `to`, clamped so the shape stays on the canvas.
    ///
    /// Consecutive moves of the same shape coalesce into one undo step until
    /// `end_gesture` is called.
    pub fn move_shape(&mut self, id: &str, to: Point) -> Option<Change> {
        let index = self.state.shape_index(id)?;
        let shape = &self.state.shapes[index];
        if !shape.meta.is_movable {
            debug!(%id, "board: move refused, shape is not movable");
            return None;
        }

        let max_x = (CANVAS_WIDTH - shape.width_or_default()).max(0.0);
        let max_y = (CANVAS_HEIGHT - shape.height_or_default()).max(0.0);
        let x = to.x.clamp(0.0, max_x);
        let y = to.y.clamp(0.0, max_y);

        let ids = [id.to_string()];
        let before = BoardSlice::shapes_of(&self.state, &ids);
        let ts = self.next_stamp();
        let shape = &mut self.state.shapes[index];
        shape.x = x;
        shape.y = y;
        shape.stamp(ts, &self.actor);
        let patches = Patch::shape_edit(shape, vec![("x", json!(x)), ("y", json!(y))]);

        self.history.record_continuous(
            HistoryEntry::new(ActionKind::UpdateShape, ts, before, BoardSlice::shapes_of(&self.state, &ids)),
            format!("move:{id}"),
        );
        Some(Change::new(ChangeKind::Move, Some(id.to_string()), ts, patches))
    }

    /// Resize a shape. Every dimension snaps to the grid and never drops
    /// below one grid cell.
    pub fn resize_shape(&mut self, id: &str, resize: Resize) -> Option<Change> {
        let index = self.state.shape_index(id)?;
        if !self.state.shapes[index].meta.is_resizable {
            debug!(%id, "board: resize refused, shape is not resizable");
            return None;
        }

        let min = self.grid_size.max(1.0);
        let width = self.snap(resize.width).max(min);
        let height = self.snap(resize.height).max(min);
        let x = resize.x.map(|x| self.snap(x));
        let y = resize.y.map(|y| self.snap(y));

        let ids = [id.to_string()];
        let before = BoardSlice::shapes_of(&self.state, &ids);
        let ts = self.next_stamp();
        let shape = &mut self.state.shapes[index];
        shape.width = Some(width);
        shape.height = Some(height);
        let mut fields = vec![("width", json!(width)), ("height", json!(height))];
        if let Some(x) = x {
            shape.x = x;
            fields.push(("x", json!(x)));
        }
        if let Some(y) = y {
            shape.y = y;
            fields.push(("y", json!(y)));
        }
        shape.stamp(ts, &self.actor);
        let patches = Patch::shape_edit(shape, fields);

        self.history.record_continuous(
            HistoryEntry::new(ActionKind::UpdateShape, ts, before, BoardSlice::shapes_of(&self.state, &ids)),
            format!("resize:{id}"),
        );
        Some(Change::new(ChangeKind::Resize, Some(id.to_string()), ts, patches))
    }

    /// Set one property. Repeated edits of the same property coalesce into one
    /// undo step, so typing into a text box undoes as a unit.
    pub fn update_shape_property(&mut self, id: &str, property: ShapeProperty) -> Option<Change> {
        let index = self.state.shape_index(id)?;
        let ids = [id.to_string()];
        let before = BoardSlice::shapes_of(&self.state, &ids);

        let mut edited = self.state.shapes[index].clone();
        let Some(value) = property.apply_to(&mut edited) else {
            debug!(%id, field = property.field(), "board: property does not apply to shape");
            return None;
        };

        let ts = self.next_stamp();
        edited.stamp(ts, &self.actor);
        let patches = Patch::shape_edit(&edited, vec![(property.field(), value)]);
        self.state.shapes[index] = edited;

        self.history.record_continuous(
            HistoryEntry::new(ActionKind::UpdateShape, ts, before, BoardSlice::shapes_of(&self.state, &ids)),
            format!("property:{id}:{}", property.field()),
        );
        Some(Change::new(ChangeKind::Property(property.field()), Some(id.to_string()), ts, patches))
    }

    /// Copy a shape, offset down and to the right, on top of the stack.
    pub fn duplicate_shape(&mut self, id: &str) -> Option<(EntityId, Change)> {
        let mut copy = self.state.shape(id)?.clone();
        let new_id = Uuid::new_v4().to_string();
        let ids = [new_id.clone()];
        let before = BoardSlice::shapes_of(&self.state, &ids);

        copy.id.clone_from(&new_id);
        copy.x += DUPLICATE_OFFSET;
        copy.y += DUPLICATE_OFFSET;
        copy.z_index = z_of(self.state.shapes.len());
        let ts = self.next_stamp();
        copy.stamp(ts, &self.actor);

        self.state.shapes.push(copy.clone());
        self.select(Some(new_id.clone()));
        self.history
            .record(HistoryEntry::new(ActionKind::DuplicateShape, ts, before, BoardSlice::shapes_of(&self.state, &ids)));

        let change = Change::new(ChangeKind::Duplicate, Some(new_id.clone()), ts, vec![Patch::full(copy)]);
        Some((new_id, change))
    }

    pub fn select_shape(&mut self, id: &str) -> bool {
        if self.state.shape(id).is_none() {
            return false;
        }
        self.select(Some(id.to_string()));
        true
    }

    pub fn clear_selection(&mut self) {
        self.select(None);
    }

    /// Close any open continuous gesture (drag, resize, typing).
    pub fn end_gesture(&mut self) {
        self.history.seal();
    }
}

// =============================================================================
// Z-ORDER
// =============================================================================

impl BoardEditor {
    pub fn bring_to_front(&mut self, id: &str) -> Option<Change> {
        self.reorder(id, |_, len| len - 1)
    }

    pub fn send_to_back(&mut self, id: &str) -> Option<Change> {
        self.reorder(id, |_, _| 0)
    }

    pub fn move_forward(&mut self, id: &str) -> Option<Change> {
        self.reorder(id, |from, len| (from + 1).min(len - 1))
    }

    pub fn move_backward(&mut self, id: &str) -> Option<Change> {
        self.reorder(id, |from, _| from.saturating_sub(1))
    }

    /// Move one shape to a new stack position and reindex densely.
    ///
    /// Only shapes whose `zIndex` actually changed are stamped and written.
    fn reorder(&mut self, id: &str, target: impl FnOnce(usize, usize) -> usize) -> Option<Change> {
        let from = self.state.shape_index(id)?;
        let to = target(from, self.state.shapes.len());
        if to == from {
            return None;
        }

        let previous = self.state.clone();
        let shape = self.state.shapes.remove(from);
        self.state.shapes.insert(to, shape);

        let ts = self.next_stamp();
        let mut patches = Vec::new();
        let mut changed = Vec::new();
        for (index, shape) in self.state.shapes.iter_mut().enumerate() {
            let z = z_of(index);
            if shape.z_index == z {
                continue;
            }
            shape.z_index = z;
            shape.stamp(ts, &self.actor);
            patches.extend(Patch::shape_edit(shape, vec![("zIndex", json!(z))]));
            changed.push(shape.id.clone());
        }

        let before = BoardSlice::shapes_of(&previous, &changed);
        self.history
            .record(HistoryEntry::new(ActionKind::Reorder, ts, before, BoardSlice::shapes_of(&self.state, &changed)));
        Some(Change::new(ChangeKind::Reorder, Some(id.to_string()), ts, patches))
    }
}

// =============================================================================
// STROKES
// =============================================================================

impl BoardEditor {
    /// Begin a stroke at `point`. A stroke still in progress is finished first.
    pub fn start_stroke(&mut self, point: Point, style: &StrokeStyle) -> EntityId {
        self.finish_drawing();

        let id = Uuid::new_v4().to_string();
        let mut stroke = Stroke::new(id.clone(), style, point);
        let ts = self.next_stamp();
        stroke.stamp(ts, &self.actor);
        self.state.strokes.push(stroke);
        self.drawing = Some(id.clone());
        id
    }

    /// Append a point to the stroke being drawn. Frozen strokes ignore it.
    pub fn add_point_to_stroke(&mut self, id: &str, point: Point) -> bool {
        if self.drawing.as_deref() != Some(id) {
            return false;
        }
        let Some(stroke) = self.state.strokes.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        stroke.points.push(point);
        true
    }

    /// Remove every erasable stroke with a point within `radius` of `point`.
    ///
    /// Tombstones are queued and written when the gesture ends. Returns the
    /// number of strokes removed.
    pub fn erase_at_point(&mut self, point: Point, radius: f64) -> usize {
        let hits: Vec<EntityId> = self
            .state
            .strokes
            .iter()
            .filter(|s| s.is_erasable && s.is_hit(point, radius))
            .filter(|s| self.drawing.as_deref() != Some(s.id.as_str()))
            .map(|s| s.id.clone())
            .collect();
        if hits.is_empty() {
            return 0;
        }

        let before = BoardSlice::strokes_of(&self.state, &hits);
        self.state.strokes.retain(|s| !hits.contains(&s.id));

        let ts = self.next_stamp();
        for id in &hits {
            self.stroke_graveyard.record(Tombstone {
                id: id.clone(),
                updated_at: Some(ts),
                updated_by: Some(self.actor.clone()),
            });
            self.unflushed.push(Patch::tombstone(Stroke::COLLECTION, id, &self.actor, ts));
        }

        self.history.record_continuous(
            HistoryEntry::new(ActionKind::EraseStrokes, ts, before, BoardSlice::strokes_of(&self.state, &hits)),
            "erase",
        );
        hits.len()
    }

    /// Pointer-up: freeze the stroke being drawn and flush every write of the
    /// gesture as one change.
    pub fn end_stroke(&mut self) -> Option<Change> {
        self.finish_drawing();
        self.history.seal();
        if self.unflushed.is_empty() {
            return None;
        }
        let patches = std::mem::take(&mut self.unflushed);
        Some(Change::new(ChangeKind::StrokeFlush, None, self.last_stamp, patches))
    }

    /// Freeze the stroke being drawn, if any, and queue its write.
    fn finish_drawing(&mut self) {
        let Some(id) = self.drawing.take() else { return };
        let before = BoardSlice { strokes: vec![(id.clone(), None)], ..BoardSlice::default() };

        let ts = self.next_stamp();
        let Some(stroke) = self.state.strokes.iter_mut().find(|s| s.id == id) else {
            return;
        };
        stroke.stamp(ts, &self.actor);
        self.unflushed.push(Patch::full(stroke.clone()));
        self.history
            .record(HistoryEntry::new(ActionKind::CreateStroke, ts, before, BoardSlice::strokes_of(&self.state, &[id])));
    }
}

// =============================================================================
// HISTORY
// =============================================================================

impl BoardEditor {
    /// Revert the newest local action.
    ///
    /// An unfinished gesture is completed first, so undo while drawing
    /// removes the stroke being drawn.
    pub fn undo(&mut self) -> Option<Change> {
        let pending = self.take_gesture();
        let Some(slice) = self.history.undo() else {
            return self.flush_only(pending);
        };
        Some(self.restore_slice(&slice, ChangeKind::Undo, pending))
    }

    /// Re-apply the newest undone action.
    pub fn redo(&mut self) -> Option<Change> {
        let pending = self.take_gesture();
        let Some(slice) = self.history.redo() else {
            return self.flush_only(pending);
        };
        Some(self.restore_slice(&slice, ChangeKind::Redo, pending))
    }

    fn take_gesture(&mut self) -> Vec<Patch> {
        self.finish_drawing();
        self.history.seal();
        std::mem::take(&mut self.unflushed)
    }

    fn flush_only(&self, pending: Vec<Patch>) -> Option<Change> {
        (!pending.is_empty()).then(|| Change::new(ChangeKind::StrokeFlush, None, self.last_stamp, pending))
    }

    /// Put the entities recorded in `slice` back and describe the difference
    /// to peers.
    ///
    /// Only ids the slice lists are touched. Those that come back or change
    /// are restamped so last-writer-wins on every peer accepts them; those
    /// already matching keep their stamps.
    fn restore_slice(&mut self, slice: &BoardSlice, kind: ChangeKind, mut patches: Vec<Patch>) -> Change {
        let ts = self.next_stamp();
        patches.extend(restore_entities(
            &mut self.state.shapes,
            &slice.shapes,
            &mut self.shape_graveyard,
            &self.actor,
            ts,
        ));
        patches.extend(restore_entities(
            &mut self.state.strokes,
            &slice.strokes,
            &mut self.stroke_graveyard,
            &self.actor,
            ts,
        ));
        if let Some(selected) = &slice.selected_id {
            self.state.selected_id.clone_from(selected);
        }
        self.state.sort_shapes();
        self.state.apply_selection();

        debug!(?kind, patches = patches.len(), "board: history applied");
        Change::new(kind, None, ts, patches)
    }
}

/// Bring every recorded entity in `targets` back to its recorded state.
///
/// Emits a full record for each one restored or changed and a tombstone for
/// each one removed. Records absent from `targets` are never written.
fn restore_entities<T>(
    items: &mut Vec<T>,
    targets: &[Snapshot<T>],
    graveyard: &mut TombstoneLedger,
    actor: &str,
    ts: Timestamp,
) -> Vec<Patch>
where
    T: Entity + Into<Object>,
{
    let mut patches = Vec::new();
    for (id, target) in targets {
        let index = items.iter().position(|item| item.id() == id);
        match (target, index) {
            (Some(target), Some(index)) => {
                if items[index].same_content(target) {
                    continue;
                }
                let mut item = target.clone();
                item.stamp(ts, actor);
                patches.push(Patch::full(item.clone()));
                items[index] = item;
            }
            (Some(target), None) => {
                let mut item = target.clone();
                item.stamp(ts, actor);
                graveyard.retire(id);
                patches.push(Patch::full(item.clone()));
                items.push(item);
            }
            (None, Some(index)) => {
                items.remove(index);
                graveyard.record(Tombstone { id: id.clone(), updated_at: Some(ts), updated_by: Some(actor.into()) });
                patches.push(Patch::tombstone(T::COLLECTION, id, actor, ts));
            }
            (None, None) => {}
        }
    }
    patches
}

// =============================================================================
// REMOTE
// =============================================================================

impl BoardEditor {
    /// Merge a remote shapes snapshot. Bypasses history.
    pub fn merge_remote_shapes(&mut self, remote: Vec<Entry<Shape>>) {
        let local = std::mem::take(&mut self.state.shapes);
        self.state.shapes = merge_remote(local, &mut self.shape_graveyard, remote);
        self.state.sort_shapes();
        self.state.apply_selection();
    }

    /// Merge a remote strokes snapshot. Bypasses history.
    pub fn merge_remote_strokes(&mut self, remote: Vec<Entry<Stroke>>) {
        let local = std::mem::take(&mut self.state.strokes);
        self.state.strokes = merge_remote(local, &mut self.stroke_graveyard, remote);
        if let Some(id) = &self.drawing {
            if self.state.stroke(id).is_none() {
                self.drawing = None;
            }
        }
    }

    /// Replace the whole board, e.g. from a local backup or an imported file.
    ///
    /// History and pending gesture writes are discarded. Records without a
    /// stamp get one so they can take part in merges. Records the new board
    /// drops are tombstoned at the load stamp, so older remote copies of them
    /// stay deleted.
    pub fn load(&mut self, mut state: BoardState) {
        let ts = self.next_stamp();
        for shape in state.shapes.iter_mut().filter(|s| s.updated_at.unwrap_or(0) == 0) {
            shape.stamp(ts, &self.actor);
        }
        for stroke in state.strokes.iter_mut().filter(|s| s.updated_at.unwrap_or(0) == 0) {
            stroke.stamp(ts, &self.actor);
        }
        state.sort_shapes();
        state.apply_selection();

        bury_dropped(&self.state.shapes, &state.shapes, &mut self.shape_graveyard, &self.actor, ts);
        bury_dropped(&self.state.strokes, &state.strokes, &mut self.stroke_graveyard, &self.actor, ts);

        info!(shapes = state.shapes.len(), strokes = state.strokes.len(), "board: state loaded");
        self.state = state;
        self.history.clear();
        self.drawing = None;
        self.unflushed.clear();
    }
}

/// Tombstone every id of `old` missing from `new` and forget ledger entries
/// for ids `new` brings back.
fn bury_dropped<T: Entity>(old: &[T], new: &[T], graveyard: &mut TombstoneLedger, actor: &str, ts: Timestamp) {
    for item in new {
        graveyard.retire(item.id());
    }
    for item in old.iter().filter(|item| !new.iter().any(|n| n.id() == item.id())) {
        graveyard.record(Tombstone { id: item.id().to_string(), updated_at: Some(ts), updated_by: Some(actor.into()) });
    }
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
