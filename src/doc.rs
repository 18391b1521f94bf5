//! Document model: shapes, strokes, and the board state they live in.
//!
//! This module defines what is on the board (`Shape`, `ShapeKind`, `Stroke`),
//! the aggregate `BoardState` that the editor mutates and the history layer
//! snapshots, and the `Entity` trait shared by both synced collections.
//!
//! Data flows into this layer from the remote store (JSON deserialization via
//! the merge engine) and from the editor (local mutations). The wire format is
//! camelCase JSON with the shape variant flattened under a `type` tag.

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_FONT_SIZE, DEFAULT_IMAGE_FILL, DEFAULT_IMAGE_HEIGHT, DEFAULT_IMAGE_WIDTH, DEFAULT_PEN_COLOR,
    DEFAULT_PEN_SIZE, DEFAULT_RECT_FILL, DEFAULT_RECT_HEIGHT, DEFAULT_RECT_WIDTH, DEFAULT_TEXT_FILL,
    DEFAULT_TEXT_HEIGHT, DEFAULT_TEXT_OPACITY, DEFAULT_TEXT_WIDTH, SHAPES_PATH, STROKES_PATH,
};

/// Client-generated identifier of a shape or stroke.
pub type EntityId = String;

/// Identifier of the client that last wrote an entity.
pub type ActorId = String;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

// =============================================================================
// GEOMETRY
// =============================================================================

/// A point in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Round `value` to the nearest multiple of `grid`, halves rounding up.
///
/// A non-positive grid disables snapping.
#[must_use]
pub fn snap_to_grid(value: f64, grid: f64) -> f64 {
    if grid <= 0.0 {
        return value;
    }
    (value / grid + 0.5).floor() * grid
}

// =============================================================================
// SHAPES
// =============================================================================

/// Horizontal text alignment inside a text shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

impl TextAlign {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TextAlign::Left => "left",
            TextAlign::Center => "center",
            TextAlign::Right => "right",
        }
    }
}

/// Vertical text alignment inside a text shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerticalAlign {
    #[default]
    Top,
    Middle,
    Bottom,
}

impl VerticalAlign {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            VerticalAlign::Top => "top",
            VerticalAlign::Middle => "middle",
            VerticalAlign::Bottom => "bottom",
        }
    }
}

fn default_font_size() -> f64 {
    DEFAULT_FONT_SIZE
}

/// Variant payload of a shape, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShapeKind {
    /// Filled rectangle.
    Rect,
    /// Text box. Older clients wrote the tag as `textbox`.
    #[serde(alias = "textbox")]
    Text {
        #[serde(default, alias = "text")]
        content: String,
        #[serde(default, rename = "textAlign")]
        text_align: TextAlign,
        #[serde(default, rename = "verticalAlign")]
        vertical_align: VerticalAlign,
        #[serde(default = "default_font_size", rename = "fontSize")]
        font_size: f64,
    },
    /// Image referenced by URL or data URI.
    Image {
        #[serde(default, rename = "imageSrc", alias = "src", skip_serializing_if = "Option::is_none")]
        image_src: Option<String>,
    },
}

impl ShapeKind {
    #[must_use]
    pub fn rect() -> Self {
        ShapeKind::Rect
    }

    /// Text variant with default alignment and font size.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        ShapeKind::Text {
            content: content.into(),
            text_align: TextAlign::default(),
            vertical_align: VerticalAlign::default(),
            font_size: DEFAULT_FONT_SIZE,
        }
    }

    #[must_use]
    pub fn image(src: impl Into<String>) -> Self {
        ShapeKind::Image { image_src: Some(src.into()) }
    }

    /// Wire tag of the variant.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            ShapeKind::Rect => "rect",
            ShapeKind::Text { .. } => "text",
            ShapeKind::Image { .. } => "image",
        }
    }

    /// Whether edits to this variant must be written as whole objects.
    ///
    /// Text layout depends on several fields at once, so a peer applying a
    /// single narrow field could render a state nobody authored.
    #[must_use]
    pub fn requires_full_object_sync(&self) -> bool {
        matches!(self, ShapeKind::Text { .. })
    }

    /// Width and height used when the shape carries no explicit size.
    #[must_use]
    pub fn default_size(&self) -> (f64, f64) {
        match self {
            ShapeKind::Rect => (DEFAULT_RECT_WIDTH, DEFAULT_RECT_HEIGHT),
            ShapeKind::Text { .. } => (DEFAULT_TEXT_WIDTH, DEFAULT_TEXT_HEIGHT),
            ShapeKind::Image { .. } => (DEFAULT_IMAGE_WIDTH, DEFAULT_IMAGE_HEIGHT),
        }
    }

    fn default_fill(&self) -> &'static str {
        match self {
            ShapeKind::Rect => DEFAULT_RECT_FILL,
            ShapeKind::Text { .. } => DEFAULT_TEXT_FILL,
            ShapeKind::Image { .. } => DEFAULT_IMAGE_FILL,
        }
    }

    fn default_opacity(&self) -> f64 {
        match self {
            ShapeKind::Text { .. } => DEFAULT_TEXT_OPACITY,
            _ => 1.0,
        }
    }
}

fn yes() -> bool {
    true
}

/// Per-shape permission flags. Absent flags are permissive except erasable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct ShapeMeta {
    #[serde(default = "yes")]
    pub is_movable: bool,
    #[serde(default = "yes")]
    pub is_deletable: bool,
    #[serde(default = "yes")]
    pub is_resizable: bool,
    #[serde(default)]
    pub is_erasable: bool,
}

impl Default for ShapeMeta {
    fn default() -> Self {
        Self { is_movable: true, is_deletable: true, is_resizable: true, is_erasable: false }
    }
}

fn default_fill() -> String {
    DEFAULT_RECT_FILL.to_string()
}

fn default_opacity() -> f64 {
    1.0
}

/// A shape as stored in the document and on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    /// Unique identifier, immutable after creation.
    pub id: EntityId,
    /// Variant tag and payload.
    #[serde(flatten)]
    pub kind: ShapeKind,
    /// Left edge in world coordinates.
    #[serde(default)]
    pub x: f64,
    /// Top edge in world coordinates.
    #[serde(default)]
    pub y: f64,
    /// Explicit width; the variant default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    /// Explicit height; the variant default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// CSS color string.
    #[serde(default = "default_fill")]
    pub fill: String,
    /// Opacity in `0.0..=1.0`.
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    /// Clockwise rotation in degrees.
    #[serde(default)]
    pub rotation: f64,
    /// Stacking order; lower values are drawn beneath higher values.
    #[serde(default)]
    pub z_index: i64,
    /// Permission flags.
    #[serde(default)]
    pub meta: ShapeMeta,
    /// Time of the last write, used for last-writer-wins resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Actor that performed the last write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<ActorId>,
    /// Local selection highlight. Never leaves the client.
    #[serde(skip)]
    pub selected: bool,
}

impl Shape {
    /// Build an unstamped shape at `origin` with the variant's defaults.
    #[must_use]
    pub fn new(id: impl Into<EntityId>, kind: ShapeKind, origin: Point) -> Self {
        let (width, height) = kind.default_size();
        let fill = kind.default_fill().to_string();
        let opacity = kind.default_opacity();
        Self {
            id: id.into(),
            kind,
            x: origin.x,
            y: origin.y,
            width: Some(width),
            height: Some(height),
            fill,
            opacity,
            rotation: 0.0,
            z_index: 0,
            meta: ShapeMeta::default(),
            updated_at: None,
            updated_by: None,
            selected: false,
        }
    }

    #[must_use]
    pub fn width_or_default(&self) -> f64 {
        self.width.unwrap_or_else(|| self.kind.default_size().0)
    }

    #[must_use]
    pub fn height_or_default(&self) -> f64 {
        self.height.unwrap_or_else(|| self.kind.default_size().1)
    }

    #[must_use]
    pub fn requires_full_object_sync(&self) -> bool {
        self.kind.requires_full_object_sync()
    }
}

// =============================================================================
// STROKES
// =============================================================================

/// Drawing tool that produced a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeTool {
    #[default]
    Pen,
    Eraser,
}

/// Pen settings captured when a stroke starts.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeStyle {
    pub color: String,
    pub size: f64,
    pub tool: StrokeTool,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self { color: DEFAULT_PEN_COLOR.to_string(), size: DEFAULT_PEN_SIZE, tool: StrokeTool::Pen }
    }
}

fn default_pen_color() -> String {
    DEFAULT_PEN_COLOR.to_string()
}

fn default_pen_size() -> f64 {
    DEFAULT_PEN_SIZE
}

/// A freehand polyline. Points are appended while drawing and frozen after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    pub id: EntityId,
    #[serde(default)]
    pub points: Vec<Point>,
    #[serde(default = "default_pen_color")]
    pub color: String,
    #[serde(default = "default_pen_size")]
    pub size: f64,
    #[serde(default)]
    pub tool: StrokeTool,
    /// Whether the eraser may remove this stroke. Absent means no.
    #[serde(default)]
    pub is_erasable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<ActorId>,
}

impl Stroke {
    /// Start an unstamped, erasable stroke with a single point.
    #[must_use]
    pub fn new(id: impl Into<EntityId>, style: &StrokeStyle, start: Point) -> Self {
        Self {
            id: id.into(),
            points: vec![start],
            color: style.color.clone(),
            size: style.size,
            tool: style.tool,
            is_erasable: true,
            updated_at: None,
            updated_by: None,
        }
    }

    /// True when any point lies within `radius` of `point` (inclusive).
    #[must_use]
    pub fn is_hit(&self, point: Point, radius: f64) -> bool {
        self.points.iter().any(|p| p.distance(point) <= radius)
    }
}

// =============================================================================
// BOARD STATE
// =============================================================================

/// Everything the editor owns: both collections plus the local selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardState {
    #[serde(default)]
    pub shapes: Vec<Shape>,
    #[serde(default)]
    pub strokes: Vec<Stroke>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_id: Option<EntityId>,
}

impl BoardState {
    #[must_use]
    pub fn shape(&self, id: &str) -> Option<&Shape> {
        self.shapes.iter().find(|s| s.id == id)
    }

    #[must_use]
    pub fn shape_index(&self, id: &str) -> Option<usize> {
        self.shapes.iter().position(|s| s.id == id)
    }

    #[must_use]
    pub fn stroke(&self, id: &str) -> Option<&Stroke> {
        self.strokes.iter().find(|s| s.id == id)
    }

    /// Re-derive per-shape `selected` flags from `selected_id`.
    ///
    /// A selection pointing at a shape that no longer exists is cleared.
    pub fn apply_selection(&mut self) {
        if let Some(id) = &self.selected_id {
            if !self.shapes.iter().any(|s| &s.id == id) {
                self.selected_id = None;
            }
        }
        for shape in &mut self.shapes {
            shape.selected = self.selected_id.as_deref() == Some(shape.id.as_str());
        }
    }

    /// Stable sort of shapes by `z_index`.
    pub fn sort_shapes(&mut self) {
        self.shapes.sort_by_key(|s| s.z_index);
    }
}

/// Recorded state of one entity; `None` means it did not exist.
pub type Snapshot<T> = (EntityId, Option<T>);

/// The entities one edit touched, each as it stood at one moment.
///
/// Only listed ids are restored; everything else on the board, including
/// records written by peers since, is left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardSlice {
    pub shapes: Vec<Snapshot<Shape>>,
    pub strokes: Vec<Snapshot<Stroke>>,
    /// `Some(None)` restores "nothing selected".
    pub selected_id: Option<Option<EntityId>>,
}

impl BoardSlice {
    /// Capture the shapes `ids` and the selection.
    #[must_use]
    pub fn shapes_of(state: &BoardState, ids: &[EntityId]) -> Self {
        Self { shapes: capture(&state.shapes, ids), strokes: Vec::new(), selected_id: Some(state.selected_id.clone()) }
    }

    /// Capture the strokes `ids`.
    #[must_use]
    pub fn strokes_of(state: &BoardState, ids: &[EntityId]) -> Self {
        Self { shapes: Vec::new(), strokes: capture(&state.strokes, ids), selected_id: None }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty() && self.strokes.is_empty() && self.selected_id.is_none()
    }

    /// Take every entity of `newer`, replacing what this slice holds for it.
    pub fn overlay(&mut self, newer: BoardSlice) {
        overlay(&mut self.shapes, newer.shapes);
        overlay(&mut self.strokes, newer.strokes);
        if newer.selected_id.is_some() {
            self.selected_id = newer.selected_id;
        }
    }

    /// Take only the entities of `older` this slice does not hold yet.
    pub fn underlay(&mut self, older: BoardSlice) {
        underlay(&mut self.shapes, older.shapes);
        underlay(&mut self.strokes, older.strokes);
        if self.selected_id.is_none() {
            self.selected_id = older.selected_id;
        }
    }
}

fn capture<T: Entity>(items: &[T], ids: &[EntityId]) -> Vec<Snapshot<T>> {
    ids.iter()
        .map(|id| (id.clone(), items.iter().find(|item| item.id() == id).cloned()))
        .collect()
}

fn overlay<T>(into: &mut Vec<Snapshot<T>>, newer: Vec<Snapshot<T>>) {
    for (id, item) in newer {
        match into.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = item,
            None => into.push((id, item)),
        }
    }
}

fn underlay<T>(into: &mut Vec<Snapshot<T>>, older: Vec<Snapshot<T>>) {
    for (id, item) in older {
        if !into.iter().any(|(existing, _)| *existing == id) {
            into.push((id, item));
        }
    }
}

// =============================================================================
// ENTITIES
// =============================================================================

/// Remote collection an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Shapes,
    Strokes,
}

impl Collection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Shapes => SHAPES_PATH,
            Collection::Strokes => STROKES_PATH,
        }
    }

    /// Store path of the entity `id` in this collection.
    #[must_use]
    pub fn path(self, id: &str) -> String {
        format!("{}/{id}", self.as_str())
    }
}

/// A synced record with an id and last-writer-wins metadata.
pub trait Entity: Clone + Serialize + serde::de::DeserializeOwned {
    const COLLECTION: Collection;

    fn id(&self) -> &str;

    fn updated_at(&self) -> Option<Timestamp>;

    /// Record a local write at `ts` by `actor`.
    fn stamp(&mut self, ts: Timestamp, actor: &str);

    /// Equality of everything that is synced.
    fn same_content(&self, other: &Self) -> bool;
}

impl Entity for Shape {
    const COLLECTION: Collection = Collection::Shapes;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }

    fn stamp(&mut self, ts: Timestamp, actor: &str) {
        self.updated_at = Some(ts);
        self.updated_by = Some(actor.to_string());
    }

    fn same_content(&self, other: &Self) -> bool {
        let mut other = other.clone();
        other.selected = self.selected;
        *self == other
    }
}

impl Entity for Stroke {
    const COLLECTION: Collection = Collection::Strokes;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }

    fn stamp(&mut self, ts: Timestamp, actor: &str) {
        self.updated_at = Some(ts);
        self.updated_by = Some(actor.to_string());
    }

    fn same_content(&self, other: &Self) -> bool {
        self == other
    }
}

#[cfg(test)]
#[path = "doc_test.rs"]
mod tests;
