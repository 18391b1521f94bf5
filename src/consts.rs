//! Shared constants for the board document and its sync layer.

// ── Canvas ──────────────────────────────────────────────────────

/// Logical canvas width in world units.
pub const CANVAS_WIDTH: f64 = 2160.0;

/// Logical canvas height in world units.
pub const CANVAS_HEIGHT: f64 = 3840.0;

/// Snap grid cell size used when placing and resizing shapes.
pub const DEFAULT_GRID_SIZE: f64 = 40.0;

// ── Shape defaults ──────────────────────────────────────────────

pub const DEFAULT_RECT_WIDTH: f64 = 100.0;
pub const DEFAULT_RECT_HEIGHT: f64 = 60.0;
pub const DEFAULT_RECT_FILL: &str = "#ffffff";

pub const DEFAULT_TEXT_WIDTH: f64 = 190.0;
pub const DEFAULT_TEXT_HEIGHT: f64 = 40.0;
pub const DEFAULT_TEXT_FILL: &str = "#888888";
pub const DEFAULT_TEXT_OPACITY: f64 = 0.5;
pub const DEFAULT_FONT_SIZE: f64 = 40.0;

pub const DEFAULT_IMAGE_WIDTH: f64 = 100.0;
pub const DEFAULT_IMAGE_HEIGHT: f64 = 100.0;
pub const DEFAULT_IMAGE_FILL: &str = "transparent";

/// Offset applied to both axes when duplicating a shape.
pub const DUPLICATE_OFFSET: f64 = 20.0;

// ── Strokes ─────────────────────────────────────────────────────

pub const DEFAULT_PEN_COLOR: &str = "#000000";
pub const DEFAULT_PEN_SIZE: f64 = 4.0;

/// Eraser hit radius in world units. Points at exactly this distance are hit.
pub const DEFAULT_ERASE_RADIUS: f64 = 10.0;

// ── Sync / history ──────────────────────────────────────────────

/// Undo and redo stack capacity; the oldest entry is evicted first.
pub const MAX_HISTORY_SIZE: usize = 20;

/// Quiet period before a property edit is written to the remote store.
pub const DEFAULT_PROPERTY_DEBOUNCE_MS: u64 = 300;

/// Minimum spacing between remote writes of a dragged or resized shape.
pub const DEFAULT_DRAG_THROTTLE_MS: u64 = 300;

/// Remote collection holding shapes.
pub const SHAPES_PATH: &str = "shapes";

/// Remote collection holding strokes.
pub const STROKES_PATH: &str = "strokes";

/// Key under which the local fallback copy of the board is stored.
pub const DEFAULT_LOCAL_KEY: &str = "board-push-state";
