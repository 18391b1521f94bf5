//! Board services: local editing and sync orchestration.
//!
//! ARCHITECTURE
//! ============
//! `board` owns the document, undo history, and the patches each edit
//! produces. `session` wraps an editor, shapes its writes, and keeps it in
//! step with a remote store, falling back to local persistence.

pub mod board;
pub mod session;

pub use board::{BoardEditor, Change, ChangeKind, Resize, ShapeProperty};
pub use session::{Notice, SessionError, SyncSession};
