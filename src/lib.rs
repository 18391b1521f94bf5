//! Realtime sync core for a collaborative whiteboard.
//!
//! Each client edits a local copy of the board and writes field-level
//! patches to a shared realtime store. Concurrent edits settle by
//! last-writer-wins on `updatedAt`; deletes leave tombstones so a stale
//! snapshot cannot bring a record back. The same crate ships a small relay
//! that serves an in-memory store over WebSocket.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`doc`] | Shapes, strokes, board state, and the `Entity` trait |
//! | [`patch`] | Patches and their store path encoding |
//! | [`merge`] | LWW merge, tombstone decoding, and the tombstone ledger |
//! | [`history`] | Bounded undo/redo stacks of board slices |
//! | [`rate_limit`] | Debounce and throttle shapers for outbound writes |
//! | [`clock`] | Millisecond clocks, real and manual |
//! | [`store`] | `RemoteStore` trait, in-memory and WebSocket stores, local files |
//! | [`services`] | `BoardEditor` and the `SyncSession` orchestrator |
//! | [`frame`] | Relay wire frames and structured error codes |
//! | [`routes`] | Relay router and WebSocket handler |
//! | [`state`] | Relay shared state |
//! | [`config`] | Environment-driven configuration |
//! | [`consts`] | Shared defaults and store path names |

pub mod clock;
pub mod config;
pub mod consts;
pub mod doc;
pub mod frame;
pub mod history;
pub mod merge;
pub mod patch;
pub mod rate_limit;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
