//! History — bounded undo/redo log of local board edits.
//!
//! DESIGN
//! ======
//! Each entry stores the entities it touched, by id, as they were before and
//! after the edit. Nothing else is captured, so undo never reaches records
//! the entry did not write. Undo yields `before` and parks the inverse entry on the redo stack;
//! redo yields the original `after` and parks the inverse back on undo. Both
//! stacks are bounded and evict their oldest entry first.
//!
//! Continuous gestures (drag, resize, typing, eraser sweeps) record one entry
//! per input event. Entries that share a group key while the gesture is open
//! coalesce into the top entry, so one undo reverts the whole gesture.
//! `seal` closes the gesture.
//!
//! Only local edits are recorded. Remote merges replace state underneath the
//! log without touching it.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::consts::MAX_HISTORY_SIZE;
use crate::doc::{BoardSlice, Timestamp};

// =============================================================================
// TYPES
// =============================================================================

/// What kind of edit an entry reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    CreateShape,
    DeleteShape,
    UpdateShape,
    DuplicateShape,
    Reorder,
    CreateStroke,
    EraseStrokes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    pub kind: ActionKind,
    pub timestamp: Timestamp,
    pub before: BoardSlice,
    pub after: BoardSlice,
}

impl HistoryEntry {
    #[must_use]
    pub fn new(kind: ActionKind, timestamp: Timestamp, before: BoardSlice, after: BoardSlice) -> Self {
        Self { id: Uuid::new_v4().to_string(), kind, timestamp, before, after }
    }

    /// The entry that undoes this one.
    #[must_use]
    pub fn inverse(self) -> Self {
        Self { id: self.id, kind: self.kind, timestamp: self.timestamp, before: self.after, after: self.before }
    }
}

// =============================================================================
// HISTORY
// =============================================================================

#[derive(Debug)]
pub struct History {
    undo: VecDeque<HistoryEntry>,
    redo: VecDeque<HistoryEntry>,
    capacity: usize,
    /// Group key of the gesture the top undo entry belongs to, while open.
    open_group: Option<String>,
}

impl History {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY_SIZE)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { undo: VecDeque::new(), redo: VecDeque::new(), capacity, open_group: None }
    }

    /// Record a discrete edit. Clears redo and closes any open gesture.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.open_group = None;
        self.push_undo(entry);
    }

    /// Record one step of a continuous gesture identified by `group`.
    ///
    /// While the same group stays open the step folds into the top entry:
    /// its `after` takes the newest state of every entity, its `before`
    /// keeps the oldest one, and entities first touched mid-gesture join both.
    pub fn record_continuous(&mut self, entry: HistoryEntry, group: impl Into<String>) {
        let group = group.into();
        if self.open_group.as_deref() == Some(group.as_str()) {
            if let Some(top) = self.undo.back_mut() {
                top.before.underlay(entry.before);
                top.after.overlay(entry.after);
                top.timestamp = entry.timestamp;
                return;
            }
        }
        self.push_undo(entry);
        self.open_group = Some(group);
    }

    /// Close the open gesture so the next step starts a new entry.
    pub fn seal(&mut self) {
        self.open_group = None;
    }

    /// Pop the newest entry and return the state it reverts to.
    pub fn undo(&mut self) -> Option<BoardSlice> {
        self.open_group = None;
        let entry = self.undo.pop_back()?;
        let before = entry.before.clone();
        push_bounded(&mut self.redo, entry.inverse(), self.capacity);
        Some(before)
    }

    /// Re-apply the newest undone entry and return the state it restores.
    pub fn redo(&mut self) -> Option<BoardSlice> {
        self.open_group = None;
        let inverse = self.redo.pop_back()?;
        let after = inverse.before.clone();
        push_bounded(&mut self.undo, inverse.inverse(), self.capacity);
        Some(after)
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Kind of the entry the next undo would revert.
    #[must_use]
    pub fn peek_undo(&self) -> Option<ActionKind> {
        self.undo.back().map(|e| e.kind)
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.open_group = None;
    }

    fn push_undo(&mut self, entry: HistoryEntry) {
        self.redo.clear();
        push_bounded(&mut self.undo, entry, self.capacity);
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded(stack: &mut VecDeque<HistoryEntry>, entry: HistoryEntry, capacity: usize) {
    stack.push_back(entry);
    while stack.len() > capacity {
        stack.pop_front();
    }
}

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
