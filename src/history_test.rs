use super::*;
use crate::doc::{BoardState, Point, Shape, ShapeKind};

fn state_with(ids: &[&str]) -> BoardState {
    BoardState {
        shapes: ids.iter().map(|id| Shape::new(*id, ShapeKind::rect(), Point::default())).collect(),
        ..BoardState::default()
    }
}

/// Entry touching the union of `before` and `after`; ids missing on one side
/// did not exist then.
fn entry(before: &[&str], after: &[&str]) -> HistoryEntry {
    let mut ids: Vec<String> = before.iter().chain(after).map(ToString::to_string).collect();
    ids.sort();
    ids.dedup();
    HistoryEntry::new(
        ActionKind::CreateShape,
        1,
        BoardSlice::shapes_of(&state_with(before), &ids),
        BoardSlice::shapes_of(&state_with(after), &ids),
    )
}

/// Ids that exist in `slice`.
fn shape_ids(slice: &BoardSlice) -> Vec<String> {
    slice.shapes.iter().filter(|(_, s)| s.is_some()).map(|(id, _)| id.clone()).collect()
}

#[test]
fn empty_history_reports_nothing() {
    let mut history = History::new();
    assert!(!history.can_undo());
    assert!(!history.can_redo());
    assert!(history.undo().is_none());
    assert!(history.redo().is_none());
}

#[test]
fn undo_returns_before_and_redo_returns_after() {
    let mut history = History::new();
    history.record(entry(&[], &["a"]));

    let undone = history.undo().unwrap();
    assert!(shape_ids(&undone).is_empty());
    assert!(history.can_redo());

    let redone = history.redo().unwrap();
    assert_eq!(shape_ids(&redone), ["a"]);
    assert!(history.can_undo());
    assert!(!history.can_redo());
}

#[test]
fn recording_clears_redo() {
    let mut history = History::new();
    history.record(entry(&[], &["a"]));
    history.undo();
    assert_eq!(history.redo_len(), 1);

    history.record(entry(&[], &["b"]));
    assert_eq!(history.redo_len(), 0);
}

#[test]
fn capacity_evicts_oldest_first() {
    let mut history = History::new();
    for i in 0..MAX_HISTORY_SIZE + 5 {
        let id = format!("s{i}");
        history.record(entry(&[], &[id.as_str()]));
    }
    assert_eq!(history.undo_len(), MAX_HISTORY_SIZE);

    while history.undo().is_some() {}
    assert_eq!(history.redo_len(), MAX_HISTORY_SIZE);

    // The oldest surviving entry is the sixth one recorded.
    let redone = history.redo().unwrap();
    assert_eq!(shape_ids(&redone), ["s5"]);
}

#[test]
fn continuous_steps_coalesce_until_sealed() {
    let mut history = History::new();
    history.record_continuous(entry(&["a"], &["a", "1"]), "move:a");
    history.record_continuous(entry(&["a", "1"], &["a", "2"]), "move:a");
    assert_eq!(history.undo_len(), 1);

    history.seal();
    history.record_continuous(entry(&["a", "2"], &["a", "3"]), "move:a");
    assert_eq!(history.undo_len(), 2);

    // The first gesture reverts to its original before state.
    history.undo();
    let slice = history.undo().unwrap();
    assert_eq!(shape_ids(&slice), ["a"]);
}

#[test]
fn different_groups_do_not_coalesce() {
    let mut history = History::new();
    history.record_continuous(entry(&[], &["a"]), "move:a");
    history.record_continuous(entry(&[], &["b"]), "move:b");
    assert_eq!(history.undo_len(), 2);
}

#[test]
fn coalesced_entry_redoes_to_latest_step() {
    let mut history = History::new();
    history.record_continuous(entry(&["x"], &["x", "1"]), "resize:x");
    history.record_continuous(entry(&["x", "1"], &["x", "2"]), "resize:x");
    history.undo();
    let redone = history.redo().unwrap();
    assert_eq!(shape_ids(&redone), ["x", "2"]);
}

#[test]
fn coalescing_keeps_first_before_for_every_entity() {
    let mut history = History::new();
    history.record_continuous(entry(&["k1"], &[]), "erase");
    history.record_continuous(entry(&["k2"], &[]), "erase");
    assert_eq!(history.undo_len(), 1);

    let restored = history.undo().unwrap();
    assert_eq!(shape_ids(&restored), ["k1", "k2"]);
    let captured: Vec<_> = restored.shapes.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(captured, ["k1", "k2"]);
}

#[test]
fn clear_empties_both_stacks() {
    let mut history = History::with_capacity(3);
    history.record(entry(&[], &["a"]));
    history.record(entry(&["a"], &["a", "b"]));
    history.undo();
    history.clear();
    assert!(!history.can_undo());
    assert!(!history.can_redo());
}

#[test]
fn inverse_swaps_states() {
    let original = entry(&[], &["a"]);
    let inverse = original.clone().inverse();
    assert_eq!(inverse.before, original.after);
    assert_eq!(inverse.after, original.before);
    assert_eq!(inverse.id, original.id);
}
