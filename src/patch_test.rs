use super::*;
use crate::doc::{Point, ShapeKind, StrokeStyle};

fn stamped_rect(id: &str) -> Shape {
    let mut shape = Shape::new(id, ShapeKind::rect(), Point::new(40.0, 40.0));
    shape.stamp(10, "alice");
    shape
}

#[test]
fn full_object_key_is_record_path() {
    let patch = Patch::full(stamped_rect("a"));
    assert_eq!(patch.path(), "shapes/a");
    assert_eq!(patch.key(), "shapes/a");

    let value = patch.to_value().unwrap();
    assert_eq!(value["id"], "a");
    assert_eq!(value["type"], "rect");
    assert_eq!(value["updatedAt"], 10);
}

#[test]
fn field_set_key_appends_field() {
    let patch = Patch::field(Collection::Shapes, "a", "meta/isMovable", false);
    assert_eq!(patch.path(), "shapes/a");
    assert_eq!(patch.key(), "shapes/a/meta/isMovable");
    assert_eq!(patch.to_value().unwrap(), json!(false));
}

#[test]
fn tombstone_value_carries_stamp() {
    let patch = Patch::tombstone(Collection::Strokes, "k", "bob", 42);
    assert!(patch.is_tombstone());
    assert_eq!(patch.key(), "strokes/k");
    assert_eq!(
        patch.to_value().unwrap(),
        json!({"id": "k", "deleted": true, "updatedAt": 42, "updatedBy": "bob"})
    );
}

#[test]
fn stamped_fields_include_updated_at_and_by() {
    let shape = stamped_rect("a");
    let map = to_update_map(&Patch::stamped_fields(&shape, vec![("x", json!(80.0)), ("y", json!(0.0))])).unwrap();

    assert_eq!(map.len(), 4);
    assert_eq!(map["shapes/a/x"], json!(80.0));
    assert_eq!(map["shapes/a/updatedAt"], json!(10));
    assert_eq!(map["shapes/a/updatedBy"], json!("alice"));
}

#[test]
fn text_edits_widen_to_full_object() {
    let mut text = Shape::new("t", ShapeKind::text("hi"), Point::default());
    text.stamp(7, "alice");
    let patches = Patch::shape_edit(&text, vec![("x", json!(1.0))]);
    assert_eq!(patches.len(), 1);
    assert!(matches!(&patches[0], Patch::FullObject { path, .. } if path == "shapes/t"));
}

#[test]
fn update_map_mixes_collections() {
    let mut stroke = Stroke::new("k1", &StrokeStyle::default(), Point::default());
    stroke.stamp(3, "alice");
    let patches = vec![Patch::full(stroke), Patch::tombstone(Collection::Strokes, "k2", "alice", 4)];
    let map = to_update_map(&patches).unwrap();
    let keys: Vec<_> = map.keys().cloned().collect();
    assert_eq!(keys, ["strokes/k1", "strokes/k2"]);
    assert_eq!(map["strokes/k2"]["deleted"], true);
}
