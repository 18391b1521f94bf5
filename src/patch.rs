//! Patch — typed outbound mutations and their key-path encoding.
//!
//! DESIGN
//! ======
//! The editor describes every local write as a closed set of patches:
//! a whole record, one field of a record, or a deletion marker. The session
//! turns a batch into the flat `path → value` map the remote store accepts,
//! so a single update can touch any number of records atomically.
//!
//! A narrow field write is only visible to last-writer-wins resolution on
//! peers if it carries the record's new stamp, so `stamped_fields` always
//! appends `updatedAt` and `updatedBy`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Value, json};

use crate::doc::{ActorId, Collection, Entity, EntityId, Shape, Stroke, Timestamp};

/// Flat multi-key write: slash-separated store path to new value.
pub type UpdateMap = BTreeMap<String, Value>;

// =============================================================================
// TYPES
// =============================================================================

/// A whole record carried by a full-object patch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Object {
    Shape(Shape),
    Stroke(Stroke),
}

impl Object {
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Object::Shape(s) => Shape::COLLECTION.path(&s.id),
            Object::Stroke(s) => Stroke::COLLECTION.path(&s.id),
        }
    }

    #[must_use]
    pub fn updated_at(&self) -> Option<Timestamp> {
        match self {
            Object::Shape(s) => s.updated_at,
            Object::Stroke(s) => s.updated_at,
        }
    }
}

impl From<Shape> for Object {
    fn from(shape: Shape) -> Self {
        Object::Shape(shape)
    }
}

impl From<Stroke> for Object {
    fn from(stroke: Stroke) -> Self {
        Object::Stroke(stroke)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// Replace the record at `path`.
    FullObject { path: String, value: Object },
    /// Set `field` (possibly nested, e.g. `meta/isMovable`) under `path`.
    FieldSet { path: String, field: String, value: Value },
    /// Replace the record at `path` with a deletion marker.
    Tombstone { path: String, id: EntityId, actor: ActorId, ts: Timestamp },
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Patch {
    pub fn full(object: impl Into<Object>) -> Self {
        let value = object.into();
        Patch::FullObject { path: value.path(), value }
    }

    pub fn field(collection: Collection, id: &str, field: impl Into<String>, value: impl Into<Value>) -> Self {
        Patch::FieldSet { path: collection.path(id), field: field.into(), value: value.into() }
    }

    pub fn tombstone(collection: Collection, id: &str, actor: &str, ts: Timestamp) -> Self {
        Patch::Tombstone { path: collection.path(id), id: id.to_string(), actor: actor.to_string(), ts }
    }

    /// Field sets for `fields` plus the shape's current stamp.
    #[must_use]
    pub fn stamped_fields(shape: &Shape, fields: Vec<(&str, Value)>) -> Vec<Patch> {
        let mut patches: Vec<Patch> = fields
            .into_iter()
            .map(|(field, value)| Patch::field(Collection::Shapes, &shape.id, field, value))
            .collect();
        patches.push(Patch::field(Collection::Shapes, &shape.id, "updatedAt", json!(shape.updated_at)));
        patches.push(Patch::field(Collection::Shapes, &shape.id, "updatedBy", json!(shape.updated_by)));
        patches
    }

    /// Patches for an edit of `fields`, widened to the whole record when the
    /// shape's variant cannot be synced field by field.
    #[must_use]
    pub fn shape_edit(shape: &Shape, fields: Vec<(&str, Value)>) -> Vec<Patch> {
        if shape.requires_full_object_sync() {
            vec![Patch::full(shape.clone())]
        } else {
            Patch::stamped_fields(shape, fields)
        }
    }
}

// =============================================================================
// ENCODING
// =============================================================================

impl Patch {
    /// Store path of the record this patch targets.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Patch::FullObject { path, .. } | Patch::FieldSet { path, .. } | Patch::Tombstone { path, .. } => path,
        }
    }

    /// Store key the value is written to.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Patch::FieldSet { path, field, .. } => format!("{path}/{field}"),
            Patch::FullObject { path, .. } | Patch::Tombstone { path, .. } => path.clone(),
        }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Patch::Tombstone { .. })
    }

    /// Wire value written at `key()`.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Patch::FullObject { value, .. } => serde_json::to_value(value),
            Patch::FieldSet { value, .. } => Ok(value.clone()),
            Patch::Tombstone { id, actor, ts, .. } => Ok(json!({
                "id": id,
                "deleted": true,
                "updatedAt": ts,
                "updatedBy": actor,
            })),
        }
    }
}

/// Encode a batch as one multi-key update. Later patches to the same key win.
pub fn to_update_map(patches: &[Patch]) -> Result<UpdateMap, serde_json::Error> {
    let mut map = UpdateMap::new();
    for patch in patches {
        map.insert(patch.key(), patch.to_value()?);
    }
    Ok(map)
}

#[cfg(test)]
#[path = "patch_test.rs"]
mod tests;
