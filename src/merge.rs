//! Merge — last-writer-wins reconciliation of local and remote collections.
//!
//! DESIGN
//! ======
//! Each record carries `updatedAt`. A remote record replaces the local one
//! only when strictly newer; ties keep what is already there. A tombstone
//! competes under the same rule, so a delete can lose to a later edit and an
//! edit can lose to a later delete.
//!
//! Records without an id or a non-zero `updatedAt` are not mergeable and are
//! dropped on either side. Output order is the local order followed by newly
//! seen remote records, which keeps the result stable across repeated merges
//! of the same snapshot.
//!
//! DECODING
//! ========
//! Remote collections are JSON objects keyed by id. A record with
//! `deleted: true` is a tombstone whatever else it carries; anything else must
//! decode as the entity type or it is skipped.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::doc::{ActorId, Entity, EntityId, Timestamp};

// =============================================================================
// TYPES
// =============================================================================

/// Anything the merge can order: an id, a stamp, and a deletion flag.
pub trait Versioned {
    fn id(&self) -> Option<&str>;

    fn updated_at(&self) -> Option<Timestamp>;

    fn is_deleted(&self) -> bool {
        false
    }
}

/// Deletion marker as it appears in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    #[serde(default)]
    pub id: EntityId,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_by: Option<ActorId>,
}

/// A record on either side of a merge.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry<T> {
    Live(T),
    Tombstone(Tombstone),
}

impl<T> Entry<T> {
    #[must_use]
    pub fn into_live(self) -> Option<T> {
        match self {
            Entry::Live(item) => Some(item),
            Entry::Tombstone(_) => None,
        }
    }
}

impl<T: Entity> Versioned for Entry<T> {
    fn id(&self) -> Option<&str> {
        let id = match self {
            Entry::Live(item) => item.id(),
            Entry::Tombstone(t) => t.id.as_str(),
        };
        (!id.is_empty()).then_some(id)
    }

    fn updated_at(&self) -> Option<Timestamp> {
        match self {
            Entry::Live(item) => item.updated_at(),
            Entry::Tombstone(t) => t.updated_at,
        }
    }

    fn is_deleted(&self) -> bool {
        matches!(self, Entry::Tombstone(_))
    }
}

// =============================================================================
// MERGE
// =============================================================================

fn mergeable<T: Versioned>(item: &T) -> Option<(String, Timestamp)> {
    let id = item.id()?;
    let ts = item.updated_at().filter(|ts| *ts != 0)?;
    Some((id.to_string(), ts))
}

/// Merge `remote` into `local` under last-writer-wins.
///
/// Neither input is modified; the result owns the surviving records.
pub fn merge_lww<T: Versioned>(local: Vec<T>, remote: Vec<T>) -> Vec<T> {
    // id -> (insertion sequence, timestamp, record)
    let mut merged: HashMap<String, (usize, Timestamp, T)> = HashMap::new();
    let mut seq = 0usize;

    for item in local {
        let Some((id, ts)) = mergeable(&item) else { continue };
        let order = merged.get(&id).map_or_else(
            || {
                seq += 1;
                seq
            },
            |(order, _, _)| *order,
        );
        merged.insert(id, (order, ts, item));
    }

    for item in remote {
        let Some((id, ts)) = mergeable(&item) else { continue };
        let newer = merged.get(&id).is_none_or(|(_, current, _)| ts > *current);
        if !newer {
            continue;
        }
        if item.is_deleted() {
            merged.remove(&id);
        } else {
            let order = merged.get(&id).map_or_else(
                || {
                    seq += 1;
                    seq
                },
                |(order, _, _)| *order,
            );
            merged.insert(id, (order, ts, item));
        }
    }

    let mut out: Vec<(usize, T)> = merged.into_values().map(|(order, _, item)| (order, item)).collect();
    out.sort_by_key(|(order, _)| *order);
    out.into_iter().map(|(_, item)| item).collect()
}

/// Drop tombstones from a merge result.
pub fn live<T>(entries: Vec<Entry<T>>) -> Vec<T> {
    entries.into_iter().filter_map(Entry::into_live).collect()
}

// =============================================================================
// TOMBSTONE LEDGER
// =============================================================================

/// Tombstones that have won against a replica's live records.
///
/// Live collections never hold tombstones, so without this a live record
/// older than a delete could reappear when delivered after it. Invariant: no
/// id is both in the ledger and in the live collection it guards.
#[derive(Debug, Clone, Default)]
pub struct TombstoneLedger {
    entries: HashMap<EntityId, Tombstone>,
}

impl TombstoneLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `tombstone`, keeping the newer stamp for a known id.
    pub fn record(&mut self, tombstone: Tombstone) {
        if tombstone.id.is_empty() || tombstone.updated_at.unwrap_or(0) == 0 {
            return;
        }
        let newer = self
            .entries
            .get(&tombstone.id)
            .is_none_or(|t| tombstone.updated_at.unwrap_or(0) > t.updated_at.unwrap_or(0));
        if newer {
            self.entries.insert(tombstone.id.clone(), tombstone);
        }
    }

    /// Forget `id`, e.g. because it was re-created locally.
    pub fn retire(&mut self, id: &str) -> Option<Tombstone> {
        self.entries.remove(id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Tombstone> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Merge a remote snapshot into live records, consulting and updating `ledger`.
///
/// Returns the surviving live records in merge order.
pub fn merge_remote<T: Entity>(local: Vec<T>, ledger: &mut TombstoneLedger, remote: Vec<Entry<T>>) -> Vec<T> {
    // Record first so a tombstone beats an older live record in the same batch.
    for entry in &remote {
        if let Entry::Tombstone(t) = entry {
            ledger.record(t.clone());
        }
    }

    let local_stamps: HashMap<String, Timestamp> = local
        .iter()
        .map(|item| (item.id().to_string(), item.updated_at().unwrap_or(0)))
        .collect();
    let buried: Vec<Entry<T>> = ledger
        .entries
        .values()
        .filter(|t| {
            local_stamps
                .get(&t.id)
                .is_none_or(|ts| t.updated_at.unwrap_or(0) > *ts)
        })
        .cloned()
        .map(Entry::Tombstone)
        .collect();

    let mut seeded: Vec<Entry<T>> = local.into_iter().map(Entry::Live).collect();
    seeded.extend(buried);

    let merged = live(merge_lww(seeded, remote));
    for item in &merged {
        ledger.retire(item.id());
    }
    merged
}

// =============================================================================
// DECODING
// =============================================================================

/// Decode one remote record, or `None` if it is malformed.
pub fn decode_entry<T: Entity>(value: &Value) -> Option<Entry<T>> {
    let deleted = value.get("deleted").and_then(Value::as_bool).unwrap_or(false);
    if deleted {
        return match Tombstone::deserialize(value) {
            Ok(t) => Some(Entry::Tombstone(t)),
            Err(e) => {
                debug!(error = %e, "merge: skipping malformed tombstone");
                None
            }
        };
    }
    match T::deserialize(value) {
        Ok(item) => Some(Entry::Live(item)),
        Err(e) => {
            debug!(error = %e, collection = T::COLLECTION.as_str(), "merge: skipping malformed record");
            None
        }
    }
}

/// Decode a remote collection snapshot. `null` is an empty collection.
pub fn decode_entries<T: Entity>(snapshot: &Value) -> Vec<Entry<T>> {
    match snapshot {
        Value::Object(map) => map.values().filter_map(decode_entry::<T>).collect(),
        Value::Array(items) => items.iter().filter(|v| !v.is_null()).filter_map(decode_entry::<T>).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[path = "merge_test.rs"]
mod tests;
