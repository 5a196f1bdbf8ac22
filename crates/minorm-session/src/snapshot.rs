//! Load-time snapshots: the baseline for dirty checking.
//!
//! A snapshot copies every persistent field's value at the moment the
//! entity is loaded, before the caller ever sees it. It is never updated
//! afterwards; the values are owned copies, so mutating the live entity
//! cannot reach back into the snapshot.

use crate::identity_map::EntityKey;
use minorm_core::{EntityDescriptor, Value};
use serde::Serialize;
use std::collections::HashMap;

/// Field name to value mapping captured at load time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    values: Vec<(&'static str, Value)>,
}

impl Snapshot {
    /// Read every persistent field of `entity`.
    pub fn capture<E>(entity: &E, descriptor: &EntityDescriptor<E>) -> Self {
        Self {
            values: descriptor.values(entity),
        }
    }

    /// Captured value of `field`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| value)
    }

    /// Captured (field, value) pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.values.iter().map(|(name, value)| (*name, value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Snapshots of every tracked entity, by key.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    snapshots: HashMap<EntityKey, Snapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture `entity` under `key`.
    ///
    /// The first capture for a key wins; a later call returns the existing
    /// snapshot untouched.
    #[tracing::instrument(level = "trace", skip(self, key, entity, descriptor), fields(key = %key))]
    pub fn capture<E>(
        &mut self,
        key: EntityKey,
        entity: &E,
        descriptor: &EntityDescriptor<E>,
    ) -> &Snapshot {
        self.snapshots.entry(key).or_insert_with(|| {
            let snapshot = Snapshot::capture(entity, descriptor);
            tracing::trace!(fields = snapshot.len(), "Captured snapshot");
            snapshot
        })
    }

    pub fn get(&self, key: &EntityKey) -> Option<&Snapshot> {
        self.snapshots.get(key)
    }

    pub fn remove(&mut self, key: &EntityKey) -> Option<Snapshot> {
        self.snapshots.remove(key)
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
