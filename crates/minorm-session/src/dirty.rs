//! Dirty detection by comparing live field values against the load-time
//! snapshot.
//!
//! Comparison is by value, not by reference: a text field reassigned to an
//! equal but distinct string is clean, and decimals compare regardless of
//! scale (`10.50` equals `10.5`).

use crate::snapshot::Snapshot;
use minorm_core::{EntityDescriptor, Value};
use serde::Serialize;

/// Changed columns of one entity, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    changes: Vec<(&'static str, Value)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Names of the changed columns.
    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.changes.iter().map(|(column, _)| *column)
    }

    /// (column, current value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.changes.iter().map(|(column, value)| (*column, value))
    }
}

/// Columns whose current value differs from `snapshot`.
///
/// A field missing from the snapshot counts as changed.
pub fn diff<E>(entity: &E, snapshot: &Snapshot, descriptor: &EntityDescriptor<E>) -> ChangeSet {
    let mut changes = Vec::new();
    for (index, field) in descriptor.fields().iter().enumerate() {
        let Some(current) = descriptor.read(entity, index) else {
            continue;
        };
        let changed = match snapshot.get(field.name) {
            Some(original) => !current.value_eq(original),
            None => true,
        };
        if changed {
            tracing::trace!(
                entity = descriptor.entity_name(),
                field = field.name,
                "Field changed since load"
            );
            changes.push((field.column_name, current));
        }
    }
    ChangeSet { changes }
}
