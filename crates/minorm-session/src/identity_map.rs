//! Identity map: one live instance per (entity type, identifier).
//!
//! Entities are handed out as `Arc<RwLock<E>>`. A second lookup of the
//! same key returns a clone of the same `Arc`, never a second copy, so a
//! mutation made through one handle is visible through every other.
//!
//! ```ignore
//! let first = map.put(key.clone(), product, descriptor);
//! let second = map.get::<Product>(&key).unwrap();
//! assert!(Arc::ptr_eq(&first, &second));
//! ```

use crate::dirty::{self, ChangeSet};
use crate::snapshot::Snapshot;
use minorm_core::{Entity, EntityDescriptor, TableInfo, Value, short_type_name};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

/// Shared handle to a tracked entity.
pub type EntityRef<E> = Arc<RwLock<E>>;

/// Identity of one tracked entity: its type and identifier value.
///
/// Identifiers compare by value: `1_i32` and `1_i64` denote the same row.
#[derive(Debug, Clone)]
pub struct EntityKey {
    type_id: TypeId,
    entity: &'static str,
    id: Value,
}

impl EntityKey {
    /// Key for entity type `E` with identifier `id`.
    pub fn of<E: 'static>(id: &Value) -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            entity: short_type_name::<E>(),
            id: id.canonical(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Short name of the entity type.
    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// Canonical identifier value.
    pub fn id(&self) -> &Value {
        &self.id
    }
}

impl PartialEq for EntityKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.id.value_eq(&other.id)
    }
}

impl Eq for EntityKey {}

impl Hash for EntityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        hash_value(&self.id, state);
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}

/// Hash a canonical value. Consistent with `Value::value_eq` for canonical
/// inputs.
fn hash_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
            2u8.hash(hasher);
            v.as_i64().hash(hasher);
        }
        Value::Float(_) | Value::Double(_) => {
            3u8.hash(hasher);
            v.as_f64().map(f64::to_bits).hash(hasher);
        }
        Value::Decimal(s) => {
            4u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Text(s) => {
            5u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            6u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Json(j) => {
            7u8.hash(hasher);
            j.to_string().hash(hasher);
        }
    }
}

/// Type-erased view of one tracked entity, used when the session walks
/// every entry at close without knowing the concrete types.
pub(crate) trait TrackedEntity: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn table(&self) -> &TableInfo;

    /// Changed columns relative to `snapshot`.
    fn diff(&self, snapshot: &Snapshot) -> ChangeSet;
}

struct Tracked<E: Entity> {
    instance: EntityRef<E>,
    descriptor: Arc<EntityDescriptor<E>>,
}

impl<E: Entity> TrackedEntity for Tracked<E> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn table(&self) -> &TableInfo {
        self.descriptor.info()
    }

    fn diff(&self, snapshot: &Snapshot) -> ChangeSet {
        // A writer that panicked leaves the entity in whatever state it
        // reached; flushing that state is still the caller's intent.
        let entity = self.instance.read().unwrap_or_else(|e| e.into_inner());
        dirty::diff(&*entity, snapshot, &self.descriptor)
    }
}

/// Identity map keyed by [`EntityKey`], remembering load order.
#[derive(Default)]
pub struct IdentityMap {
    entries: HashMap<EntityKey, Box<dyn TrackedEntity>>,
    order: Vec<EntityKey>,
}

impl IdentityMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the tracked instance for `key`, if any.
    ///
    /// The returned `Arc` is a clone of the stored one.
    pub fn get<E: Entity>(&self, key: &EntityKey) -> Option<EntityRef<E>> {
        let entry = self.entries.get(key)?;
        let tracked = entry.as_any().downcast_ref::<Tracked<E>>()?;
        Some(Arc::clone(&tracked.instance))
    }

    /// Track `entity` under `key`.
    ///
    /// If the key is already tracked the existing instance is returned and
    /// `entity` is discarded.
    pub fn put<E: Entity>(
        &mut self,
        key: EntityKey,
        entity: E,
        descriptor: Arc<EntityDescriptor<E>>,
    ) -> EntityRef<E> {
        if let Some(existing) = self.get::<E>(&key) {
            return existing;
        }

        let instance: EntityRef<E> = Arc::new(RwLock::new(entity));
        self.entries.insert(
            key.clone(),
            Box::new(Tracked {
                instance: Arc::clone(&instance),
                descriptor,
            }),
        );
        self.order.push(key);
        instance
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Stop tracking `key`.
    pub fn remove(&mut self, key: &EntityKey) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Tracked keys in the order they were loaded.
    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.order.iter()
    }

    /// Tracked entries in load order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&EntityKey, &dyn TrackedEntity)> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key).map(|entry| (key, entry.as_ref())))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityMap")
            .field("keys", &self.order)
            .finish()
    }
}
