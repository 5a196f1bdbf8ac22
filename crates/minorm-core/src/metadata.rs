//! Metadata resolution: from an entity declaration to a validated
//! descriptor with table name, ordered columns and the identifier field.
//!
//! Resolution is pure. Descriptors are cached per type for the life of
//! the process, since declarations cannot change at runtime.

use crate::Result;
use crate::entity::{Entity, EntityDeclaration, Getter, Setter};
use crate::error::{Error, MetadataError, MetadataErrorKind};
use crate::identifiers::is_plain_identifier;
use crate::types::SqlType;
use crate::value::Value;
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

/// Resolved metadata about one persistent field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Rust field name
    pub name: &'static str,
    /// Database column name
    pub column_name: &'static str,
    pub sql_type: SqlType,
    pub nullable: bool,
    /// Whether this is the identifier field
    pub primary_key: bool,
}

/// Type-independent view of an entity's table mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    /// Short name of the entity type.
    pub entity: &'static str,
    pub table_name: &'static str,
    /// Fields in declaration order.
    pub fields: Vec<FieldInfo>,
    /// Index of the identifier within `fields`.
    pub id_index: usize,
}

impl TableInfo {
    pub fn id_field(&self) -> &FieldInfo {
        &self.fields[self.id_index]
    }

    pub fn id_column(&self) -> &'static str {
        self.id_field().column_name
    }

    /// Position of a column in declaration order.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.column_name == column)
    }
}

/// Resolved, validated metadata for entity type `E`, including the field
/// accessors.
pub struct EntityDescriptor<E> {
    info: TableInfo,
    getters: Vec<Getter<E>>,
    setters: Vec<Setter<E>>,
}

impl<E> EntityDescriptor<E> {
    /// Validate a declaration and resolve defaults.
    ///
    /// Fails when the entity declares no fields, zero or several identifier
    /// fields, a name that is not a plain SQL identifier, or two fields with
    /// the same field or column name.
    pub fn from_declaration(declaration: EntityDeclaration<E>) -> Result<Self> {
        let entity = declaration.type_name;
        let fail = |kind, message: String| Error::Metadata(MetadataError::new(entity, kind, message));

        if declaration.fields.is_empty() {
            return Err(fail(
                MetadataErrorKind::NoFields,
                "no persistent fields declared".to_string(),
            ));
        }

        let table_name = declaration.table.unwrap_or(entity);
        if !is_plain_identifier(table_name) {
            return Err(fail(
                MetadataErrorKind::InvalidName,
                format!("table name '{}' is not a plain SQL identifier", table_name),
            ));
        }

        let identifiers: Vec<&'static str> = declaration
            .fields
            .iter()
            .filter(|f| f.identifier)
            .map(|f| f.name)
            .collect();
        let id_name = match identifiers.as_slice() {
            [] => {
                return Err(fail(
                    MetadataErrorKind::MissingIdentifier,
                    "no field is marked as the identifier".to_string(),
                ));
            }
            [single] => *single,
            many => {
                return Err(fail(
                    MetadataErrorKind::MultipleIdentifiers,
                    format!("more than one identifier field: {}", many.join(", ")),
                ));
            }
        };

        let mut field_names = HashSet::new();
        let mut column_names = HashSet::new();
        let mut fields = Vec::with_capacity(declaration.fields.len());
        let mut getters = Vec::with_capacity(declaration.fields.len());
        let mut setters = Vec::with_capacity(declaration.fields.len());
        let mut id_index = 0;

        for (index, field) in declaration.fields.into_iter().enumerate() {
            let column_name = field.column.unwrap_or(field.name);
            if !is_plain_identifier(column_name) {
                return Err(fail(
                    MetadataErrorKind::InvalidName,
                    format!(
                        "column name '{}' of field '{}' is not a plain SQL identifier",
                        column_name, field.name
                    ),
                ));
            }
            if !field_names.insert(field.name) {
                return Err(fail(
                    MetadataErrorKind::Duplicate,
                    format!("field '{}' declared twice", field.name),
                ));
            }
            if !column_names.insert(column_name.to_ascii_lowercase()) {
                return Err(fail(
                    MetadataErrorKind::Duplicate,
                    format!("column '{}' mapped by more than one field", column_name),
                ));
            }
            if field.name == id_name {
                id_index = index;
            }

            fields.push(FieldInfo {
                name: field.name,
                column_name,
                sql_type: field.sql_type,
                nullable: field.nullable,
                primary_key: field.identifier,
            });
            getters.push(field.get);
            setters.push(field.set);
        }

        tracing::debug!(
            entity = entity,
            table = table_name,
            columns = fields.len(),
            id = fields[id_index].column_name,
            "Resolved entity metadata"
        );

        Ok(Self {
            info: TableInfo {
                entity,
                table_name,
                fields,
                id_index,
            },
            getters,
            setters,
        })
    }

    /// Type-independent table mapping.
    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    pub fn entity_name(&self) -> &'static str {
        self.info.entity
    }

    pub fn table_name(&self) -> &'static str {
        self.info.table_name
    }

    /// Ordered `(field, column)` pairs.
    pub fn columns(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.info.fields.iter().map(|f| (f.name, f.column_name))
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.info.fields
    }

    pub fn id_field(&self) -> &FieldInfo {
        self.info.id_field()
    }

    pub fn id_column(&self) -> &'static str {
        self.info.id_column()
    }

    /// Current value of the field at `index`.
    pub fn read(&self, entity: &E, index: usize) -> Option<Value> {
        self.getters.get(index).map(|get| get(entity))
    }

    /// Assign the field at `index`, coercing `value` to the field's type.
    pub fn write(&self, entity: &mut E, index: usize, value: &Value) -> Result<()> {
        match self.setters.get(index) {
            Some(set) => set(entity, value),
            None => Err(Error::Custom(format!(
                "{} has no field at index {}",
                self.info.entity, index
            ))),
        }
    }

    /// Current identifier value.
    pub fn id_value(&self, entity: &E) -> Value {
        (self.getters[self.info.id_index])(entity)
    }

    /// Every persistent field's current value, in declaration order.
    pub fn values(&self, entity: &E) -> Vec<(&'static str, Value)> {
        self.info
            .fields
            .iter()
            .zip(&self.getters)
            .map(|(field, get)| (field.name, get(entity)))
            .collect()
    }
}

impl<E: Default> EntityDescriptor<E> {
    /// Convert a caller-supplied identifier to the identifier field's own
    /// type, so `1_i32` and `1_i64` both become the value a loaded entity
    /// would report.
    pub fn coerce_id(&self, id: &Value) -> Result<Value> {
        let mut entity = E::default();
        self.write(&mut entity, self.info.id_index, id)?;
        Ok(self.id_value(&entity))
    }
}

impl<E> fmt::Debug for EntityDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

type DescriptorCache = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

fn descriptor_cache() -> &'static DescriptorCache {
    static CACHE: OnceLock<DescriptorCache> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Resolve (or fetch the cached) descriptor for `E`.
///
/// Failed resolutions are not cached; every attempt reports the error.
pub fn resolve<E: Entity>() -> Result<Arc<EntityDescriptor<E>>> {
    let type_id = TypeId::of::<E>();
    {
        // Recover from a poisoned lock: the map is only ever inserted into.
        let cache = descriptor_cache()
            .read()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.get(&type_id) {
            if let Ok(descriptor) = Arc::clone(cached).downcast::<EntityDescriptor<E>>() {
                return Ok(descriptor);
            }
        }
    }

    let descriptor = Arc::new(EntityDescriptor::from_declaration(E::declare())?);
    let mut cache = descriptor_cache()
        .write()
        .unwrap_or_else(|e| e.into_inner());
    let entry = cache
        .entry(type_id)
        .or_insert_with(|| Arc::clone(&descriptor) as Arc<dyn Any + Send + Sync>);
    Ok(Arc::clone(entry)
        .downcast::<EntityDescriptor<E>>()
        .unwrap_or(descriptor))
}

/// Table name for `E`.
pub fn resolve_table<E: Entity>() -> Result<&'static str> {
    Ok(resolve::<E>()?.table_name())
}

/// Ordered `(field, column)` pairs for `E`.
pub fn resolve_columns<E: Entity>() -> Result<Vec<(&'static str, &'static str)>> {
    Ok(resolve::<E>()?.columns().collect())
}

/// Name of `E`'s identifier field.
pub fn resolve_id_field<E: Entity>() -> Result<&'static str> {
    Ok(resolve::<E>()?.id_field().name)
}
