//! Entity declarations.
//!
//! An entity describes itself with an explicit [`EntityDeclaration`]: the
//! optional table name, and for each persistent field its name, optional
//! column name, whether it is the identifier, and a pair of projections
//! used to read and assign the field. Nothing is discovered at runtime.
//!
//! ```
//! use minorm_core::{Decimal, Entity, EntityDeclaration, FieldDeclaration};
//!
//! #[derive(Debug, Default)]
//! struct Product {
//!     id: i64,
//!     name: String,
//!     price: Decimal,
//! }
//!
//! impl Entity for Product {
//!     fn declare() -> EntityDeclaration<Self> {
//!         EntityDeclaration::new()
//!             .table("PRODUCT")
//!             .field(FieldDeclaration::new("id", |p: &Product| &p.id, |p| &mut p.id).column("ID").identifier())
//!             .field(FieldDeclaration::new("name", |p: &Product| &p.name, |p| &mut p.name).column("NAME"))
//!             .field(FieldDeclaration::new("price", |p: &Product| &p.price, |p| &mut p.price).column("PRICE"))
//!     }
//! }
//! ```

use crate::Result;
use crate::row::FromValue;
use crate::types::{SqlType, TypeInfo};
use crate::value::Value;

/// A type that can be loaded and tracked by a session.
///
/// `Default` supplies the blank instance the row mapper fills in.
pub trait Entity: Default + Send + Sync + 'static {
    /// Declarative metadata for this type.
    fn declare() -> EntityDeclaration<Self>;
}

pub(crate) type Getter<E> = Box<dyn Fn(&E) -> Value + Send + Sync>;
pub(crate) type Setter<E> = Box<dyn Fn(&mut E, &Value) -> Result<()> + Send + Sync>;

/// Table-level declaration for an entity type.
pub struct EntityDeclaration<E> {
    pub(crate) type_name: &'static str,
    pub(crate) table: Option<&'static str>,
    pub(crate) fields: Vec<FieldDeclaration<E>>,
}

impl<E: 'static> EntityDeclaration<E> {
    /// Start a declaration. The table name defaults to the type's own name.
    pub fn new() -> Self {
        Self {
            type_name: short_type_name::<E>(),
            table: None,
            fields: Vec::new(),
        }
    }

    /// Map the entity to an explicitly named table.
    pub fn table(mut self, name: &'static str) -> Self {
        self.table = Some(name);
        self
    }

    /// Add a persistent field. Declaration order is column order.
    pub fn field(mut self, field: FieldDeclaration<E>) -> Self {
        self.fields.push(field);
        self
    }

    /// Short name of the declared type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl<E: 'static> Default for EntityDeclaration<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// One persistent field of an entity.
pub struct FieldDeclaration<E> {
    pub(crate) name: &'static str,
    pub(crate) column: Option<&'static str>,
    pub(crate) sql_type: SqlType,
    pub(crate) nullable: bool,
    pub(crate) identifier: bool,
    pub(crate) get: Getter<E>,
    pub(crate) set: Setter<E>,
}

impl<E: 'static> FieldDeclaration<E> {
    /// Declare a field through a shared and a mutable projection.
    ///
    /// The SQL type is taken from the field's Rust type. Reading clones the
    /// field into a [`Value`]; assigning coerces a [`Value`] through
    /// [`FromValue`].
    pub fn new<T>(name: &'static str, get: fn(&E) -> &T, get_mut: fn(&mut E) -> &mut T) -> Self
    where
        T: TypeInfo + FromValue + Clone + Into<Value> + 'static,
    {
        Self {
            name,
            column: None,
            sql_type: T::SQL_TYPE,
            nullable: T::NULLABLE,
            identifier: false,
            get: Box::new(move |entity| get(entity).clone().into()),
            set: Box::new(move |entity, value| {
                *get_mut(entity) = T::from_value(value)?;
                Ok(())
            }),
        }
    }

    /// Map the field to an explicitly named column.
    pub fn column(mut self, name: &'static str) -> Self {
        self.column = Some(name);
        self
    }

    /// Mark this field as the entity's identifier.
    pub fn identifier(mut self) -> Self {
        self.identifier = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Last path segment of a type's name: `shop::model::Product` becomes
/// `Product`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
