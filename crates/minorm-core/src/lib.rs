//! Core types and traits for minorm.
//!
//! - `Value` / `Row` for dynamically typed statement parameters and results
//! - `Entity` declarations and the metadata resolver that validates them
//! - `map_row` for turning a result row into a fresh entity
//! - `Connection` / `DataSource` for the storage seam
//! - `Outcome` and `Cx` re-exported from asupersync

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod decimal;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod identifiers;
pub mod mapper;
pub mod metadata;
pub mod row;
pub mod types;
pub mod value;

pub use connection::{Connection, ConnectionLease, DataSource};
pub use decimal::Decimal;
pub use dialect::Dialect;
pub use entity::{Entity, EntityDeclaration, FieldDeclaration, short_type_name};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, FlushError, MappingError,
    MappingFailure, MetadataError, MetadataErrorKind, NotFoundError, QueryError, QueryErrorKind,
    Result, SessionError, TypeError,
};
pub use identifiers::{is_plain_identifier, quote_ident, quote_ident_mysql};
pub use mapper::map_row;
pub use metadata::{
    EntityDescriptor, FieldInfo, TableInfo, resolve, resolve_columns, resolve_id_field,
    resolve_table,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::{SqlType, TypeInfo};
pub use value::Value;
