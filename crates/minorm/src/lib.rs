//! minorm - a small unit-of-work persistence session.
//!
//! Load entities by identifier, mutate them freely, and let
//! [`Session::close`] write back exactly the fields that changed:
//!
//! - one in-memory instance per (entity type, identifier) per session
//! - snapshot-based dirty checking by value
//! - parameterized SELECT and UPDATE only; values never reach SQL text
//! - one leased connection per statement from a [`DataSource`]
//!
//! # Quick Start
//!
//! ```ignore
//! use minorm::prelude::*;
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
//!
//! async fn rename(cx: &Cx, factory: &SessionFactory<SqliteDataSource>) -> Outcome<FlushReport, Error> {
//!     let mut session = factory.open();
//!     let product = match session.find::<Product>(cx, 1).await {
//!         Outcome::Ok(p) => p,
//!         Outcome::Err(e) => return Outcome::Err(e),
//!         Outcome::Cancelled(r) => return Outcome::Cancelled(r),
//!         Outcome::Panicked(p) => return Outcome::Panicked(p),
//!     };
//!     product.write().unwrap().name = "B".to_string();
//!     session.close(cx).await
//! }
//! ```

// Re-export all public types from sub-crates
pub use minorm_core::{
    ColumnInfo, Connection, ConnectionLease, Cx, DataSource, Decimal, Dialect, Entity,
    EntityDeclaration, EntityDescriptor, Error, FieldDeclaration, FieldInfo, FlushError,
    FromValue, Outcome, Result, Row, SessionError, SqlType, TableInfo, TypeInfo, Value, map_row,
    resolve, resolve_columns, resolve_id_field, resolve_table,
};
pub use minorm_query::{SelectById, UpdateById};
pub use minorm_session::{
    ChangeSet, EntityKey, EntityRef, FlushPlan, FlushPolicy, FlushReport, IdentityMap,
    PendingUpdate, Session, SessionConfig, SessionDebugInfo, SessionFactory, SessionState,
    Snapshot, SnapshotStore,
};
pub use minorm_sqlite::{OpenFlags, SqliteConfig, SqliteConnection, SqliteDataSource};

/// Everything needed to declare entities and run sessions.
///
/// ```ignore
/// use minorm::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Connection, Cx, DataSource, Decimal, Dialect, Entity, EntityDeclaration, EntityRef, Error,
        FieldDeclaration, FlushPolicy, FlushReport, Outcome, Result, Row, Session, SessionConfig,
        SessionFactory, SqliteDataSource, Value,
    };
}
