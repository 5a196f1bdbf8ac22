//! SQLite driver for minorm.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! `SqliteConnection` implements minorm-core's `Connection` over the bundled
//! libsqlite3, and `SqliteDataSource` hands out one connection per lease.
//!
//! # Example
//!
//! ```rust,ignore
//! use minorm_sqlite::SqliteDataSource;
//!
//! let source = SqliteDataSource::memory("shop")?;
//! source.execute_batch("CREATE TABLE PRODUCT (ID INTEGER PRIMARY KEY, NAME TEXT)")?;
//! ```
//!
//! # Type Mapping
//!
//! | minorm `Value` | SQLite storage |
//! |----------------|----------------|
//! | `Bool` | INTEGER (0/1) |
//! | `TinyInt` .. `BigInt` | INTEGER |
//! | `Float`, `Double` | REAL |
//! | `Decimal`, `Text`, `Json` | TEXT |
//! | `Bytes` | BLOB |
//! | `Null` | NULL |
//!
//! Declare decimal columns as `TEXT` to read back the exact digits that were
//! written; `NUMERIC` affinity converts them to REAL.

pub mod connection;
pub mod datasource;
pub mod ffi;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};
pub use datasource::SqliteDataSource;

/// Version of the linked SQLite library.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// Version number of the linked SQLite library.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
