//! Statement construction for minorm.
//!
//! `minorm-query` turns resolved entity metadata ([`TableInfo`]) into
//! parameterized SQL: a SELECT of one row by identifier, and an UPDATE of
//! the changed columns of one row by identifier. Dialects control
//! placeholder syntax and identifier quoting.
//!
//! [`TableInfo`]: minorm_core::TableInfo

pub mod builder;

pub use builder::{SelectById, UpdateById};
pub use minorm_core::Dialect;
