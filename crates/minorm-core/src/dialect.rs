//! SQL dialects: placeholder syntax and identifier quoting.

use crate::identifiers::{quote_ident, quote_ident_mysql};
use serde::{Deserialize, Serialize};

/// SQL dialect for generating statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite dialect (uses ?1, ?2 placeholders)
    #[default]
    Sqlite,
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    Postgres,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    ///
    /// Quoting keeps the declared spelling, reserved words included, so the
    /// name is matched exactly as declared:
    ///
    /// - SQLite and MySQL compare table and column names without regard to
    ///   case, so `"Product"` finds a table created as `product`.
    /// - PostgreSQL folds unquoted names to lower case when a table is
    ///   created, and a quoted name is case-sensitive. Declare lower-case
    ///   names for tables created without quotes.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => quote_ident(name),
            Dialect::Mysql => quote_ident_mysql(name),
        }
    }
}
