//! SQL identifier validation and quoting.
//!
//! Table and column names come from entity declarations, never from user
//! input, but they are still validated once at metadata resolution and
//! quoted every time they are written into a statement.

use regex::Regex;
use std::sync::OnceLock;

/// Pattern accepted for table and column names.
pub const PLAIN_IDENTIFIER: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

fn plain_identifier_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    match REGEX.get_or_init(|| Regex::new(PLAIN_IDENTIFIER)) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(pattern = PLAIN_IDENTIFIER, error = %e, "identifier pattern failed to compile");
            None
        }
    }
}

/// Check that `name` is a plain SQL identifier: a letter or underscore
/// followed by letters, digits and underscores.
///
/// Returns `false` if the pattern could not be compiled.
///
/// # Examples
///
/// ```
/// use minorm_core::is_plain_identifier;
///
/// assert!(is_plain_identifier("PRODUCT"));
/// assert!(is_plain_identifier("_unit_price2"));
/// assert!(!is_plain_identifier("2fast"));
/// assert!(!is_plain_identifier("name; DROP TABLE x"));
/// ```
pub fn is_plain_identifier(name: &str) -> bool {
    plain_identifier_regex().is_some_and(|regex| regex.is_match(name))
}

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// # Examples
///
/// ```
/// use minorm_core::quote_ident;
///
/// assert_eq!(quote_ident("PRODUCT"), "\"PRODUCT\"");
/// assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a SQL identifier using MySQL backtick quoting.
#[inline]
pub fn quote_ident_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
