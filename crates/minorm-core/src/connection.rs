//! Database connection traits.
//!
//! - [`Connection`] executes parameterized statements.
//! - [`DataSource`] is the external "acquire a connection" capability.
//! - [`ConnectionLease`] scopes one acquired connection; dropping it
//!   releases the connection, on success and failure paths alike.
//!
//! All operations integrate with asupersync via the `Cx` context, so
//! cancellation surfaces as `Outcome::Cancelled` rather than a hang.

use crate::dialect::Dialect;
use crate::error::Error;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::fmt;
use std::ops::Deref;

/// A database connection capable of executing parameterized statements.
///
/// Every value reaches the database as a bound parameter; implementations
/// must never splice `params` into the SQL text.
///
/// # Example
///
/// ```rust,ignore
/// let rows = conn
///     .query(&cx, "SELECT \"NAME\" FROM \"PRODUCT\" WHERE \"ID\" = ?1", &[Value::BigInt(1)])
///     .await;
/// ```
pub trait Connection: Send + Sync {
    /// Dialect used to render placeholders and quote identifiers.
    fn dialect(&self) -> Dialect;

    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a query and return the first row, if any.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let fut = self.query(cx, sql, params);
        async move {
            match fut.await {
                Outcome::Ok(rows) => Outcome::Ok(rows.into_iter().next()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    /// Execute a statement (UPDATE, INSERT, DDL) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Check if the connection is still usable.
    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}

/// Provider of connections, one per statement.
///
/// Implementations decide what acquiring means (open a fresh connection,
/// check one out of a pool, ...). Failure to acquire must surface as an
/// error, never block indefinitely.
pub trait DataSource: Send + Sync {
    /// Connection type handed out by this provider.
    type Conn: Connection;

    /// Dialect of the connections this provider hands out.
    fn dialect(&self) -> Dialect;

    /// Acquire a connection scoped to the returned lease.
    fn acquire(
        &self,
        cx: &Cx,
    ) -> impl Future<Output = Outcome<ConnectionLease<Self::Conn>, Error>> + Send;
}

type ReleaseHook<C> = Box<dyn FnOnce(&mut C) + Send + Sync>;

/// A connection held for the duration of one statement.
///
/// The provider's release hook runs exactly once, when the lease is
/// dropped; the connection itself is dropped right after.
pub struct ConnectionLease<C> {
    conn: C,
    on_release: Option<ReleaseHook<C>>,
}

impl<C> ConnectionLease<C> {
    /// Lease a connection with no release hook; releasing drops it.
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            on_release: None,
        }
    }

    /// Lease a connection, running `release` when the lease ends.
    pub fn with_release(conn: C, release: impl FnOnce(&mut C) + Send + Sync + 'static) -> Self {
        Self {
            conn,
            on_release: Some(Box::new(release)),
        }
    }

    /// End the lease now. Equivalent to dropping it.
    pub fn release(self) {
        drop(self);
    }
}

impl<C> Deref for ConnectionLease<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<C> Drop for ConnectionLease<C> {
    fn drop(&mut self) {
        if let Some(release) = self.on_release.take() {
            release(&mut self.conn);
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for ConnectionLease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("conn", &self.conn)
            .field("has_release_hook", &self.on_release.is_some())
            .finish()
    }
}
