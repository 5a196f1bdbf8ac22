//! A `DataSource` that opens one SQLite connection per lease.

use crate::connection::{SqliteConfig, SqliteConnection};
use minorm_core::{ConnectionLease, Cx, DataSource, Dialect, Error, Outcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct LeaseCounters {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

/// Opens a fresh [`SqliteConnection`] for every acquire and closes it when
/// the lease ends.
///
/// Named in-memory databases keep an anchor connection open for the
/// lifetime of the data source; without it the database would vanish as
/// soon as the last lease closed.
#[derive(Debug)]
pub struct SqliteDataSource {
    config: SqliteConfig,
    anchor: Option<SqliteConnection>,
    counters: Arc<LeaseCounters>,
}

impl SqliteDataSource {
    /// Data source over an arbitrary configuration.
    pub fn new(config: SqliteConfig) -> Self {
        Self {
            config,
            anchor: None,
            counters: Arc::default(),
        }
    }

    /// Data source over a database file.
    pub fn file(path: impl Into<String>) -> Self {
        Self::new(SqliteConfig::file(path))
    }

    /// Data source over a named in-memory database.
    ///
    /// Every data source created with the same `name` in this process sees
    /// the same database while at least one of them is alive.
    pub fn memory(name: &str) -> Result<Self, Error> {
        if name.is_empty() || name.contains(['?', '#', '/', '&']) {
            return Err(Error::Config(minorm_core::ConfigError {
                message: format!("invalid in-memory database name '{name}'"),
                source: None,
            }));
        }
        let config = SqliteConfig::shared_memory(name);
        let anchor = SqliteConnection::open(&config)?;
        tracing::debug!(name, "Opened shared in-memory database");
        Ok(Self {
            config,
            anchor: Some(anchor),
            counters: Arc::default(),
        })
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Open an unleased connection, e.g. for schema setup.
    pub fn connect(&self) -> Result<SqliteConnection, Error> {
        SqliteConnection::open(&self.config)
    }

    /// Run raw SQL (DDL, fixtures) on a short-lived connection.
    pub fn execute_batch(&self, sql: &str) -> Result<(), Error> {
        self.connect()?.execute_raw(sql)
    }

    /// Leases handed out so far.
    pub fn acquired(&self) -> usize {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    /// Leases that have ended so far.
    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    /// Leases currently outstanding.
    pub fn in_use(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }

    /// Whether this source keeps an anchor connection open.
    pub fn is_anchored(&self) -> bool {
        self.anchor.is_some()
    }
}

impl DataSource for SqliteDataSource {
    type Conn = SqliteConnection;

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn acquire(
        &self,
        _cx: &Cx,
    ) -> impl Future<Output = Outcome<ConnectionLease<SqliteConnection>, Error>> + Send {
        let result = SqliteConnection::open(&self.config).map(|conn| {
            let total = self.counters.acquired.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::trace!(acquired = total, "Leased SQLite connection");
            let counters = Arc::clone(&self.counters);
            ConnectionLease::with_release(conn, move |_| {
                counters.released.fetch_add(1, Ordering::SeqCst);
            })
        });
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }
}
