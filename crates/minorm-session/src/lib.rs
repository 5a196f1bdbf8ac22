//! Session and unit of work for minorm.
//!
//! `minorm-session` is the **unit-of-work layer**. A [`Session`] loads
//! entities by identifier, hands every caller the same live instance for
//! the same row, and on [`Session::close`] writes back exactly the fields
//! that changed since load.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: one in-memory instance per (entity type, identifier).
//! - **Snapshots**: a copy of every field taken at load time.
//! - **Dirty checking**: value comparison against the snapshot at close.
//! - **Connections**: one lease per statement from a [`DataSource`].
//!
//! There is no implicit flush. Mutations only reach the database through
//! `close`, and a session that is dropped while open writes nothing.
//!
//! # Example
//!
//! ```ignore
//! let factory = SessionFactory::new(SqliteDataSource::memory("shop")?);
//! let mut session = factory.open();
//!
//! let product = session.find::<Product>(&cx, 1).await?;
//! product.write().unwrap().name = "B".to_string();
//!
//! let report = session.close(&cx).await?;
//! assert_eq!(report.statements(), 1);
//! ```

pub mod dirty;
pub mod flush;
pub mod identity_map;
pub mod snapshot;

pub use dirty::ChangeSet;
pub use flush::{FlushPlan, FlushPolicy, FlushReport, PendingUpdate};
pub use identity_map::{EntityKey, EntityRef, IdentityMap};
pub use snapshot::{Snapshot, SnapshotStore};

use asupersync::{Cx, Outcome};
use minorm_core::{
    ConfigError, Connection, DataSource, Dialect, Entity, Error, NotFoundError, SessionError,
    Value, map_row, resolve, short_type_name,
};
use minorm_query::SelectById;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// What `close` does when an UPDATE fails.
    pub flush_policy: FlushPolicy,
    /// Dialect for generated SQL. `None` uses the data source's dialect.
    pub dialect: Option<Dialect>,
    /// Whether dropping an open session that tracks entities logs a warning.
    pub warn_on_unclosed: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            flush_policy: FlushPolicy::AbortOnError,
            dialect: None,
            warn_on_unclosed: true,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> minorm_core::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid session configuration: {e}"),
                source: Some(Box::new(e)),
            })
        })
    }

    #[must_use]
    pub fn flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    #[must_use]
    pub fn warn_on_unclosed(mut self, warn: bool) -> Self {
        self.warn_on_unclosed = warn;
        self
    }
}

// ============================================================================
// Session
// ============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Closed,
}

/// A unit of work over one [`DataSource`].
///
/// Not meant to be shared between tasks: every operation takes `&mut self`.
pub struct Session<D: DataSource> {
    source: Arc<D>,
    config: SessionConfig,
    state: SessionState,
    identity_map: IdentityMap,
    snapshots: SnapshotStore,
}

impl<D: DataSource> Session<D> {
    /// Open a session with the default configuration.
    pub fn new(source: Arc<D>) -> Self {
        Self::with_config(source, SessionConfig::default())
    }

    /// Open a session with custom configuration.
    pub fn with_config(source: Arc<D>, config: SessionConfig) -> Self {
        tracing::debug!(config = ?config, "Opening session");
        Self {
            source,
            config,
            state: SessionState::Open,
            identity_map: IdentityMap::new(),
            snapshots: SnapshotStore::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Number of entities in the identity map.
    pub fn tracked_count(&self) -> usize {
        self.identity_map.len()
    }

    /// Whether an instance of `E` with identifier `id` is tracked.
    pub fn is_tracked<E: Entity>(&self, id: impl Into<Value>) -> bool {
        let id = id.into();
        let id = resolve::<E>()
            .and_then(|descriptor| descriptor.coerce_id(&id))
            .unwrap_or(id);
        self.identity_map.contains(&EntityKey::of::<E>(&id))
    }

    fn dialect(&self) -> Dialect {
        self.config.dialect.unwrap_or_else(|| self.source.dialect())
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Closed => Err(Error::Session(SessionError::Closed)),
        }
    }

    /// Get an entity by identifier.
    ///
    /// The identity map is consulted first; a hit returns the tracked
    /// instance without touching the database. On a miss one SELECT runs on
    /// a freshly acquired connection, the row is mapped, snapshotted, and
    /// tracked. A missing row is `Error::NotFound` and leaves nothing
    /// cached, so a later call queries again.
    ///
    /// `id` is converted to the identifier field's type before the lookup,
    /// and a loaded row is tracked under its own identifier, so every form
    /// of one identifier reaches the same instance.
    #[tracing::instrument(level = "debug", skip(self, cx, id), fields(entity = short_type_name::<E>()))]
    pub async fn find<E: Entity>(
        &mut self,
        cx: &Cx,
        id: impl Into<Value>,
    ) -> Outcome<EntityRef<E>, Error> {
        if let Err(e) = self.ensure_open() {
            return Outcome::Err(e);
        }

        let id = id.into();
        let descriptor = match resolve::<E>() {
            Ok(descriptor) => descriptor,
            Err(e) => return Outcome::Err(e),
        };
        let id = match descriptor.coerce_id(&id) {
            Ok(coerced) => coerced,
            Err(e) => {
                tracing::debug!(id = %id, error = %e, "Identifier kept as given");
                id
            }
        };
        let key = EntityKey::of::<E>(&id);

        if let Some(existing) = self.identity_map.get::<E>(&key) {
            tracing::trace!(key = %key, "Identity map hit");
            return Outcome::Ok(existing);
        }

        let (sql, params) =
            SelectById::new(descriptor.info()).build_with_dialect(self.dialect(), id.clone());
        tracing::debug!(key = %key, sql = %sql, "Loading entity");

        let lease = match self.source.acquire(cx).await {
            Outcome::Ok(lease) => lease,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let rows = match lease.query(cx, &sql, &params).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        lease.release();

        let Some(row) = rows.first() else {
            tracing::debug!(key = %key, "No row for identifier");
            return Outcome::Err(Error::NotFound(NotFoundError {
                entity: descriptor.entity_name().to_string(),
                table: descriptor.table_name().to_string(),
                id: id.to_string(),
            }));
        };
        if rows.len() > 1 {
            tracing::warn!(
                key = %key,
                rows = rows.len(),
                "Identifier matched several rows; using the first"
            );
        }

        let entity = match map_row(row, &descriptor) {
            Ok(entity) => entity,
            Err(e) => return Outcome::Err(e),
        };

        // The database may match an identifier of another type (`"1"` for
        // an integer column); the row's own identifier decides identity.
        let loaded = EntityKey::of::<E>(&descriptor.id_value(&entity));
        if let Some(existing) = self.identity_map.get::<E>(&loaded) {
            tracing::debug!(requested = %key, key = %loaded, "Row already tracked");
            return Outcome::Ok(existing);
        }

        self.snapshots.capture(loaded.clone(), &entity, &descriptor);
        let instance = self.identity_map.put(loaded, entity, descriptor);
        tracing::debug!(tracked = self.identity_map.len(), "Entity loaded and tracked");
        Outcome::Ok(instance)
    }

    /// End the unit of work.
    ///
    /// Every tracked entity is diffed against its snapshot and each dirty
    /// one gets a single UPDATE of its changed columns. Clean entities cost
    /// nothing. The session is closed and its caches dropped whatever the
    /// outcome; failures follow the configured [`FlushPolicy`].
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn close(&mut self, cx: &Cx) -> Outcome<FlushReport, Error> {
        if let Err(e) = self.ensure_open() {
            return Outcome::Err(e);
        }

        let plan = FlushPlan::collect(&self.identity_map, &self.snapshots, self.dialect());
        let tracked = self.identity_map.len();
        self.state = SessionState::Closed;

        let outcome = plan
            .execute(cx, self.source.as_ref(), self.config.flush_policy)
            .await;

        self.identity_map.clear();
        self.snapshots.clear();

        if let Outcome::Ok(report) = &outcome {
            tracing::info!(
                tracked,
                updated = report.statements(),
                rows = report.rows_affected,
                "Session closed"
            );
        }
        outcome
    }

    /// Dump session state for debugging.
    pub fn debug_info(&self) -> SessionDebugInfo {
        SessionDebugInfo {
            state: self.state,
            tracked: self.identity_map.len(),
            snapshots: self.snapshots.len(),
            keys: self.identity_map.keys().map(ToString::to_string).collect(),
        }
    }
}

impl<D: DataSource> Drop for Session<D> {
    fn drop(&mut self) {
        if self.is_open() && !self.identity_map.is_empty() && self.config.warn_on_unclosed {
            tracing::warn!(
                tracked = self.identity_map.len(),
                "Session dropped without close; pending changes are discarded"
            );
        }
    }
}

impl<D: DataSource> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("identity_map", &self.identity_map)
            .finish_non_exhaustive()
    }
}

/// Debug information about session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDebugInfo {
    pub state: SessionState,
    /// Entities in the identity map.
    pub tracked: usize,
    /// Load-time snapshots held.
    pub snapshots: usize,
    /// Tracked keys in load order.
    pub keys: Vec<String>,
}

// ============================================================================
// Session Factory
// ============================================================================

/// Opens sessions over one shared data source.
#[derive(Debug)]
pub struct SessionFactory<D: DataSource> {
    source: Arc<D>,
    config: SessionConfig,
}

impl<D: DataSource> SessionFactory<D> {
    pub fn new(source: D) -> Self {
        Self::from_arc(Arc::new(source))
    }

    pub fn from_arc(source: Arc<D>) -> Self {
        Self {
            source,
            config: SessionConfig::default(),
        }
    }

    /// Configuration applied to every session opened from now on.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<D> {
        &self.source
    }

    /// Open a fresh session with empty caches.
    pub fn open(&self) -> Session<D> {
        Session::with_config(Arc::clone(&self.source), self.config.clone())
    }
}

impl<D: DataSource> Clone for SessionFactory<D> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            config: self.config.clone(),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::manual_async_fn)] // Mock trait impls must match trait signatures
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use minorm_core::{
        ConnectionError, ConnectionErrorKind, ConnectionLease, Decimal, EntityDeclaration,
        FieldDeclaration, QueryError, QueryErrorKind, Row,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Product {
        id: i64,
        name: String,
        price: Decimal,
    }

    impl Entity for Product {
        fn declare() -> EntityDeclaration<Self> {
            EntityDeclaration::new()
                .table("PRODUCT")
                .field(
                    FieldDeclaration::new("id", |p: &Product| &p.id, |p| &mut p.id)
                        .column("ID")
                        .identifier(),
                )
                .field(FieldDeclaration::new("name", |p: &Product| &p.name, |p| &mut p.name).column("NAME"))
                .field(FieldDeclaration::new("price", |p: &Product| &p.price, |p| &mut p.price).column("PRICE"))
        }
    }

    /// Declares no identifier, so it never resolves.
    #[derive(Debug, Default)]
    struct Unkeyed {
        name: String,
    }

    impl Entity for Unkeyed {
        fn declare() -> EntityDeclaration<Self> {
            EntityDeclaration::new()
                .table("UNKEYED")
                .field(FieldDeclaration::new("name", |u: &Unkeyed| &u.name, |u| &mut u.name))
        }
    }

    #[derive(Debug, Default)]
    struct MockState {
        rows: HashMap<i64, Vec<Row>>,
        queries: Vec<(String, Vec<Value>)>,
        executed: Vec<(String, Vec<Value>)>,
        fail_updates_for: Vec<i64>,
        fail_acquire: bool,
        acquired: usize,
        released: usize,
    }

    // Numeric text matches an integer key, as with SQLite column affinity.
    fn last_id(params: &[Value]) -> Option<i64> {
        let id = params.last()?;
        id.as_i64()
            .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
    }

    #[derive(Debug, Clone)]
    struct MockConnection {
        state: Arc<Mutex<MockState>>,
    }

    impl Connection for MockConnection {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        fn query(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            let state = Arc::clone(&self.state);
            let sql = sql.to_string();
            let params = params.to_vec();
            async move {
                let mut guard = state.lock().expect("lock poisoned");
                let rows = last_id(&params)
                    .and_then(|id| guard.rows.get(&id).cloned())
                    .unwrap_or_default();
                guard.queries.push((sql, params));
                Outcome::Ok(rows)
            }
        }

        fn execute(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            let state = Arc::clone(&self.state);
            let sql = sql.to_string();
            let params = params.to_vec();
            async move {
                let mut guard = state.lock().expect("lock poisoned");
                let id = last_id(&params);
                guard.executed.push((sql.clone(), params));
                if id.is_some_and(|id| guard.fail_updates_for.contains(&id)) {
                    return Outcome::Err(Error::Query(QueryError {
                        kind: QueryErrorKind::Constraint,
                        sql: Some(sql),
                        message: "constraint failed".to_string(),
                        source: None,
                    }));
                }
                let matched = id.is_some_and(|id| guard.rows.contains_key(&id));
                Outcome::Ok(u64::from(matched))
            }
        }

        fn ping(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
            async { Outcome::Ok(()) }
        }
    }

    #[derive(Debug, Clone, Default)]
    struct MockSource {
        state: Arc<Mutex<MockState>>,
    }

    impl MockSource {
        fn with_products(products: &[(i64, &str, &str)]) -> Self {
            let source = Self::default();
            for (id, name, price) in products {
                source.add_row(*id, product_row(*id, name, price));
            }
            source
        }

        fn add_row(&self, id: i64, row: Row) {
            self.state
                .lock()
                .unwrap()
                .rows
                .entry(id)
                .or_default()
                .push(row);
        }

        fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
            self.state.lock().unwrap()
        }
    }

    impl DataSource for MockSource {
        type Conn = MockConnection;

        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        fn acquire(
            &self,
            _cx: &Cx,
        ) -> impl Future<Output = Outcome<ConnectionLease<MockConnection>, Error>> + Send {
            let state = Arc::clone(&self.state);
            async move {
                {
                    let mut guard = state.lock().expect("lock poisoned");
                    if guard.fail_acquire {
                        return Outcome::Err(Error::Connection(ConnectionError {
                            kind: ConnectionErrorKind::Acquire,
                            message: "no connection available".to_string(),
                            source: None,
                        }));
                    }
                    guard.acquired += 1;
                }
                let hook_state = Arc::clone(&state);
                Outcome::Ok(ConnectionLease::with_release(
                    MockConnection { state },
                    move |_| {
                        hook_state.lock().expect("lock poisoned").released += 1;
                    },
                ))
            }
        }
    }

    fn product_row(id: i64, name: &str, price: &str) -> Row {
        Row::new(
            vec!["ID".into(), "NAME".into(), "PRICE".into()],
            vec![
                Value::BigInt(id),
                Value::Text(name.to_string()),
                Value::Decimal(price.to_string()),
            ],
        )
    }

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        }
    }

    fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
        match outcome {
            Outcome::Err(e) => e,
            other => std::panic::panic_any(format!("expected error, got: {other:?}")),
        }
    }

    fn run<F: Future>(f: F) -> F::Output {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(f)
    }

    fn open(source: &MockSource) -> Session<MockSource> {
        Session::new(Arc::new(source.clone()))
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.flush_policy, FlushPolicy::AbortOnError);
        assert_eq!(config.dialect, None);
        assert!(config.warn_on_unclosed);
    }

    #[test]
    fn test_session_config_from_json() {
        let config = SessionConfig::from_json(
            r#"{"flush_policy": "continue_on_error", "dialect": "postgres"}"#,
        )
        .unwrap();
        assert_eq!(config.flush_policy, FlushPolicy::ContinueOnError);
        assert_eq!(config.dialect, Some(Dialect::Postgres));
        assert!(config.warn_on_unclosed);

        let err = SessionConfig::from_json(r#"{"flush_policy": "sometimes"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_find_returns_same_instance_with_one_select() {
        let source = MockSource::with_products(&[(1, "A", "9.99")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        run(async {
            let first = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
            let second = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
            assert!(Arc::ptr_eq(&first, &second));

            first.write().unwrap().name = "changed".to_string();
            assert_eq!(second.read().unwrap().name, "changed");
        });

        let state = source.state();
        assert_eq!(state.queries.len(), 1);
        assert_eq!(
            state.queries[0].0,
            "SELECT \"ID\", \"NAME\", \"PRICE\" FROM \"PRODUCT\" WHERE \"ID\" = ?1"
        );
        assert_eq!(state.queries[0].1, vec![Value::BigInt(1)]);
        assert_eq!(state.acquired, 1);
        assert_eq!(state.released, 1);
    }

    #[test]
    fn test_find_identifier_width_does_not_matter() {
        let source = MockSource::with_products(&[(1, "A", "9.99")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        run(async {
            let narrow = unwrap_outcome(session.find::<Product>(&cx, 1_i32).await);
            let wide = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
            assert!(Arc::ptr_eq(&narrow, &wide));
        });
        assert!(session.is_tracked::<Product>(1_i64));
        assert_eq!(source.state().queries.len(), 1);
    }

    #[test]
    fn test_find_text_identifier_shares_tracked_instance() {
        let source = MockSource::with_products(&[(1, "A", "9.99")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        let report = run(async {
            let by_number = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
            let by_text = unwrap_outcome(session.find::<Product>(&cx, "1").await);
            assert!(Arc::ptr_eq(&by_number, &by_text));
            assert_eq!(session.tracked_count(), 1);

            by_number.write().unwrap().name = "B".to_string();
            by_text.write().unwrap().price = Decimal::parse("1.25").unwrap();
            unwrap_outcome(session.close(&cx).await)
        });

        assert_eq!(report.updated, vec!["Product#1".to_string()]);
        let state = source.state();
        assert_eq!(state.executed.len(), 1);
        assert_eq!(
            state.executed[0].1,
            vec![
                Value::Text("B".to_string()),
                Value::Decimal("1.25".to_string()),
                Value::BigInt(1)
            ]
        );
    }

    #[test]
    fn test_row_loaded_by_text_identifier_is_keyed_by_its_own_id() {
        let source = MockSource::with_products(&[(1, "A", "9.99")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        run(async {
            let by_text = unwrap_outcome(session.find::<Product>(&cx, "1").await);
            let by_number = unwrap_outcome(session.find::<Product>(&cx, 1_i32).await);
            assert!(Arc::ptr_eq(&by_text, &by_number));
        });
        assert!(session.is_tracked::<Product>(1_i64));
        assert_eq!(session.debug_info().keys, vec!["Product#1".to_string()]);
        assert_eq!(source.state().queries.len(), 1);
    }

    #[test]
    fn test_find_reports_metadata_error_without_querying() {
        let source = MockSource::default();
        let mut session = open(&source);
        let cx = Cx::for_testing();

        let err = expect_err(run(session.find::<Unkeyed>(&cx, 1_i64)));
        match err {
            Error::Metadata(m) => {
                assert_eq!(m.kind, minorm_core::MetadataErrorKind::MissingIdentifier);
                assert_eq!(m.entity, "Unkeyed");
            }
            other => panic!("expected metadata error, got {other:?}"),
        }
        assert!(session.is_open());
        assert_eq!(source.state().acquired, 0);
    }

    #[test]
    fn test_find_maps_row_into_entity() {
        let source = MockSource::with_products(&[(7, "Widget", "10.50")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        let product = run(session.find::<Product>(&cx, 7_i64));
        let product = unwrap_outcome(product);
        let product = product.read().unwrap();
        assert_eq!(product.id, 7);
        assert_eq!(product.name, "Widget");
        assert_eq!(product.price, Decimal::parse("10.5").unwrap());
    }

    #[test]
    fn test_find_missing_row_is_not_found_and_not_cached() {
        let source = MockSource::default();
        let mut session = open(&source);
        let cx = Cx::for_testing();

        run(async {
            let err = expect_err(session.find::<Product>(&cx, 42_i64).await);
            assert!(err.is_not_found());
            assert!(err.to_string().contains("42"));

            let err = expect_err(session.find::<Product>(&cx, 42_i64).await);
            assert!(err.is_not_found());
        });

        assert_eq!(session.tracked_count(), 0);
        let state = source.state();
        assert_eq!(state.queries.len(), 2);
        assert_eq!(state.acquired, state.released);
    }

    #[test]
    fn test_find_acquire_failure_tracks_nothing() {
        let source = MockSource::with_products(&[(1, "A", "9.99")]);
        source.state().fail_acquire = true;
        let mut session = open(&source);
        let cx = Cx::for_testing();

        let err = expect_err(run(session.find::<Product>(&cx, 1_i64)));
        assert!(err.is_connection_error());
        assert_eq!(session.tracked_count(), 0);
    }

    #[test]
    fn test_find_mapping_failure_tracks_nothing() {
        let source = MockSource::default();
        source.add_row(
            1,
            Row::new(
                vec!["ID".into(), "NAME".into()],
                vec![Value::BigInt(1), Value::Text("A".into())],
            ),
        );
        let mut session = open(&source);
        let cx = Cx::for_testing();

        let err = expect_err(run(session.find::<Product>(&cx, 1_i64)));
        assert!(matches!(err, Error::Mapping(_)));
        assert_eq!(session.tracked_count(), 0);
        let state = source.state();
        assert_eq!(state.acquired, 1);
        assert_eq!(state.released, 1);
    }

    #[test]
    fn test_find_uses_first_of_duplicate_rows() {
        let source = MockSource::with_products(&[(1, "first", "1"), (1, "second", "2")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        let product = unwrap_outcome(run(session.find::<Product>(&cx, 1_i64)));
        assert_eq!(product.read().unwrap().name, "first");
    }

    #[test]
    fn test_close_without_changes_writes_nothing() {
        let source = MockSource::with_products(&[(1, "A", "9.99"), (2, "B", "1")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        let report = run(async {
            unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
            unwrap_outcome(session.find::<Product>(&cx, 2_i64).await);
            unwrap_outcome(session.close(&cx).await)
        });

        assert!(report.is_empty());
        assert!(source.state().executed.is_empty());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.tracked_count(), 0);
    }

    #[test]
    fn test_close_updates_only_changed_column() {
        let source = MockSource::with_products(&[(1, "A", "9.99")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        let report = run(async {
            let product = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
            product.write().unwrap().name = "B".to_string();
            unwrap_outcome(session.close(&cx).await)
        });

        assert_eq!(report.updated, vec!["Product#1".to_string()]);
        assert_eq!(report.rows_affected, 1);
        let state = source.state();
        assert_eq!(
            state.executed,
            vec![(
                "UPDATE \"PRODUCT\" SET \"NAME\" = ?1 WHERE \"ID\" = ?2".to_string(),
                vec![Value::Text("B".to_string()), Value::BigInt(1)]
            )]
        );
        assert_eq!(state.acquired, 2);
        assert_eq!(state.released, 2);
    }

    #[test]
    fn test_close_ignores_equal_reassignment() {
        let source = MockSource::with_products(&[(1, "A", "10.50")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        run(async {
            let product = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
            {
                let mut product = product.write().unwrap();
                product.name = ["A"].concat();
                product.price = Decimal::parse("10.5").unwrap();
            }
            let report = unwrap_outcome(session.close(&cx).await);
            assert!(report.is_empty());
        });

        assert!(source.state().executed.is_empty());
    }

    #[test]
    fn test_close_combines_changed_fields_into_one_update() {
        let source = MockSource::with_products(&[(1, "A", "9.99")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        run(async {
            let product = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
            {
                let mut product = product.write().unwrap();
                product.name = "B".to_string();
                product.price = Decimal::parse("12.00").unwrap();
            }
            unwrap_outcome(session.close(&cx).await);
        });

        let state = source.state();
        assert_eq!(state.executed.len(), 1);
        assert_eq!(
            state.executed[0].0,
            "UPDATE \"PRODUCT\" SET \"NAME\" = ?1, \"PRICE\" = ?2 WHERE \"ID\" = ?3"
        );
    }

    #[test]
    fn test_close_updates_dirty_entities_in_load_order() {
        let source = MockSource::with_products(&[(1, "A", "1"), (2, "B", "2"), (3, "C", "3")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        let report = run(async {
            let third = unwrap_outcome(session.find::<Product>(&cx, 3_i64).await);
            let first = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
            unwrap_outcome(session.find::<Product>(&cx, 2_i64).await);
            first.write().unwrap().name = "A2".to_string();
            third.write().unwrap().name = "C2".to_string();
            unwrap_outcome(session.close(&cx).await)
        });

        assert_eq!(
            report.updated,
            vec!["Product#3".to_string(), "Product#1".to_string()]
        );
        assert_eq!(source.state().executed.len(), 2);
    }

    #[test]
    fn test_operations_after_close_fail() {
        let source = MockSource::with_products(&[(1, "A", "9.99")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        run(async {
            unwrap_outcome(session.close(&cx).await);
            let err = expect_err(session.find::<Product>(&cx, 1_i64).await);
            assert!(matches!(err, Error::Session(SessionError::Closed)));
            let err = expect_err(session.close(&cx).await);
            assert!(matches!(err, Error::Session(SessionError::Closed)));
        });
        assert!(source.state().queries.is_empty());
    }

    #[test]
    fn test_close_aborts_on_first_failure_by_default() {
        let source = MockSource::with_products(&[(1, "A", "1"), (2, "B", "2"), (3, "C", "3")]);
        source.state().fail_updates_for.push(2);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        let err = run(async {
            for id in 1_i64..=3 {
                let product = unwrap_outcome(session.find::<Product>(&cx, id).await);
                product.write().unwrap().name.push('!');
            }
            expect_err(session.close(&cx).await)
        });

        let Error::Flush(flush) = err else {
            panic!("expected flush error, got {err:?}");
        };
        assert_eq!(flush.completed, 1);
        assert_eq!(flush.failures.len(), 1);
        assert_eq!(flush.failures[0].0, "Product#2");
        assert_eq!(flush.not_attempted, vec!["Product#3".to_string()]);

        assert!(!session.is_open());
        let state = source.state();
        assert_eq!(state.executed.len(), 2);
        assert_eq!(state.acquired, state.released);
    }

    #[test]
    fn test_close_can_continue_past_failures() {
        let source = MockSource::with_products(&[(1, "A", "1"), (2, "B", "2"), (3, "C", "3")]);
        source.state().fail_updates_for.push(2);
        let config = SessionConfig::new().flush_policy(FlushPolicy::ContinueOnError);
        let mut session = Session::with_config(Arc::new(source.clone()), config);
        let cx = Cx::for_testing();

        let err = run(async {
            for id in 1_i64..=3 {
                let product = unwrap_outcome(session.find::<Product>(&cx, id).await);
                product.write().unwrap().name.push('!');
            }
            expect_err(session.close(&cx).await)
        });

        let Error::Flush(flush) = err else {
            panic!("expected flush error, got {err:?}");
        };
        assert_eq!(flush.completed, 2);
        assert_eq!(flush.failures.len(), 1);
        assert!(flush.not_attempted.is_empty());
        assert_eq!(source.state().executed.len(), 3);
    }

    #[test]
    fn test_close_reports_acquire_failure() {
        let source = MockSource::with_products(&[(1, "A", "1"), (2, "B", "2")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        let err = run(async {
            for id in 1_i64..=2 {
                let product = unwrap_outcome(session.find::<Product>(&cx, id).await);
                product.write().unwrap().name.push('!');
            }
            source.state().fail_acquire = true;
            expect_err(session.close(&cx).await)
        });

        let Error::Flush(flush) = err else {
            panic!("expected flush error, got {err:?}");
        };
        assert_eq!(flush.failures.len(), 1);
        assert_eq!(flush.failures[0].0, "Product#1");
        assert!(flush.failures[0].1.is_connection_error());
        assert_eq!(flush.completed, 0);
        assert_eq!(flush.not_attempted, vec!["Product#2".to_string()]);

        assert!(!session.is_open());
        assert_eq!(session.tracked_count(), 0);
        let state = source.state();
        assert!(state.executed.is_empty());
        assert_eq!(state.acquired, state.released);
    }

    #[test]
    fn test_changed_identifier_fails_at_close() {
        let source = MockSource::with_products(&[(1, "A", "1")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        let err = run(async {
            let product = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
            product.write().unwrap().id = 99;
            expect_err(session.close(&cx).await)
        });

        assert!(matches!(err, Error::Flush(_)));
        assert!(source.state().executed.is_empty());
    }

    #[test]
    fn test_zero_row_update_is_reported() {
        let source = MockSource::with_products(&[(1, "A", "1")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        let report = run(async {
            let product = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
            source.state().rows.clear();
            product.write().unwrap().name = "B".to_string();
            unwrap_outcome(session.close(&cx).await)
        });

        assert_eq!(report.rows_affected, 0);
        assert_eq!(report.unmatched, vec!["Product#1".to_string()]);
    }

    #[test]
    fn test_dialect_override_changes_placeholders() {
        let source = MockSource::with_products(&[(1, "A", "1")]);
        let config = SessionConfig::new().dialect(Dialect::Postgres);
        let mut session = Session::with_config(Arc::new(source.clone()), config);
        let cx = Cx::for_testing();

        run(async {
            let product = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
            product.write().unwrap().name = "B".to_string();
            unwrap_outcome(session.close(&cx).await);
        });

        let state = source.state();
        assert!(state.queries[0].0.ends_with("WHERE \"ID\" = $1"));
        assert_eq!(
            state.executed[0].0,
            "UPDATE \"PRODUCT\" SET \"NAME\" = $1 WHERE \"ID\" = $2"
        );
    }

    #[test]
    fn test_factory_opens_independent_sessions() {
        let source = MockSource::with_products(&[(1, "A", "1")]);
        let factory = SessionFactory::new(source.clone());
        let cx = Cx::for_testing();

        let mut first = factory.open();
        let mut second = factory.open();
        run(async {
            let a = unwrap_outcome(first.find::<Product>(&cx, 1_i64).await);
            let b = unwrap_outcome(second.find::<Product>(&cx, 1_i64).await);
            assert!(!Arc::ptr_eq(&a, &b));
            unwrap_outcome(first.close(&cx).await);
            unwrap_outcome(second.close(&cx).await);
        });
        assert_eq!(source.state().queries.len(), 2);
    }

    #[test]
    fn test_session_debug_info() {
        let source = MockSource::with_products(&[(1, "A", "1"), (2, "B", "2")]);
        let mut session = open(&source);
        let cx = Cx::for_testing();

        run(async {
            unwrap_outcome(session.find::<Product>(&cx, 2_i64).await);
            unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
        });

        let info = session.debug_info();
        assert_eq!(info.state, SessionState::Open);
        assert_eq!(info.tracked, 2);
        assert_eq!(info.snapshots, 2);
        assert_eq!(info.keys, vec!["Product#2".to_string(), "Product#1".to_string()]);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["state"], "open");
    }
}
