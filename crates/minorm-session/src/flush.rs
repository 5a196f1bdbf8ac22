//! Flushing dirty entities when a session closes.
//!
//! Closing computes one [`PendingUpdate`] per dirty entity, in load order,
//! and executes each on its own leased connection. Clean entities produce
//! no statement at all.

use crate::dirty::ChangeSet;
use crate::identity_map::{EntityKey, IdentityMap};
use crate::snapshot::{Snapshot, SnapshotStore};
use asupersync::{Cx, Outcome};
use minorm_core::{Connection, DataSource, Dialect, Error, FlushError, TableInfo, Value};
use minorm_query::UpdateById;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// What `close` does when an update fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Stop at the first failure. Earlier updates stay committed; later
    /// ones are reported as not attempted.
    #[default]
    AbortOnError,
    /// Attempt every update and report all failures together.
    ContinueOnError,
}

/// One UPDATE of one dirty entity.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub key: EntityKey,
    pub table: &'static str,
    /// Changed columns, in declaration order.
    pub columns: Vec<&'static str>,
    pub sql: String,
    pub params: Vec<Value>,
}

impl PendingUpdate {
    /// Build the UPDATE for `changes`.
    ///
    /// The WHERE clause binds the identifier the entity was loaded with.
    pub fn new(
        key: EntityKey,
        table: &TableInfo,
        changes: &ChangeSet,
        dialect: Dialect,
    ) -> minorm_core::Result<Self> {
        let builder = changes
            .iter()
            .fold(UpdateById::new(table, key.id().clone()), |b, (column, value)| {
                b.set(column, value.clone())
            });
        let (sql, params) = builder.build_with_dialect(dialect)?;
        Ok(Self {
            key,
            table: table.table_name,
            columns: changes.columns().collect(),
            sql,
            params,
        })
    }
}

/// Ordered updates for one close, plus the entities whose statement
/// could not be built.
#[derive(Debug, Default)]
pub struct FlushPlan {
    steps: Vec<std::result::Result<PendingUpdate, (EntityKey, Error)>>,
}

impl FlushPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff every tracked entity against its snapshot, in load order.
    pub(crate) fn collect(map: &IdentityMap, snapshots: &SnapshotStore, dialect: Dialect) -> Self {
        let empty = Snapshot::default();
        let mut plan = Self::new();
        for (key, tracked) in map.iter() {
            let snapshot = snapshots.get(key).unwrap_or_else(|| {
                tracing::warn!(key = %key, "Tracked entity has no snapshot; treating every field as changed");
                &empty
            });
            let changes = tracked.diff(snapshot);
            if changes.is_empty() {
                continue;
            }
            tracing::debug!(
                key = %key,
                columns = ?changes.columns().collect::<Vec<_>>(),
                "Entity is dirty"
            );
            plan.push(
                match PendingUpdate::new(key.clone(), tracked.table(), &changes, dialect) {
                    Ok(update) => Ok(update),
                    Err(e) => Err((key.clone(), e)),
                },
            );
        }
        plan
    }

    pub fn push(&mut self, step: std::result::Result<PendingUpdate, (EntityKey, Error)>) {
        self.steps.push(step);
    }

    /// Updates that will be executed.
    pub fn updates(&self) -> impl Iterator<Item = &PendingUpdate> {
        self.steps.iter().filter_map(|step| step.as_ref().ok())
    }

    /// Number of entities whose UPDATE could not be built.
    pub fn rejected(&self) -> usize {
        self.steps.iter().filter(|step| step.is_err()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Execute every update, one lease per statement.
    ///
    /// Cancellation and panics stop the flush immediately and are
    /// propagated unchanged.
    #[tracing::instrument(level = "info", skip(self, cx, source))]
    pub async fn execute<D: DataSource>(
        self,
        cx: &Cx,
        source: &D,
        policy: FlushPolicy,
    ) -> Outcome<FlushReport, Error> {
        tracing::info!(
            updates = self.updates().count(),
            rejected = self.rejected(),
            "Executing flush plan"
        );
        let start = Instant::now();

        let mut report = FlushReport::default();
        let mut failures: Vec<(String, Error)> = Vec::new();
        let mut steps = self.steps.into_iter();

        for step in steps.by_ref() {
            let result = match step {
                Ok(update) => match execute_update(cx, source, &update).await {
                    Outcome::Ok(rows) => Ok((update.key, rows)),
                    Outcome::Err(e) => Err((update.key, e)),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                },
                Err(rejected) => Err(rejected),
            };

            match result {
                Ok((key, rows)) => report.record(&key, rows),
                Err((key, e)) => {
                    tracing::error!(
                        key = %key,
                        error = %e,
                        sql = e.sql().unwrap_or_default(),
                        "UPDATE failed"
                    );
                    failures.push((key.to_string(), e));
                    if policy == FlushPolicy::AbortOnError {
                        break;
                    }
                }
            }
        }

        let not_attempted: Vec<String> = steps
            .map(|step| match step {
                Ok(update) => update.key.to_string(),
                Err((key, _)) => key.to_string(),
            })
            .collect();

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            updated = report.updated.len(),
            failed = failures.len(),
            not_attempted = not_attempted.len(),
            "Flush complete"
        );

        if failures.is_empty() {
            Outcome::Ok(report)
        } else {
            Outcome::Err(Error::Flush(FlushError {
                failures,
                completed: report.updated.len(),
                not_attempted,
            }))
        }
    }
}

/// Execute a single update on a freshly acquired connection.
#[tracing::instrument(level = "debug", skip(cx, source, update), fields(key = %update.key))]
async fn execute_update<D: DataSource>(
    cx: &Cx,
    source: &D,
    update: &PendingUpdate,
) -> Outcome<u64, Error> {
    tracing::debug!(
        table = update.table,
        columns = ?update.columns,
        sql = %update.sql,
        "Executing update"
    );

    let lease = match source.acquire(cx).await {
        Outcome::Ok(lease) => lease,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };
    let outcome = lease.execute(cx, &update.sql, &update.params).await;
    lease.release();
    outcome
}

/// Summary of a successful close.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Keys of the entities that were updated, in execution order.
    pub updated: Vec<String>,
    /// Sum of rows affected over all updates.
    pub rows_affected: u64,
    /// Keys whose UPDATE matched no row.
    pub unmatched: Vec<String>,
}

impl FlushReport {
    fn record(&mut self, key: &EntityKey, rows: u64) {
        if rows == 0 {
            tracing::warn!(key = %key, "UPDATE matched no row; it may have been deleted");
            self.unmatched.push(key.to_string());
        }
        self.updated.push(key.to_string());
        self.rows_affected += rows;
    }

    /// Number of UPDATE statements executed.
    pub fn statements(&self) -> usize {
        self.updated.len()
    }

    /// True if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty()
    }
}
