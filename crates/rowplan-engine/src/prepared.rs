//! Statement execution with per-row failure collection.
//!
//! The statement managers own the boundary between planned rows and the
//! connection. Their contract: executing one row never aborts the flush for
//! a failure that can be pinned on that row — such failures are collected
//! and reported together, so the caller sees every losing instance of one
//! flush attempt instead of just the first. Only unattributable write
//! failures, connection loss, and engine bugs abort.
//!
//! The batching manager additionally coalesces consecutive rows that render
//! to identical SQL into one driver round trip, re-attributing failures
//! through the per-statement result array.

use crate::keys::KeyRegistry;
use crate::row::{PendingRow, RowAction, Statement};
use crate::FlushReport;
use asupersync::{Cx, Outcome};
use rowplan_core::{BatchStatus, Connection, Dialect, Error, ObjectKey, Value};

/// Shared execution state: connection access, resolved keys, collected
/// failures, and row counters.
struct Executor<'a, C: Connection> {
    cx: &'a Cx,
    conn: &'a C,
    dialect: Dialect,
    keys: KeyRegistry,
    failures: Vec<Error>,
    inserted: usize,
    updated: usize,
    deleted: usize,
}

impl<'a, C: Connection> Executor<'a, C> {
    fn new(cx: &'a Cx, conn: &'a C, keys: KeyRegistry) -> Self {
        Self {
            cx,
            conn,
            dialect: conn.dialect(),
            keys,
            failures: Vec::new(),
            inserted: 0,
            updated: 0,
            deleted: 0,
        }
    }

    fn count(&mut self, action: RowAction) {
        match action {
            RowAction::Insert => self.inserted += 1,
            RowAction::Update => self.updated += 1,
            RowAction::Delete => self.deleted += 1,
        }
    }

    fn finish(self) -> FlushReport {
        FlushReport {
            failures: self.failures,
            inserted: self.inserted,
            updated: self.updated,
            deleted: self.deleted,
        }
    }

    /// Execute one rendered statement, mapping the affected-row count.
    async fn execute_one(
        &mut self,
        st: Statement,
        action: RowAction,
        entity: Option<ObjectKey>,
    ) -> Outcome<(), Error> {
        tracing::trace!(sql = %st.sql, "executing statement");
        match self.conn.execute(self.cx, &st.sql, &st.params).await {
            Outcome::Ok(0) => self.zero_rows(st, action, entity),
            Outcome::Ok(_) => {
                self.count(action);
                Outcome::Ok(())
            }
            Outcome::Err(e) => self.sql_failure(e, &st.sql, entity),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Zero rows affected: an attributable UPDATE/DELETE is an optimistic
    /// loss; an INSERT cannot be attributed and is fatal; anything else
    /// (all-row operations) legitimately matched nothing.
    fn zero_rows(
        &mut self,
        st: Statement,
        action: RowAction,
        entity: Option<ObjectKey>,
    ) -> Outcome<(), Error> {
        match (action, entity) {
            (RowAction::Insert, _) => Outcome::Err(Error::unattributable(
                st.sql,
                "insert affected zero rows",
            )),
            (_, Some(entity)) => {
                tracing::debug!(?entity, "statement affected zero rows; collecting");
                self.failures
                    .push(Error::optimistic(entity, st.sql, "statement affected zero rows"));
                Outcome::Ok(())
            }
            (_, None) => Outcome::Ok(()),
        }
    }

    /// A statement-level SQL failure. Connection loss aborts the flush;
    /// everything else is pinned on the row and collected.
    fn sql_failure(
        &mut self,
        error: Error,
        sql: &str,
        entity: Option<ObjectKey>,
    ) -> Outcome<(), Error> {
        if matches!(error, Error::Connection(_)) {
            return Outcome::Err(error);
        }
        tracing::debug!(error = %error, "statement failed; collecting");
        match entity {
            Some(entity) => self
                .failures
                .push(Error::optimistic(entity, sql, error.to_string())),
            None => self.failures.push(error),
        }
        Outcome::Ok(())
    }

    /// Execute an INSERT that must read back a database-generated key.
    async fn execute_generated(&mut self, row: &PendingRow) -> Outcome<(), Error> {
        let st = match row.to_statement(&self.keys, self.dialect) {
            Ok(st) => st,
            Err(e) => return Outcome::Err(e),
        };
        tracing::trace!(sql = %st.sql, "executing insert with generated key");
        match self.conn.insert(self.cx, &st.sql, &st.params).await {
            Outcome::Ok(id) => {
                if let Some(key) = row.primary_key() {
                    self.keys.record(key, vec![Value::BigInt(id)]);
                }
                self.count(RowAction::Insert);
                Outcome::Ok(())
            }
            Outcome::Err(e) => self.sql_failure(e, &st.sql, row.failed_entity()),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Execute a custom statement supplied by a mapping strategy.
    async fn execute_detached(&mut self, st: &Statement) -> Outcome<(), Error> {
        tracing::trace!(sql = %st.sql, "executing custom statement");
        match self.conn.execute(self.cx, &st.sql, &st.params).await {
            Outcome::Ok(_) => Outcome::Ok(()),
            Outcome::Err(e) => self.sql_failure(e, &st.sql, None),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Execute a same-SQL batch, attributing per-statement results.
    async fn run_batch(&mut self, sql: String, entries: Vec<BatchEntry>) -> Outcome<(), Error> {
        let param_sets: Vec<Vec<Value>> = entries.iter().map(|e| e.params.clone()).collect();
        tracing::debug!(sql = %sql, size = entries.len(), "executing batch");
        let statuses = match self.conn.execute_batch(self.cx, &sql, &param_sets).await {
            Outcome::Ok(statuses) => statuses,
            Outcome::Err(Error::Connection(e)) => return Outcome::Err(Error::Connection(e)),
            Outcome::Err(e) => {
                // No per-statement results at all: nothing to pin the
                // failure on.
                return Outcome::Err(Error::unattributable(sql, e.to_string()));
            }
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if statuses.len() != entries.len() {
            return Outcome::Err(Error::unattributable(
                sql,
                format!(
                    "driver returned {} results for {} batched statements",
                    statuses.len(),
                    entries.len()
                ),
            ));
        }
        for (status, entry) in statuses.into_iter().zip(entries) {
            match status {
                BatchStatus::Rows(0) => match (entry.action, entry.entity) {
                    (RowAction::Insert, _) => {
                        return Outcome::Err(Error::unattributable(
                            sql.clone(),
                            "batched insert affected zero rows",
                        ));
                    }
                    (_, Some(entity)) => self.failures.push(Error::optimistic(
                        entity,
                        sql.clone(),
                        "batched statement affected zero rows",
                    )),
                    (_, None) => {}
                },
                BatchStatus::Rows(_) | BatchStatus::NoInfo => self.count(entry.action),
                BatchStatus::Failed => match entry.entity {
                    Some(entity) => self.failures.push(Error::optimistic(
                        entity,
                        sql.clone(),
                        "batched statement failed",
                    )),
                    None => {
                        return Outcome::Err(Error::unattributable(
                            sql.clone(),
                            "batched statement failed with no attributable entity",
                        ));
                    }
                },
            }
        }
        Outcome::Ok(())
    }
}

/// One buffered statement awaiting batch execution.
struct BatchEntry {
    params: Vec<Value>,
    action: RowAction,
    entity: Option<ObjectKey>,
}

/// Executes each row immediately, collecting attributable failures.
pub struct PreparedStatementManagerImpl<'a, C: Connection> {
    exec: Executor<'a, C>,
}

impl<'a, C: Connection> PreparedStatementManagerImpl<'a, C> {
    /// Create a manager over one connection and the flush's key registry.
    pub fn new(cx: &'a Cx, conn: &'a C, keys: KeyRegistry) -> Self {
        Self {
            exec: Executor::new(cx, conn, keys),
        }
    }

    /// Execute one row. Per-row failures are collected; the returned error
    /// arm carries only flush-fatal conditions.
    pub async fn flush_row(&mut self, row: &PendingRow) -> Outcome<(), Error> {
        if !row.has_work() {
            tracing::trace!(table = %row.table().name, "skipping empty statement");
            return Outcome::Ok(());
        }
        if row.wants_generated_key(&self.exec.keys) {
            return self.exec.execute_generated(row).await;
        }
        let st = match row.to_statement(&self.exec.keys, self.exec.dialect) {
            Ok(st) => st,
            Err(e) => return Outcome::Err(e),
        };
        self.exec
            .execute_one(st, row.action(), row.failed_entity())
            .await
    }

    /// No-op; the plain manager never buffers.
    pub async fn flush_buffered(&mut self) -> Outcome<(), Error> {
        Outcome::Ok(())
    }

    /// Execute a custom statement, collecting its failure if any.
    pub async fn flush_custom(&mut self, st: &Statement) -> Outcome<(), Error> {
        self.exec.execute_detached(st).await
    }

    /// Consume the manager, yielding collected failures and counters.
    pub fn finish(self) -> FlushReport {
        self.exec.finish()
    }
}

/// Coalesces consecutive identical-SQL rows into driver batches.
///
/// The buffer flushes when the SQL text changes, when it reaches the
/// configured limit, and at end of flush. Inserts that must read back a
/// generated key bypass the batch (the result array carries no keys) after
/// draining the buffer, so statement order is preserved.
pub struct BatchingPreparedStatementManager<'a, C: Connection> {
    exec: Executor<'a, C>,
    buffer_sql: Option<String>,
    buffer: Vec<BatchEntry>,
    limit: usize,
}

impl<'a, C: Connection> BatchingPreparedStatementManager<'a, C> {
    /// Create a batching manager with the given batch-size limit.
    pub fn new(cx: &'a Cx, conn: &'a C, keys: KeyRegistry, limit: usize) -> Self {
        Self {
            exec: Executor::new(cx, conn, keys),
            buffer_sql: None,
            buffer: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Enqueue (or directly execute) one row.
    pub async fn flush_row(&mut self, row: &PendingRow) -> Outcome<(), Error> {
        if !row.has_work() {
            return Outcome::Ok(());
        }
        if row.wants_generated_key(&self.exec.keys) {
            match self.flush_buffered().await {
                Outcome::Ok(()) => {}
                other => return other,
            }
            return self.exec.execute_generated(row).await;
        }
        let st = match row.to_statement(&self.exec.keys, self.exec.dialect) {
            Ok(st) => st,
            Err(e) => return Outcome::Err(e),
        };
        if self.buffer_sql.as_deref() != Some(st.sql.as_str()) {
            match self.flush_buffered().await {
                Outcome::Ok(()) => {}
                other => return other,
            }
            self.buffer_sql = Some(st.sql.clone());
        }
        self.buffer.push(BatchEntry {
            params: st.params,
            // Batch results can only be attributed through the entry, so
            // fall back to the row's identity when no failed object is set.
            entity: row.failed_entity().or(row.primary_key()),
            action: row.action(),
        });
        if self.buffer.len() >= self.limit {
            return self.flush_buffered().await;
        }
        Outcome::Ok(())
    }

    /// Drain the buffer. A single buffered statement executes directly; two
    /// or more go through the driver's batch path.
    pub async fn flush_buffered(&mut self) -> Outcome<(), Error> {
        let Some(sql) = self.buffer_sql.take() else {
            return Outcome::Ok(());
        };
        let mut entries = std::mem::take(&mut self.buffer);
        match entries.len() {
            0 => Outcome::Ok(()),
            1 => {
                let entry = entries.remove(0);
                self.exec
                    .execute_one(Statement::new(sql, entry.params), entry.action, entry.entity)
                    .await
            }
            _ => self.exec.run_batch(sql, entries).await,
        }
    }

    /// Execute a custom statement, draining the buffer first to preserve
    /// statement order.
    pub async fn flush_custom(&mut self, st: &Statement) -> Outcome<(), Error> {
        match self.flush_buffered().await {
            Outcome::Ok(()) => {}
            other => return other,
        }
        self.exec.execute_detached(st).await
    }

    /// Consume the manager, yielding collected failures and counters.
    /// Callers must drain the buffer first.
    pub fn finish(self) -> FlushReport {
        self.exec.finish()
    }
}

/// The statement manager chosen by flush configuration.
pub enum StatementManager<'a, C: Connection> {
    /// Immediate per-row execution.
    Plain(PreparedStatementManagerImpl<'a, C>),
    /// Same-SQL batch coalescing.
    Batching(BatchingPreparedStatementManager<'a, C>),
}

impl<'a, C: Connection> StatementManager<'a, C> {
    /// Execute or enqueue one row.
    pub async fn flush_row(&mut self, row: &PendingRow) -> Outcome<(), Error> {
        match self {
            StatementManager::Plain(mgr) => mgr.flush_row(row).await,
            StatementManager::Batching(mgr) => mgr.flush_row(row).await,
        }
    }

    /// Drain any buffered statements.
    pub async fn flush_buffered(&mut self) -> Outcome<(), Error> {
        match self {
            StatementManager::Plain(mgr) => mgr.flush_buffered().await,
            StatementManager::Batching(mgr) => mgr.flush_buffered().await,
        }
    }

    /// Execute a custom statement.
    pub async fn flush_custom(&mut self, st: &Statement) -> Outcome<(), Error> {
        match self {
            StatementManager::Plain(mgr) => mgr.flush_custom(st).await,
            StatementManager::Batching(mgr) => mgr.flush_custom(st).await,
        }
    }

    /// Consume the manager, yielding collected failures and counters.
    pub fn finish(self) -> FlushReport {
        match self {
            StatementManager::Plain(mgr) => mgr.finish(),
            StatementManager::Batching(mgr) => mgr.finish(),
        }
    }
}
