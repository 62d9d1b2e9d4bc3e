//! Constraint-aware flush ordering and statement execution.
//!
//! `rowplan-engine` is the **write-planning layer**: it takes the dirty
//! entity states of one transaction, plans INSERT/UPDATE/DELETE statements
//! in an order that never violates foreign-key constraints within the
//! flush, and executes them through a [`Connection`].
//!
//! # Role In The Architecture
//!
//! - **Row coalescing**: field-level contributions for one entity merge
//!   into a single statement per `(table, action, entity)`.
//! - **Dependency resolution**: foreign-key edges between pending rows form
//!   insert and delete graphs; circular constraints are broken by deferring
//!   a nullable foreign key into a synthetic fix-up update.
//! - **Partial failure**: a statement failure attributable to one instance
//!   is collected into the flush report; the rest of the batch still runs.
//!
//! # Design Philosophy
//!
//! - **Explicit over implicit**: failures are values in a report, not
//!   suppressed exceptions; structural problems abort loudly.
//! - **Metadata is an input**: `Table` descriptors arrive read-only; the
//!   engine never inspects entity objects.
//! - **Cancel-correct**: all statement execution uses `Cx` + `Outcome` via
//!   `rowplan-core`.
//!
//! # Example
//!
//! ```ignore
//! let states = session.drain_dirty_states();
//! let config = FlushConfig::default().batching(true).batch_limit(50);
//! match rowplan_engine::flush(&cx, &conn, &states, &config).await {
//!     Outcome::Ok(report) if report.failures.is_empty() => { /* committed */ }
//!     Outcome::Ok(report) => retry_losers(report.failures),
//!     Outcome::Err(e) => abort(e),
//!     other => bail(other),
//! }
//! ```

pub mod constraint;
pub mod depth_first;
pub mod graph;
pub mod keys;
pub mod operation_order;
pub mod prepared;
pub mod row;
pub mod row_manager;
pub mod state;
mod update_manager;

#[cfg(test)]
pub(crate) mod testutil;

pub use constraint::ConstraintUpdateManager;
pub use depth_first::{DepthFirstAnalysis, EdgeKind};
pub use graph::{DepCause, Edge, Graph};
pub use keys::KeyRegistry;
pub use operation_order::OperationOrderUpdateManager;
pub use prepared::{
    BatchingPreparedStatementManager, PreparedStatementManagerImpl, StatementManager,
};
pub use row::{PendingRow, RowAction, Statement};
pub use row_manager::{RowId, RowManager};
pub use state::{BulkOp, CustomOp, DirtyState, EntityStatus, SecondaryOp};

use asupersync::{Cx, Outcome};
use rowplan_core::{Connection, Error};

/// Which flush strategy orders the primary rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushStrategy {
    /// Full foreign-key analysis with graph-based ordering and cycle
    /// resolution.
    #[default]
    Constraint,
    /// Object-dirtying order with local foreign-key fix-ups; cheaper, and
    /// sufficient when the caller controls the dirtying order.
    OperationOrder,
}

/// Flush configuration.
#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// The ordering strategy.
    pub strategy: FlushStrategy,
    /// Whether consecutive identical-SQL statements coalesce into driver
    /// batches.
    pub batching: bool,
    /// Maximum number of statements per batch.
    pub batch_limit: usize,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            strategy: FlushStrategy::default(),
            batching: false,
            batch_limit: 100,
        }
    }
}

impl FlushConfig {
    /// Set the ordering strategy.
    pub fn strategy(mut self, strategy: FlushStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Enable or disable statement batching.
    pub fn batching(mut self, batching: bool) -> Self {
        self.batching = batching;
        self
    }

    /// Set the batch-size limit.
    pub fn batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Build the statement manager this configuration asks for.
    pub(crate) fn statement_manager<'a, C: Connection>(
        &self,
        cx: &'a Cx,
        conn: &'a C,
        keys: KeyRegistry,
    ) -> StatementManager<'a, C> {
        if self.batching {
            StatementManager::Batching(BatchingPreparedStatementManager::new(
                cx,
                conn,
                keys,
                self.batch_limit,
            ))
        } else {
            StatementManager::Plain(PreparedStatementManagerImpl::new(cx, conn, keys))
        }
    }
}

/// Outcome of one flush attempt.
///
/// A non-empty `failures` list is the partial-failure contract: every entry
/// names one instance whose statement failed while the rest of the batch
/// was still attempted.
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Per-row failures, in execution order.
    pub failures: Vec<Error>,
    /// Rows inserted.
    pub inserted: usize,
    /// Rows updated (including fix-up updates).
    pub updated: usize,
    /// Rows deleted.
    pub deleted: usize,
}

impl FlushReport {
    /// Total number of statements that succeeded.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Flush a batch of dirty entity states through one connection.
///
/// Returns the report of a completed attempt (possibly with per-row
/// failures) or, on the error arm, a structural failure that aborted the
/// flush: an unbreakable constraint cycle, an unattributable write failure,
/// a configuration error, or connection loss.
#[tracing::instrument(level = "info", skip_all, fields(states = states.len(), strategy = ?config.strategy))]
pub async fn flush<C: Connection>(
    cx: &Cx,
    conn: &C,
    states: &[DirtyState],
    config: &FlushConfig,
) -> Outcome<FlushReport, Error> {
    match config.strategy {
        FlushStrategy::Constraint => {
            ConstraintUpdateManager::new()
                .flush(cx, conn, states, config)
                .await
        }
        FlushStrategy::OperationOrder => {
            OperationOrderUpdateManager::new()
                .flush(cx, conn, states, config)
                .await
        }
    }
}
