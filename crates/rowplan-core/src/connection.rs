//! Database connection traits.
//!
//! [`Connection`] is the consumed data-source seam: the flush engine hands
//! it finished SQL text plus bound parameters and interprets the affected
//! row counts it returns. The read/query side of a data source is a
//! separate concern and deliberately absent here.
//!
//! All operations integrate with asupersync's structured concurrency via
//! `Cx` for proper cancellation: a long-running statement cancelled from
//! another task surfaces as `Outcome::Cancelled` and the flush aborts
//! without attempting to roll back already-flushed rows.

use crate::error::{Error, Result};
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::future::Future;

/// SQL placeholder dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
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
}

/// Per-statement result of a batch execution.
///
/// Mirrors the JDBC update-count array: a driver may report a real affected
/// row count, success without a count, or a per-statement failure. Raw
/// driver codes map via [`BatchStatus::from_code`] (`-2` = success with no
/// info, `-3` = execute failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// The statement executed and affected this many rows.
    Rows(u64),
    /// The statement executed but the driver does not report a count.
    NoInfo,
    /// The statement failed.
    Failed,
}

impl BatchStatus {
    /// Convert a raw driver update count into a status.
    pub fn from_code(code: i64) -> Self {
        match code {
            -2 => BatchStatus::NoInfo,
            c if c < 0 => BatchStatus::Failed,
            c => BatchStatus::Rows(c as u64),
        }
    }

    /// Whether this statement failed outright.
    pub fn is_failure(self) -> bool {
        matches!(self, BatchStatus::Failed)
    }
}

/// A database connection capable of executing write statements.
///
/// One connection serves an entire flush: it is checked out before the
/// first statement and closed (or returned to its pool) after the last.
/// All operations are async and take a `Cx` context for cancellation
/// support. Implementations must be `Send + Sync`.
///
/// # Example
///
/// ```rust,ignore
/// let affected = conn
///     .execute(&cx, "UPDATE \"teams\" SET \"name\" = $1 WHERE \"id\" = $2",
///              &[Value::Text("Avengers".into()), Value::BigInt(1)])
///     .await?;
/// ```
pub trait Connection: Send + Sync {
    /// The placeholder dialect this connection speaks.
    fn dialect(&self) -> Dialect;

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Execute an INSERT and return the database-generated key.
    ///
    /// Used for tables whose primary key is assigned by the database; the
    /// engine records the returned key so statements planned against the
    /// new row can resolve it.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;

    /// Execute one statement repeatedly with multiple parameter sets.
    ///
    /// Returns one [`BatchStatus`] per parameter set, in order. A driver
    /// that aborts the whole batch on the first failure should still report
    /// per-statement statuses for the statements it attempted; returning
    /// `Outcome::Err` instead denies the caller any failure attribution.
    fn execute_batch(
        &self,
        cx: &Cx,
        sql: &str,
        param_sets: &[Vec<Value>],
    ) -> impl Future<Output = Outcome<Vec<BatchStatus>, Error>> + Send;

    /// Check if the connection is still valid by sending a ping.
    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Close the connection gracefully.
    fn close(self, cx: &Cx) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_styles() {
        assert_eq!(Dialect::Postgres.placeholder(1), "$1");
        assert_eq!(Dialect::Sqlite.placeholder(3), "?3");
        assert_eq!(Dialect::Mysql.placeholder(7), "?");
    }

    #[test]
    fn test_batch_status_from_code() {
        assert_eq!(BatchStatus::from_code(0), BatchStatus::Rows(0));
        assert_eq!(BatchStatus::from_code(4), BatchStatus::Rows(4));
        assert_eq!(BatchStatus::from_code(-2), BatchStatus::NoInfo);
        assert_eq!(BatchStatus::from_code(-3), BatchStatus::Failed);
        assert_eq!(BatchStatus::from_code(-1), BatchStatus::Failed);
    }

    #[test]
    fn test_batch_status_failure_check() {
        assert!(BatchStatus::Failed.is_failure());
        assert!(!BatchStatus::NoInfo.is_failure());
        assert!(!BatchStatus::Rows(0).is_failure());
    }
}
