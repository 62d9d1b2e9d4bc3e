//! Error types for rowplan operations.

use crate::key::ObjectKey;
use std::fmt;

/// The primary error type for all rowplan operations.
///
/// The flush engine distinguishes *collected* errors (per-row failures that
/// never abort a flush; they accumulate into the flush report) from *fatal*
/// errors (structural problems that abort the whole flush). The distinction
/// is made by the caller, not the variant, except where noted.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect, timeout)
    Connection(ConnectionError),
    /// Statement execution errors
    Query(QueryError),
    /// An expected UPDATE/DELETE affected zero rows and the losing entity
    /// instance is known. Collected, never fatal.
    Optimistic(OptimisticError),
    /// A write failure that cannot be attributed to a specific entity:
    /// an INSERT affecting zero rows, or a batch failure with no usable
    /// per-statement result. Fatal for the flush.
    Unattributable(WriteError),
    /// A foreign-key dependency cycle in which no participating constraint
    /// is nullable. A mapping-configuration error; fatal, not retryable.
    UnbreakableCycle(CycleError),
    /// Configuration errors
    Config(ConfigError),
    /// Invariant violations inside the engine (e.g. a dependency graph that
    /// is still cyclic after resolution). Always fatal.
    Internal(String),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// Connection refused
    Refused,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub sqlstate: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Deadlock detected
    Deadlock,
    /// Statement timeout
    Timeout,
    /// Other database error
    Database,
}

/// An attributable zero-rows-affected failure.
///
/// The row's WHERE conditions (primary key, possibly version or foreign-key
/// columns) matched nothing, meaning another transaction changed or removed
/// the row. The entity that lost the race is recorded so the caller can
/// retry or evict just that instance.
#[derive(Debug)]
pub struct OptimisticError {
    /// The entity instance whose statement affected zero rows.
    pub entity: ObjectKey,
    /// The statement text, for diagnostics.
    pub sql: String,
    pub message: String,
}

/// An unattributable write failure.
#[derive(Debug)]
pub struct WriteError {
    pub sql: String,
    pub message: String,
}

/// A dependency cycle with no nullable constraint to break.
#[derive(Debug)]
pub struct CycleError {
    /// Tables participating in the cycle, in discovery order.
    pub tables: Vec<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl Error {
    /// Build a query error with the given kind, SQL, and message.
    pub fn query(kind: QueryErrorKind, sql: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            sql: Some(sql.into()),
            message: message.into(),
            sqlstate: None,
        })
    }

    /// Build an optimistic-concurrency failure for the given entity.
    pub fn optimistic(entity: ObjectKey, sql: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Optimistic(OptimisticError {
            entity,
            sql: sql.into(),
            message: message.into(),
        })
    }

    /// Build an unattributable write failure.
    pub fn unattributable(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Unattributable(WriteError {
            sql: sql.into(),
            message: message.into(),
        })
    }

    /// Build a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
        })
    }

    /// Whether this error may be collected into a flush report rather than
    /// aborting the flush.
    pub fn is_collectable(&self) -> bool {
        matches!(self, Error::Optimistic(_) | Error::Query(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "connection error ({:?}): {}", e.kind, e.message),
            Error::Query(e) => match &e.sql {
                Some(sql) => write!(f, "query error ({:?}): {} [{}]", e.kind, e.message, sql),
                None => write!(f, "query error ({:?}): {}", e.kind, e.message),
            },
            Error::Optimistic(e) => write!(
                f,
                "optimistic concurrency failure for {:?}: {} [{}]",
                e.entity, e.message, e.sql
            ),
            Error::Unattributable(e) => {
                write!(f, "unattributable write failure: {} [{}]", e.message, e.sql)
            }
            Error::UnbreakableCycle(e) => write!(
                f,
                "foreign-key cycle with no nullable constraint: {}",
                e.tables.join(" -> ")
            ),
            Error::Config(e) => write!(f, "configuration error: {}", e.message),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|s| s as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_display_optimistic() {
        let entity = ObjectKey::from_pk("teams", &[Value::BigInt(1)]);
        let err = Error::optimistic(entity, "UPDATE \"teams\" ...", "0 rows affected");
        let text = err.to_string();
        assert!(text.contains("optimistic concurrency failure"));
        assert!(text.contains("0 rows affected"));
    }

    #[test]
    fn test_display_unbreakable_cycle() {
        let err = Error::UnbreakableCycle(CycleError {
            tables: vec!["a".into(), "b".into(), "a".into()],
        });
        assert_eq!(
            err.to_string(),
            "foreign-key cycle with no nullable constraint: a -> b -> a"
        );
    }

    #[test]
    fn test_collectable_classification() {
        let entity = ObjectKey::from_pk("t", &[Value::BigInt(1)]);
        assert!(Error::optimistic(entity, "sql", "msg").is_collectable());
        assert!(Error::query(QueryErrorKind::Constraint, "sql", "msg").is_collectable());
        assert!(!Error::unattributable("sql", "msg").is_collectable());
        assert!(!Error::Internal("bug".into()).is_collectable());
        assert!(!Error::Cancelled.is_collectable());
    }
}
