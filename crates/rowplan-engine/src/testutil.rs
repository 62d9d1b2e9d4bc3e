//! Test doubles shared by the engine test modules.

use asupersync::{Cx, Outcome};
use rowplan_core::{BatchStatus, Connection, Dialect, Error, QueryErrorKind, Value};
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Unwrap an `Outcome`, panicking on any non-`Ok` arm.
pub fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
    }
}

/// Recorded connection activity plus scripted behavior.
#[derive(Debug, Default)]
pub struct MockState {
    /// Every directly executed statement, in order.
    pub executed: Vec<(String, Vec<Value>)>,
    /// Every batch execution: SQL text and parameter-set count.
    pub batches: Vec<(String, usize)>,
    /// Statements matching this marker (in SQL text or a text parameter)
    /// fail with a query error.
    pub fail_marker: Option<String>,
    /// Statements matching this marker report zero rows affected.
    pub zero_rows_marker: Option<String>,
    /// Scripted per-statement batch results; defaults to all `NoInfo`.
    pub batch_statuses: Option<Vec<BatchStatus>>,
    /// Next generated key handed out by `insert`.
    pub next_insert_id: i64,
}

impl MockState {
    fn matches(marker: Option<&String>, sql: &str, params: &[Value]) -> bool {
        let Some(marker) = marker else { return false };
        sql.contains(marker.as_str())
            || params.iter().any(|v| match v {
                Value::Text(s) => s.contains(marker.as_str()),
                _ => false,
            })
    }
}

/// A scripted in-memory connection recording every statement it sees.
#[derive(Debug, Clone)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new(state: Arc<Mutex<MockState>>) -> Self {
        Self { state }
    }
}

impl Connection for MockConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
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
            if MockState::matches(guard.fail_marker.as_ref(), &sql, &params) {
                return Outcome::Err(Error::query(
                    QueryErrorKind::Database,
                    sql,
                    "scripted failure",
                ));
            }
            let zero = MockState::matches(guard.zero_rows_marker.as_ref(), &sql, &params);
            guard.executed.push((sql, params));
            Outcome::Ok(u64::from(!zero))
        }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            if MockState::matches(guard.fail_marker.as_ref(), &sql, &params) {
                return Outcome::Err(Error::query(
                    QueryErrorKind::Database,
                    sql,
                    "scripted failure",
                ));
            }
            guard.executed.push((sql, params));
            guard.next_insert_id += 1;
            Outcome::Ok(guard.next_insert_id)
        }
    }

    fn execute_batch(
        &self,
        _cx: &Cx,
        sql: &str,
        param_sets: &[Vec<Value>],
    ) -> impl Future<Output = Outcome<Vec<BatchStatus>, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let count = param_sets.len();
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            guard.batches.push((sql, count));
            match guard.batch_statuses.take() {
                Some(statuses) => Outcome::Ok(statuses),
                None => Outcome::Ok(vec![BatchStatus::NoInfo; count]),
            }
        }
    }

    fn ping(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }

    fn close(self, _cx: &Cx) -> impl Future<Output = rowplan_core::Result<()>> + Send {
        async { Ok(()) }
    }
}
