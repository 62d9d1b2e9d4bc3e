//! Operation-order update manager.
//!
//! A cheaper alternative to full constraint analysis: primary rows flush in
//! the order the instances were dirtied, and foreign-key trouble is patched
//! locally. An insert or update whose fk points at an insert that has not
//! flushed yet defers that fk into a fix-up update run after the sweep; a
//! delete that a later delete still references gets the referencing fk
//! nulled just before it runs. Callers that need full constraint awareness
//! use the constraint-aware manager instead.

use crate::keys::KeyRegistry;
use crate::prepared::StatementManager;
use crate::row::{PendingRow, RowAction};
use crate::row_manager::{RowId, RowManager};
use crate::state::DirtyState;
use crate::update_manager::{flow, flush_customs, flush_list, populate};
use crate::{FlushConfig, FlushReport};
use asupersync::{Cx, Outcome};
use rowplan_core::{Connection, Error};
use std::sync::Arc;

/// Update manager that flushes rows in object-dirtying order.
#[derive(Debug, Default)]
pub struct OperationOrderUpdateManager;

impl OperationOrderUpdateManager {
    /// Create an operation-order update manager.
    pub fn new() -> Self {
        Self
    }

    /// Flush the dirty states through one connection, preserving dirtying
    /// order between the primary rows.
    #[tracing::instrument(level = "debug", skip_all, fields(states = states.len()))]
    pub async fn flush<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        states: &[DirtyState],
        config: &FlushConfig,
    ) -> Outcome<FlushReport, Error> {
        let mut rowmgr = RowManager::new();
        let mut registry = KeyRegistry::new();
        let mut early_failures = Vec::new();
        let customs = populate(states, &mut rowmgr, &mut registry, &mut early_failures);
        let mut psmgr = config.statement_manager(cx, conn, registry);

        let ids = rowmgr.all_row_deletes().to_vec();
        flow!(flush_list(&ids, &mut rowmgr, &mut psmgr).await);
        let ids = rowmgr.secondary_deletes().to_vec();
        flow!(flush_list(&ids, &mut rowmgr, &mut psmgr).await);
        let ids = rowmgr.all_row_updates().to_vec();
        flow!(flush_list(&ids, &mut rowmgr, &mut psmgr).await);

        let ordered = rowmgr.ordered().to_vec();
        let mut deferred: Vec<PendingRow> = Vec::new();
        for (pos, &id) in ordered.iter().enumerate() {
            {
                let row = rowmgr.row(id);
                if row.is_flushed() || !row.is_valid() {
                    continue;
                }
            }
            match rowmgr.row(id).action() {
                RowAction::Delete => {
                    // A later delete may still reference this row; null its
                    // fk before the referenced row goes away.
                    let fixups = null_later_references(&mut rowmgr, &ordered[pos + 1..], id);
                    for fixup in &fixups {
                        flow!(psmgr.flush_row(fixup).await);
                    }
                }
                RowAction::Insert | RowAction::Update => {
                    // An fk pointing forward across the ordering cannot be
                    // written yet; defer it past the sweep.
                    deferred.extend(defer_forward_references(&mut rowmgr, id));
                }
            }
            flow!(psmgr.flush_row(rowmgr.row(id)).await);
            rowmgr.row_mut(id).set_flushed(true);
        }
        for update in &deferred {
            flow!(psmgr.flush_row(update).await);
        }

        let ids = rowmgr.secondary_updates().to_vec();
        flow!(flush_list(&ids, &mut rowmgr, &mut psmgr).await);

        flow!(psmgr.flush_buffered().await);
        flow!(flush_customs(&customs, &mut psmgr).await);

        let mut report = psmgr.finish();
        if !early_failures.is_empty() {
            early_failures.append(&mut report.failures);
            report.failures = early_failures;
        }
        Outcome::Ok(report)
    }
}

/// Strip fks of the given row that point at inserts which have not flushed
/// yet, returning the fix-up updates that restore them afterwards.
fn defer_forward_references(rowmgr: &mut RowManager, id: RowId) -> Vec<PendingRow> {
    let table = Arc::clone(rowmgr.row(id).table());
    let mut fixes = Vec::new();
    for fk in &table.foreign_keys {
        let Some(target) = rowmgr.row(id).fk_set_target(&fk.name) else {
            continue;
        };
        let Some(other) = rowmgr.lookup(&fk.target_table, RowAction::Insert, target) else {
            continue;
        };
        if other == id || rowmgr.row(other).is_flushed() || !rowmgr.row(other).is_valid() {
            continue;
        }
        tracing::debug!(fk = %fk.name, table = %table.name, "deferring forward fk");
        let mut update = PendingRow::new(Arc::clone(&table), RowAction::Update, None);
        match rowmgr.row(id).action() {
            RowAction::Insert => {
                if let Some(key) = rowmgr.row(id).primary_key() {
                    update.where_primary_key(key);
                }
            }
            _ => rowmgr.row(id).copy_where_into(&mut update),
        }
        update.set_foreign_key(fk.name.clone(), target);
        rowmgr.row_mut(id).clear_foreign_key(&fk.name);
        fixes.push(update);
    }
    fixes
}

/// Null, via immediate updates, every fk of a *later* unflushed delete that
/// references the row about to be deleted.
fn null_later_references(
    rowmgr: &mut RowManager,
    later: &[RowId],
    target_id: RowId,
) -> Vec<PendingRow> {
    let Some(target_key) = rowmgr.row(target_id).primary_key() else {
        return Vec::new();
    };
    let mut fixups = Vec::new();
    for &id in later {
        {
            let row = rowmgr.row(id);
            if row.action() != RowAction::Delete || !row.is_valid() || row.is_flushed() {
                continue;
            }
        }
        let table = Arc::clone(rowmgr.row(id).table());
        for fk in &table.foreign_keys {
            let references = rowmgr.row(id).fk_set_target(&fk.name) == Some(target_key)
                || rowmgr.row(id).fk_where_target(&fk.name) == Some(target_key);
            if !references {
                continue;
            }
            tracing::debug!(fk = %fk.name, table = %table.name, "nulling backward fk");
            let mut update = PendingRow::new(Arc::clone(&table), RowAction::Update, None);
            rowmgr.row(id).copy_where_into(&mut update);
            update.null_foreign_key(fk.name.clone());
            update.clear_foreign_key_where(&fk.name);
            rowmgr.row_mut(id).clear_foreign_key_where(&fk.name);
            rowmgr.row_mut(id).clear_foreign_key(&fk.name);
            fixups.push(update);
        }
    }
    fixups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EntityStatus;
    use crate::testutil::{unwrap_outcome, MockConnection, MockState};
    use asupersync::runtime::RuntimeBuilder;
    use rowplan_core::{Column, ForeignKey, ObjectKey, Table, Value};
    use std::sync::{Arc, Mutex};

    fn run_flush(
        states: &[DirtyState],
        state: &Arc<Mutex<MockState>>,
    ) -> Outcome<FlushReport, Error> {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new(Arc::clone(state));
        let config = FlushConfig::default().strategy(crate::FlushStrategy::OperationOrder);
        let mgr = OperationOrderUpdateManager::new();
        rt.block_on(async { mgr.flush(&cx, &conn, states, &config).await })
    }

    fn executed_sql(state: &Arc<Mutex<MockState>>) -> Vec<String> {
        state
            .lock()
            .expect("lock poisoned")
            .executed
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    fn teams() -> Arc<Table> {
        Arc::new(
            Table::new("teams")
                .column(Column::new("id").not_null(true))
                .column(Column::new("name"))
                .primary_key(vec!["id".into()]),
        )
    }

    fn heroes() -> Arc<Table> {
        Arc::new(
            Table::new("heroes")
                .column(Column::new("id").not_null(true))
                .column(Column::new("name"))
                .column(Column::new("team_id"))
                .primary_key(vec!["id".into()])
                .foreign_key(ForeignKey::single("fk_team", "team_id", "teams")),
        )
    }

    fn key(table: &str, id: i64) -> ObjectKey {
        ObjectKey::from_pk(table, &[Value::BigInt(id)])
    }

    #[test]
    fn test_rows_flush_in_dirtying_order() {
        let states = vec![
            DirtyState::new(key("teams", 2), teams(), EntityStatus::New)
                .pk(vec![Value::BigInt(2)])
                .column("name", Value::Text("b".into())),
            DirtyState::new(key("teams", 1), teams(), EntityStatus::Modified)
                .pk(vec![Value::BigInt(1)])
                .column("name", Value::Text("a".into())),
            DirtyState::new(key("teams", 3), teams(), EntityStatus::Deleted)
                .pk(vec![Value::BigInt(3)]),
        ];

        let state = Arc::new(Mutex::new(MockState::default()));
        let report = unwrap_outcome(run_flush(&states, &state));
        assert!(report.failures.is_empty());

        let sql = executed_sql(&state);
        assert!(sql[0].starts_with("INSERT"));
        assert!(sql[1].starts_with("UPDATE"));
        assert!(sql[2].starts_with("DELETE"));
    }

    #[test]
    fn test_forward_fk_is_deferred_into_update() {
        let team_key = key("teams", 1);
        let hero_key = key("heroes", 10);
        // The hero dirties first but references a team inserted later.
        let states = vec![
            DirtyState::new(hero_key, heroes(), EntityStatus::New)
                .pk(vec![Value::BigInt(10)])
                .foreign_key("fk_team", team_key),
            DirtyState::new(team_key, teams(), EntityStatus::New)
                .pk(vec![Value::BigInt(1)])
                .column("name", Value::Text("Avengers".into())),
        ];

        let state = Arc::new(Mutex::new(MockState::default()));
        let report = unwrap_outcome(run_flush(&states, &state));
        assert!(report.failures.is_empty());
        assert_eq!(report.inserted, 2);
        assert_eq!(report.updated, 1);

        let sql = executed_sql(&state);
        assert_eq!(sql.len(), 3);
        // The hero inserts without its fk, in submission order...
        assert_eq!(sql[0], "INSERT INTO \"heroes\" (\"id\") VALUES ($1)");
        assert!(sql[1].starts_with("INSERT INTO \"teams\""));
        // ...and the fk lands afterwards.
        assert_eq!(
            sql[2],
            "UPDATE \"heroes\" SET \"team_id\" = $1 WHERE \"id\" = $2"
        );
    }

    #[test]
    fn test_backward_fk_reference_nulled_before_delete() {
        let team_key = key("teams", 1);
        let hero_key = key("heroes", 10);
        // The referenced team is deleted before the referencing hero.
        let states = vec![
            DirtyState::new(team_key, teams(), EntityStatus::Deleted).pk(vec![Value::BigInt(1)]),
            DirtyState::new(hero_key, heroes(), EntityStatus::Deleted)
                .pk(vec![Value::BigInt(10)])
                .foreign_key("fk_team", team_key),
        ];

        let state = Arc::new(Mutex::new(MockState::default()));
        let report = unwrap_outcome(run_flush(&states, &state));
        assert!(report.failures.is_empty());
        assert_eq!(report.deleted, 2);
        assert_eq!(report.updated, 1);

        let sql = executed_sql(&state);
        assert_eq!(sql.len(), 3);
        assert!(sql[0].starts_with("UPDATE \"heroes\" SET \"team_id\""));
        assert!(sql[1].starts_with("DELETE FROM \"teams\""));
        assert!(sql[2].starts_with("DELETE FROM \"heroes\""));
    }

    #[test]
    fn test_fk_to_already_flushed_insert_is_written_inline() {
        let team_key = key("teams", 1);
        let hero_key = key("heroes", 10);
        // Parent dirties first: no deferral needed.
        let states = vec![
            DirtyState::new(team_key, teams(), EntityStatus::New)
                .pk(vec![Value::BigInt(1)])
                .column("name", Value::Text("Avengers".into())),
            DirtyState::new(hero_key, heroes(), EntityStatus::New)
                .pk(vec![Value::BigInt(10)])
                .foreign_key("fk_team", team_key),
        ];

        let state = Arc::new(Mutex::new(MockState::default()));
        let report = unwrap_outcome(run_flush(&states, &state));
        assert!(report.failures.is_empty());
        assert_eq!(report.updated, 0);

        let sql = executed_sql(&state);
        assert_eq!(sql.len(), 2);
        assert!(sql[1].contains("\"team_id\""));
    }
}
