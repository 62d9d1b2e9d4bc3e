//! Shared machinery of the update managers.
//!
//! Both flush strategies populate a [`RowManager`] from the dirty states
//! the same way, run the same generic "flush remaining rows" passes, and
//! execute buffered custom statements after the main flush. The strategy
//! only decides how the primary rows in the middle are ordered.

use crate::keys::KeyRegistry;
use crate::prepared::StatementManager;
use crate::row::{RowAction, Statement};
use crate::row_manager::{RowId, RowManager};
use crate::state::{DirtyState, EntityStatus};
use asupersync::Outcome;
use rowplan_core::{Connection, Error};
use std::sync::Arc;

/// Unwrap an `Outcome`, returning early from the enclosing function on the
/// error, cancelled, and panicked arms.
macro_rules! flow {
    ($expr:expr) => {
        match $expr {
            ::asupersync::Outcome::Ok(value) => value,
            ::asupersync::Outcome::Err(e) => return ::asupersync::Outcome::Err(e),
            ::asupersync::Outcome::Cancelled(r) => return ::asupersync::Outcome::Cancelled(r),
            ::asupersync::Outcome::Panicked(p) => return ::asupersync::Outcome::Panicked(p),
        }
    };
}
pub(crate) use flow;

/// Translate dirty states into pending rows.
///
/// Returns the custom statements buffered for execution after the main
/// flush. States that cannot be translated (a modified or deleted instance
/// with no primary key) contribute an error to `failures` and are skipped;
/// one bad state does not stop the rest of the batch.
pub(crate) fn populate(
    states: &[DirtyState],
    rowmgr: &mut RowManager,
    registry: &mut KeyRegistry,
    failures: &mut Vec<Error>,
) -> Vec<Statement> {
    let mut customs = Vec::new();
    for state in states {
        match state.status {
            EntityStatus::New => {
                if !state.pk.is_empty() {
                    registry.record(state.key, state.pk.clone());
                }
                if let Some(id) = rowmgr.get_row(&state.table, RowAction::Insert, state.key, true) {
                    let row = rowmgr.row_mut(id);
                    for (name, value) in &state.columns {
                        row.set_column(name.clone(), value.clone());
                    }
                    for (fk, target) in &state.foreign_keys {
                        match target {
                            Some(target) => row.set_foreign_key(fk.clone(), *target),
                            None => row.null_foreign_key(fk.clone()),
                        }
                    }
                    for (column, target) in &state.relation_ids {
                        row.set_relation_id(column.clone(), *target);
                    }
                }
            }
            EntityStatus::Modified => {
                if state.pk.is_empty() {
                    failures.push(Error::config(format!(
                        "modified instance of {} has no primary-key values",
                        state.table.name
                    )));
                    continue;
                }
                registry.record(state.key, state.pk.clone());
                if let Some(id) = rowmgr.get_row(&state.table, RowAction::Update, state.key, true) {
                    let row = rowmgr.row_mut(id);
                    row.where_primary_key(state.key);
                    row.set_failed_entity(state.key);
                    for (name, value) in &state.columns {
                        row.set_column(name.clone(), value.clone());
                    }
                    for (fk, target) in &state.foreign_keys {
                        match target {
                            Some(target) => row.set_foreign_key(fk.clone(), *target),
                            None => row.null_foreign_key(fk.clone()),
                        }
                    }
                    for (column, target) in &state.relation_ids {
                        row.set_relation_id(column.clone(), *target);
                    }
                }
            }
            EntityStatus::Deleted => {
                if state.pk.is_empty() {
                    failures.push(Error::config(format!(
                        "deleted instance of {} has no primary-key values",
                        state.table.name
                    )));
                    continue;
                }
                registry.record(state.key, state.pk.clone());
                if let Some(id) = rowmgr.get_row(&state.table, RowAction::Delete, state.key, true) {
                    let row = rowmgr.row_mut(id);
                    row.where_primary_key(state.key);
                    row.set_failed_entity(state.key);
                    // Reference fks on a delete become WHERE conditions.
                    for (fk, target) in &state.foreign_keys {
                        if let Some(target) = target {
                            row.where_foreign_key(fk.clone(), *target);
                        }
                    }
                }
            }
        }

        for op in &state.secondary {
            let action = if op.delete {
                RowAction::Delete
            } else if op.wheres.is_empty() {
                RowAction::Insert
            } else {
                RowAction::Update
            };
            let id = rowmgr.secondary_row(Arc::clone(&op.table), action);
            let row = rowmgr.row_mut(id);
            for (name, value) in &op.sets {
                row.set_column(name.clone(), value.clone());
            }
            for (name, value) in &op.wheres {
                row.where_column(name.clone(), value.clone());
            }
        }

        for op in &state.bulk {
            let action = if op.delete {
                RowAction::Delete
            } else {
                RowAction::Update
            };
            let id = rowmgr.all_row(Arc::clone(&op.table), action);
            let row = rowmgr.row_mut(id);
            for (name, value) in &op.sets {
                row.set_column(name.clone(), value.clone());
            }
            for (name, value) in &op.wheres {
                row.where_column(name.clone(), value.clone());
            }
            if let Some((fk, target)) = &op.where_fk {
                row.where_foreign_key(fk.clone(), *target);
            }
        }

        if let Some(custom) = &state.custom {
            customs.extend(custom.statements_for(state.status).iter().cloned());
        }
    }
    customs
}

/// Flush every row in the list that is still live, unflushed, and not
/// claimed by a dependency graph.
pub(crate) async fn flush_list<C: Connection>(
    ids: &[RowId],
    rowmgr: &mut RowManager,
    psmgr: &mut StatementManager<'_, C>,
) -> Outcome<(), Error> {
    for &id in ids {
        {
            let row = rowmgr.row(id);
            if row.is_flushed() || !row.is_valid() || row.is_dependent() {
                continue;
            }
        }
        flow!(psmgr.flush_row(rowmgr.row(id)).await);
        rowmgr.row_mut(id).set_flushed(true);
    }
    Outcome::Ok(())
}

/// Execute the buffered custom statements after the main flush.
pub(crate) async fn flush_customs<C: Connection>(
    customs: &[Statement],
    psmgr: &mut StatementManager<'_, C>,
) -> Outcome<(), Error> {
    for st in customs {
        flow!(psmgr.flush_custom(st).await);
    }
    Outcome::Ok(())
}
