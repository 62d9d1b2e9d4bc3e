//! Constraint-aware update manager.
//!
//! The standard flush strategy: discovers foreign-key dependencies between
//! the pending rows, builds an insert graph and a delete graph, breaks
//! circular constraints by deferring a nullable foreign key into a fix-up
//! update, and flushes everything in an order that never violates
//! referential integrity within the flush.
//!
//! Phase order:
//!
//! 1. all-row deletes, then secondary-table deletes (no foreign key ever
//!    targets a secondary table)
//! 2. all-row updates (bulk foreign-key null-outs)
//! 3. foreign-key analysis: build the graphs, resolve cycles
//! 4. the insert graph, in dependency order
//! 5. remaining inserts, then remaining updates (update fks may reference
//!    rows just inserted)
//! 6. the delete graph: fk-nulling updates first, then its nodes
//! 7. remaining deletes
//! 8. secondary-table inserts and updates
//! 9. statements still buffered by the statement manager, then custom
//!    statements

use crate::depth_first::{DepthFirstAnalysis, EdgeKind};
use crate::graph::{DepCause, Graph};
use crate::keys::KeyRegistry;
use crate::prepared::StatementManager;
use crate::row::{PendingRow, RowAction};
use crate::row_manager::{RowId, RowManager};
use crate::state::DirtyState;
use crate::update_manager::{flow, flush_customs, flush_list, populate};
use crate::{FlushConfig, FlushReport};
use asupersync::{Cx, Outcome};
use rowplan_core::{Connection, CycleError, Error, ObjectKey, Result, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Standard update manager, capable of foreign-key constraint evaluation.
#[derive(Debug, Default)]
pub struct ConstraintUpdateManager;

impl ConstraintUpdateManager {
    /// Create a constraint-aware update manager.
    pub fn new() -> Self {
        Self
    }

    /// Flush the dirty states through one connection.
    ///
    /// Per-row failures accumulate in the returned report; the error arm
    /// carries only structural failures (unbreakable cycles, engine bugs,
    /// unattributable writes, connection loss).
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

        // Secondary and all-row deletes first: nothing ever references them.
        let ids = rowmgr.all_row_deletes().to_vec();
        flow!(flush_list(&ids, &mut rowmgr, &mut psmgr).await);
        let ids = rowmgr.secondary_deletes().to_vec();
        flow!(flush_list(&ids, &mut rowmgr, &mut psmgr).await);
        let ids = rowmgr.all_row_updates().to_vec();
        flow!(flush_list(&ids, &mut rowmgr, &mut psmgr).await);

        let (insert_graph, delete_graph) = analyze_foreign_keys(&mut rowmgr);

        flow!(self.flush_graph(insert_graph, &mut rowmgr, &mut psmgr).await);

        // Inserts before updates: update fks may reference pks that have to
        // be inserted first.
        let ids = rowmgr.inserts().to_vec();
        flow!(flush_list(&ids, &mut rowmgr, &mut psmgr).await);
        let ids = rowmgr.updates().to_vec();
        flow!(flush_list(&ids, &mut rowmgr, &mut psmgr).await);

        flow!(self.flush_graph(delete_graph, &mut rowmgr, &mut psmgr).await);

        // Remaining deletes after updates: updates may null fks to rows
        // about to be deleted.
        let ids = rowmgr.deletes().to_vec();
        flow!(flush_list(&ids, &mut rowmgr, &mut psmgr).await);

        // Secondary inserts/updates last: they may rely on anything already
        // flushed, nothing relies on them.
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

    /// Flush one dependency graph: resolve its cycles, then its nodes in
    /// dependency order, bracketed by the fix-up updates the resolution
    /// produced.
    async fn flush_graph<C: Connection>(
        &self,
        graph: Option<Graph>,
        rowmgr: &mut RowManager,
        psmgr: &mut StatementManager<'_, C>,
    ) -> Outcome<(), Error> {
        let Some(mut graph) = graph else {
            return Outcome::Ok(());
        };

        let mut dfa = DepthFirstAnalysis::new(&graph);
        let mut delete_updates: Vec<PendingRow> = Vec::new();
        let mut insert_updates: Vec<PendingRow> = Vec::new();

        // Break circular constraints:
        // - a deleted row with a circular fk gets an update that nulls the
        //   fk before the graph is flushed
        // - an inserted/updated row with a circular fk has the fk cleared
        //   in place and restored by an update after the graph is flushed
        // Depending on where a cycle is broken, the topological order has
        // to be recalculated.
        let mut recalculate = match resolve_cycles(
            &mut graph,
            &dfa,
            EdgeKind::Back,
            rowmgr,
            &mut delete_updates,
            &mut insert_updates,
        ) {
            Ok(recalc) => recalc,
            Err(e) => return Outcome::Err(e),
        };
        recalculate |= match resolve_cycles(
            &mut graph,
            &dfa,
            EdgeKind::Forward,
            rowmgr,
            &mut delete_updates,
            &mut insert_updates,
        ) {
            Ok(recalc) => recalc,
            Err(e) => return Outcome::Err(e),
        };

        if recalculate {
            dfa = DepthFirstAnalysis::new(&graph);
            if !dfa.has_no_cycles() {
                return Outcome::Err(Error::Internal(
                    "dependency graph is still cyclic after breaking all reported cycles".into(),
                ));
            }
        }

        for update in &delete_updates {
            flow!(psmgr.flush_row(update).await);
        }
        for &node in dfa.sorted_nodes() {
            let id = graph.row_at(node);
            {
                let row = rowmgr.row(id);
                if row.is_flushed() || !row.is_valid() {
                    continue;
                }
            }
            flow!(psmgr.flush_row(rowmgr.row(id)).await);
            rowmgr.row_mut(id).set_flushed(true);
        }
        for update in &insert_updates {
            flow!(psmgr.flush_row(update).await);
        }
        Outcome::Ok(())
    }
}

/// Analyze foreign-key dependencies between the pending rows and build the
/// insert and delete graphs.
///
/// The insert graph is flushed before the ungraphed rows, the delete graph
/// after them. When a delete cross-references an insert (delete-then-insert
/// of the same primary key), inserts *and updates* fold into the delete
/// graph instead, since they all interdepend with the deletes.
fn analyze_foreign_keys(rowmgr: &mut RowManager) -> (Option<Graph>, Option<Graph>) {
    let inserts = rowmgr.inserts().to_vec();
    let updates = rowmgr.updates().to_vec();
    let deletes = rowmgr.deletes().to_vec();

    // Map insert identities so delete-then-insert-same-pk cases can be
    // detected while walking the deletes.
    let mut insert_map: HashMap<ObjectKey, RowId> = HashMap::new();
    if !deletes.is_empty() && !inserts.is_empty() {
        for &id in &inserts {
            if let Some(key) = rowmgr.row(id).primary_key() {
                insert_map.insert(key, id);
            }
        }
    }

    let mut insert_graph: Option<Graph> = None;
    let mut delete_graph: Option<Graph> = None;
    let mut ignore_updates = true;

    for &del in &deletes {
        if !rowmgr.row(del).is_valid() {
            continue;
        }

        if let Some(ins) = rowmgr
            .row(del)
            .primary_key()
            .and_then(|key| insert_map.get(&key).copied())
        {
            if rowmgr.row(ins).is_valid() {
                ignore_updates = false;
                add_edge(&mut delete_graph, rowmgr, ins, del, DepCause::Replacement);
            }
        }

        // Check this row's fks against the other deletes. Relation fks set
        // a value, reference fks just set a where condition; check both.
        let table = Arc::clone(rowmgr.row(del).table());
        for fk in &table.foreign_keys {
            let target = rowmgr
                .row(del)
                .fk_set_target(&fk.name)
                .or_else(|| rowmgr.row(del).fk_where_target(&fk.name));
            let Some(target) = target else { continue };
            let Some(other) = rowmgr.lookup(&fk.target_table, RowAction::Delete, target) else {
                continue;
            };
            if other != del && rowmgr.row(other).is_valid() {
                add_edge(
                    &mut delete_graph,
                    rowmgr,
                    other,
                    del,
                    DepCause::ForeignKey(fk.clone()),
                );
            }
        }
    }

    if ignore_updates {
        analyze_against_inserts(rowmgr, &inserts, &mut insert_graph);
    } else {
        analyze_against_inserts(rowmgr, &updates, &mut delete_graph);
        analyze_against_inserts(rowmgr, &inserts, &mut delete_graph);
    }
    (insert_graph, delete_graph)
}

/// Add dependencies from the given rows onto the pending inserts they
/// reference.
fn analyze_against_inserts(rowmgr: &mut RowManager, rows: &[RowId], graph: &mut Option<Graph>) {
    for &id in rows {
        if !rowmgr.row(id).is_valid() {
            continue;
        }
        let table = Arc::clone(rowmgr.row(id).table());
        for fk in &table.foreign_keys {
            let Some(target) = rowmgr.row(id).fk_set_target(&fk.name) else {
                continue;
            };
            let Some(other) = rowmgr.lookup(&fk.target_table, RowAction::Insert, target) else {
                continue;
            };
            if !rowmgr.row(other).is_valid() {
                continue;
            }
            // A self-reference only matters when its value cannot be
            // written synchronously: deferred, logical, or pointing at a
            // database-assigned key.
            if other != id || fk.deferred || fk.logical || table.auto_assign {
                add_edge(graph, rowmgr, id, other, DepCause::ForeignKey(fk.clone()));
            }
        }
        // Relation-id columns depend on the referenced insert the same way
        // a real fk does: the pk row has to be inserted first.
        for col in table.relation_id_columns() {
            let Some(target) = rowmgr.row(id).relation_id_target(&col.name) else {
                continue;
            };
            let Some(rel_table) = col.relation_target.as_deref() else {
                continue;
            };
            let Some(other) = rowmgr.lookup(rel_table, RowAction::Insert, target) else {
                continue;
            };
            if rowmgr.row(other).is_valid() {
                add_edge(graph, rowmgr, id, other, DepCause::RelationId(col.clone()));
            }
        }
    }
}

/// Add an edge between two rows, creating the graph on first use and
/// marking both rows as graph-owned.
fn add_edge(
    graph: &mut Option<Graph>,
    rowmgr: &mut RowManager,
    from: RowId,
    to: RowId,
    cause: DepCause,
) {
    let graph = graph.get_or_insert_with(Graph::new);
    rowmgr.row_mut(from).set_dependent(true);
    rowmgr.row_mut(to).set_dependent(true);
    graph.link(from, to, cause);
}

/// Resolve the cycles reported by the given edge class.
///
/// Returns whether the topological order must be recalculated: removing an
/// edge other than the one that reported the cycle can change reachability
/// anywhere in the graph.
fn resolve_cycles(
    graph: &mut Graph,
    dfa: &DepthFirstAnalysis,
    kind: EdgeKind,
    rowmgr: &mut RowManager,
    delete_updates: &mut Vec<PendingRow>,
    insert_updates: &mut Vec<PendingRow>,
) -> Result<bool> {
    let mut recalculate = false;
    for edge in dfa.edges(kind) {
        let Some(cycle) = dfa.cycle(edge) else {
            continue;
        };
        let breakable = find_breakable_link(graph, rowmgr, cycle)?;
        if breakable != edge {
            recalculate = true;
        }
        if graph.edge(breakable).is_removed() {
            continue;
        }

        let from_row = graph.row_at(graph.edge(breakable).from);
        let to_row = graph.row_at(graph.edge(breakable).to);
        let cause = graph.edge(breakable).cause.clone();
        if rowmgr.row(from_row).action() == RowAction::Delete {
            delete_updates.push(make_delete_update(rowmgr, to_row, &cause)?);
        } else {
            insert_updates.push(make_insert_update(rowmgr, from_row, &cause)?);
        }
        graph.remove_edge(breakable);
    }
    Ok(recalculate)
}

/// Find a nullable constraint by walking the cycle's edge list in order.
///
/// The first nullable edge wins; which one is chosen when several exist is
/// implementation-defined but deterministic for a given input ordering.
fn find_breakable_link(graph: &Graph, rowmgr: &RowManager, cycle: &[usize]) -> Result<usize> {
    for &edge in cycle {
        if graph.edge(edge).cause.nullable() == Some(true) {
            return Ok(edge);
        }
    }
    let tables = cycle
        .iter()
        .map(|&edge| {
            rowmgr
                .row(graph.row_at(graph.edge(edge).from))
                .table()
                .name
                .clone()
        })
        .collect();
    Err(Error::UnbreakableCycle(CycleError { tables }))
}

/// Break a circular dependency caused by delete operations: null the
/// referencing row's fk with an update executed before the deletes.
fn make_delete_update(
    rowmgr: &mut RowManager,
    to_row: RowId,
    cause: &DepCause,
) -> Result<PendingRow> {
    let mut update = {
        let row = rowmgr.row(to_row);
        let mut update = PendingRow::new(Arc::clone(row.table()), RowAction::Update, None);
        row.copy_where_into(&mut update);
        update
    };
    match cause {
        DepCause::ForeignKey(fk) => {
            update.null_foreign_key(fk.name.clone());
            // The delete must stop matching on the column just nulled.
            update.clear_foreign_key_where(&fk.name);
            rowmgr.row_mut(to_row).clear_foreign_key_where(&fk.name);
        }
        DepCause::RelationId(col) => {
            update.set_column(col.name.clone(), Value::Null);
        }
        DepCause::Replacement => {
            return Err(Error::Internal(
                "a primary-key replacement dependency cannot be broken".into(),
            ));
        }
    }
    Ok(update)
}

/// Break a circular dependency caused by insert/update operations: clear
/// the fk on the source row now and restore it with an update executed
/// after the graph, once the target's (possibly auto-assigned) key is
/// known.
fn make_insert_update(
    rowmgr: &mut RowManager,
    from_row: RowId,
    cause: &DepCause,
) -> Result<PendingRow> {
    let action = rowmgr.row(from_row).action();
    let mut update = {
        let row = rowmgr.row(from_row);
        let mut update = PendingRow::new(Arc::clone(row.table()), RowAction::Update, None);
        if action == RowAction::Insert {
            let Some(key) = row.primary_key() else {
                return Err(Error::Internal(
                    "cannot break an insert cycle for a row with no identity".into(),
                ));
            };
            update.where_primary_key(key);
        } else {
            row.copy_where_into(&mut update);
        }
        update
    };
    match cause {
        DepCause::ForeignKey(fk) => {
            let Some(target) = rowmgr.row(from_row).fk_set_target(&fk.name) else {
                return Err(Error::Internal(format!(
                    "cycle edge for {} has no foreign-key value to defer",
                    fk.name
                )));
            };
            update.set_foreign_key(fk.name.clone(), target);
            rowmgr.row_mut(from_row).clear_foreign_key(&fk.name);
        }
        DepCause::RelationId(col) => {
            let Some(target) = rowmgr.row(from_row).relation_id_target(&col.name) else {
                return Err(Error::Internal(format!(
                    "cycle edge for {} has no relation-id value to defer",
                    col.name
                )));
            };
            update.set_relation_id(col.name.clone(), target);
            rowmgr.row_mut(from_row).clear_relation_id(&col.name);
        }
        DepCause::Replacement => {
            return Err(Error::Internal(
                "a primary-key replacement dependency cannot be broken".into(),
            ));
        }
    }
    Ok(update)
}
