//! Pending-row registry for one flush.
//!
//! The [`RowManager`] owns every pending row of a flush in an arena and
//! deduplicates primary rows by `(table, action, entity)` so that multiple
//! field-level contributions for the same entity coalesce into a single
//! statement. Rows are addressed by integer [`RowId`]s; the dependency
//! graphs store those ids rather than references, which keeps the cyclic
//! structures free of ownership cycles.

use crate::row::{PendingRow, RowAction};
use rowplan_core::{ObjectKey, Table};
use std::collections::HashMap;
use std::sync::Arc;

/// Index of a row in the flush arena.
pub type RowId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RowKey {
    table: String,
    action: RowAction,
    key: ObjectKey,
}

/// Registry of all pending rows for one flush operation.
///
/// Created once per flush and discarded when the flush completes. Exposes
/// partitioned views over the arena: primary inserts/updates/deletes,
/// secondary-table deletes and updates, "all row" deletes and updates, and
/// the insertion-order list used by the operation-order strategy.
#[derive(Debug, Default)]
pub struct RowManager {
    rows: Vec<PendingRow>,
    index: HashMap<RowKey, RowId>,
    inserts: Vec<RowId>,
    updates: Vec<RowId>,
    deletes: Vec<RowId>,
    secondary_deletes: Vec<RowId>,
    secondary_updates: Vec<RowId>,
    all_row_deletes: Vec<RowId>,
    all_row_updates: Vec<RowId>,
    ordered: Vec<RowId>,
    auto_assign: bool,
}

impl RowManager {
    /// Create an empty row manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the primary row for `(table, action, entity)`.
    ///
    /// Repeated calls with the same key return the same row, so successive
    /// contributions accumulate on one statement. Returns `None` when the
    /// row does not exist and `create` is false.
    ///
    /// Creating a DELETE for an entity that has a live INSERT in the same
    /// flush cancels both: the row never existed in the database, so
    /// neither statement should execute.
    pub fn get_row(
        &mut self,
        table: &Arc<Table>,
        action: RowAction,
        key: ObjectKey,
        create: bool,
    ) -> Option<RowId> {
        let row_key = RowKey {
            table: table.name.clone(),
            action,
            key,
        };
        if let Some(&id) = self.index.get(&row_key) {
            return Some(id);
        }
        if !create {
            return None;
        }

        let id = self.rows.len();
        self.rows
            .push(PendingRow::new(Arc::clone(table), action, Some(key)));
        self.index.insert(row_key, id);
        self.ordered.push(id);
        match action {
            RowAction::Insert => {
                self.inserts.push(id);
                if table.auto_assign {
                    self.auto_assign = true;
                }
            }
            RowAction::Update => self.updates.push(id),
            RowAction::Delete => {
                self.deletes.push(id);
                let insert_key = RowKey {
                    table: table.name.clone(),
                    action: RowAction::Insert,
                    key,
                };
                if let Some(&insert_id) = self.index.get(&insert_key) {
                    if self.rows[insert_id].is_valid() {
                        tracing::debug!(
                            table = %table.name,
                            "insert cancelled by delete in the same flush"
                        );
                        self.rows[insert_id].set_valid(false);
                        self.rows[id].set_valid(false);
                    }
                }
            }
        }
        Some(id)
    }

    /// Look up an existing primary row by table name.
    pub fn lookup(&self, table: &str, action: RowAction, key: ObjectKey) -> Option<RowId> {
        self.index
            .get(&RowKey {
                table: table.to_string(),
                action,
                key,
            })
            .copied()
    }

    /// Create a secondary-table row. Secondary rows are never deduplicated;
    /// each call creates a fresh statement.
    pub fn secondary_row(&mut self, table: Arc<Table>, action: RowAction) -> RowId {
        let id = self.rows.len();
        self.rows.push(PendingRow::new(table, action, None));
        match action {
            RowAction::Delete => self.secondary_deletes.push(id),
            RowAction::Insert | RowAction::Update => self.secondary_updates.push(id),
        }
        id
    }

    /// Create an "all row" statement: an update or delete with no specific
    /// primary key (e.g. a bulk foreign-key null-out).
    pub fn all_row(&mut self, table: Arc<Table>, action: RowAction) -> RowId {
        let id = self.rows.len();
        self.rows.push(PendingRow::new(table, action, None));
        match action {
            RowAction::Delete => self.all_row_deletes.push(id),
            RowAction::Insert | RowAction::Update => self.all_row_updates.push(id),
        }
        id
    }

    /// Access a row.
    pub fn row(&self, id: RowId) -> &PendingRow {
        &self.rows[id]
    }

    /// Access a row mutably.
    pub fn row_mut(&mut self, id: RowId) -> &mut PendingRow {
        &mut self.rows[id]
    }

    /// Primary insert rows, in creation order.
    pub fn inserts(&self) -> &[RowId] {
        &self.inserts
    }

    /// Primary update rows, in creation order.
    pub fn updates(&self) -> &[RowId] {
        &self.updates
    }

    /// Primary delete rows, in creation order.
    pub fn deletes(&self) -> &[RowId] {
        &self.deletes
    }

    /// Secondary-table deletes; always safe to flush first.
    pub fn secondary_deletes(&self) -> &[RowId] {
        &self.secondary_deletes
    }

    /// Secondary-table inserts and updates; always flushed last.
    pub fn secondary_updates(&self) -> &[RowId] {
        &self.secondary_updates
    }

    /// All-row deletes.
    pub fn all_row_deletes(&self) -> &[RowId] {
        &self.all_row_deletes
    }

    /// All-row updates.
    pub fn all_row_updates(&self) -> &[RowId] {
        &self.all_row_updates
    }

    /// Primary rows in the order they were created, for operation-order
    /// flushing.
    pub fn ordered(&self) -> &[RowId] {
        &self.ordered
    }

    /// Whether any insert targets a table with a database-assigned key.
    pub fn has_auto_assign_constraints(&self) -> bool {
        self.auto_assign
    }

    /// Total number of rows in the arena.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowplan_core::{Column, Value};

    fn table(name: &str) -> Arc<Table> {
        Arc::new(
            Table::new(name)
                .column(Column::new("id").not_null(true))
                .column(Column::new("name"))
                .primary_key(vec!["id".into()]),
        )
    }

    fn key(table: &str, id: i64) -> ObjectKey {
        ObjectKey::from_pk(table, &[Value::BigInt(id)])
    }

    #[test]
    fn test_get_row_coalesces_contributions() {
        let mut mgr = RowManager::new();
        let teams = table("teams");
        let k = key("teams", 1);

        let a = mgr.get_row(&teams, RowAction::Update, k, true).unwrap();
        mgr.row_mut(a).set_column("name", Value::Text("x".into()));

        let b = mgr.get_row(&teams, RowAction::Update, k, true).unwrap();
        mgr.row_mut(b).set_column("rank", Value::Int(3));

        assert_eq!(a, b);
        assert_eq!(mgr.updates().len(), 1);
    }

    #[test]
    fn test_get_row_without_create() {
        let mut mgr = RowManager::new();
        let teams = table("teams");
        assert!(mgr
            .get_row(&teams, RowAction::Insert, key("teams", 1), false)
            .is_none());
    }

    #[test]
    fn test_distinct_actions_get_distinct_rows() {
        let mut mgr = RowManager::new();
        let teams = table("teams");
        let k = key("teams", 1);
        let upd = mgr.get_row(&teams, RowAction::Update, k, true).unwrap();
        let ins = mgr
            .get_row(&teams, RowAction::Insert, key("teams", 2), true)
            .unwrap();
        assert_ne!(upd, ins);
        assert_eq!(mgr.ordered(), &[upd, ins]);
    }

    #[test]
    fn test_insert_then_delete_cancels_both() {
        let mut mgr = RowManager::new();
        let teams = table("teams");
        let k = key("teams", 1);

        let ins = mgr.get_row(&teams, RowAction::Insert, k, true).unwrap();
        let del = mgr.get_row(&teams, RowAction::Delete, k, true).unwrap();

        assert!(!mgr.row(ins).is_valid());
        assert!(!mgr.row(del).is_valid());
    }

    #[test]
    fn test_delete_then_insert_stays_valid() {
        // Replacement case: handled by the dependency graph, not cancelled.
        let mut mgr = RowManager::new();
        let teams = table("teams");
        let k = key("teams", 1);

        let del = mgr.get_row(&teams, RowAction::Delete, k, true).unwrap();
        let ins = mgr.get_row(&teams, RowAction::Insert, k, true).unwrap();

        assert!(mgr.row(del).is_valid());
        assert!(mgr.row(ins).is_valid());
    }

    #[test]
    fn test_partitions() {
        let mut mgr = RowManager::new();
        let teams = table("teams");
        let names = Arc::new(Table::new("team_names").secondary(true));

        mgr.get_row(&teams, RowAction::Insert, key("teams", 1), true);
        mgr.get_row(&teams, RowAction::Delete, key("teams", 2), true);
        mgr.secondary_row(Arc::clone(&names), RowAction::Delete);
        mgr.secondary_row(Arc::clone(&names), RowAction::Insert);
        mgr.all_row(Arc::clone(&teams), RowAction::Update);

        assert_eq!(mgr.inserts().len(), 1);
        assert_eq!(mgr.deletes().len(), 1);
        assert_eq!(mgr.secondary_deletes().len(), 1);
        assert_eq!(mgr.secondary_updates().len(), 1);
        assert_eq!(mgr.all_row_updates().len(), 1);
        assert_eq!(mgr.all_row_deletes().len(), 0);
        // Only primary rows appear in the ordered view.
        assert_eq!(mgr.ordered().len(), 2);
    }

    #[test]
    fn test_auto_assign_tracking() {
        let mut mgr = RowManager::new();
        let auto = Arc::new(
            Table::new("teams")
                .primary_key(vec!["id".into()])
                .auto_assign(true),
        );
        assert!(!mgr.has_auto_assign_constraints());
        mgr.get_row(&auto, RowAction::Insert, ObjectKey::unassigned("teams", 0), true);
        assert!(mgr.has_auto_assign_constraints());
    }
}
