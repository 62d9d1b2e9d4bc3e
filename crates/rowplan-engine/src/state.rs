//! Dirty entity states — the input to a flush.
//!
//! A [`DirtyState`] is the engine-facing snapshot of one entity instance
//! that changed during a transaction: its lifecycle status, mapped table,
//! primary-key values (possibly still unassigned), and the column /
//! foreign-key contributions the mapping layer extracted from it. The
//! metadata itself (`Table` descriptors) is consumed read-only; this crate
//! never inspects entity objects.

use crate::row::Statement;
use rowplan_core::{ObjectKey, Table, Value};
use std::sync::Arc;

/// Lifecycle status of a dirty entity instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    /// Newly persisted; becomes an INSERT.
    New,
    /// Loaded and modified; becomes an UPDATE of the changed columns.
    Modified,
    /// Marked for removal; becomes a DELETE.
    Deleted,
}

/// An operation against a secondary table joined to the entity's row.
///
/// Secondary tables are never foreign-key targets, so their deletes always
/// flush first and their inserts/updates always flush last.
#[derive(Debug, Clone)]
pub struct SecondaryOp {
    /// The secondary table.
    pub table: Arc<Table>,
    /// Whether this is an insert/update or a delete.
    pub delete: bool,
    /// Column values to set (ignored for deletes).
    pub sets: Vec<(String, Value)>,
    /// WHERE conditions.
    pub wheres: Vec<(String, Value)>,
}

/// A bulk operation with no specific primary key ("all row"), such as
/// nulling a foreign key on every row that references a deleted entity.
#[derive(Debug, Clone)]
pub struct BulkOp {
    /// The target table.
    pub table: Arc<Table>,
    /// Whether this is an update or a delete.
    pub delete: bool,
    /// Column values to set (ignored for deletes).
    pub sets: Vec<(String, Value)>,
    /// Plain WHERE conditions.
    pub wheres: Vec<(String, Value)>,
    /// Foreign-key WHERE condition: match rows whose FK points at the given
    /// entity.
    pub where_fk: Option<(String, ObjectKey)>,
}

/// Custom DML supplied by a mapping strategy instead of (or in addition to)
/// the default statements.
///
/// The statements for the state's lifecycle status are buffered during
/// populate and executed after the main flush; their failures fold into the
/// flush report like any other per-row failure.
#[derive(Debug, Clone, Default)]
pub struct CustomOp {
    /// Statements run for a `New` state.
    pub insert: Vec<Statement>,
    /// Statements run for a `Modified` state.
    pub update: Vec<Statement>,
    /// Statements run for a `Deleted` state.
    pub delete: Vec<Statement>,
}

impl CustomOp {
    /// The buffered statements for the given status.
    pub fn statements_for(&self, status: EntityStatus) -> &[Statement] {
        match status {
            EntityStatus::New => &self.insert,
            EntityStatus::Modified => &self.update,
            EntityStatus::Deleted => &self.delete,
        }
    }
}

/// One dirty entity instance submitted to a flush.
#[derive(Debug, Clone)]
pub struct DirtyState {
    /// Identity of the instance; stable for the whole flush even when the
    /// primary key is database-assigned.
    pub key: ObjectKey,
    /// The primary table the instance maps to.
    pub table: Arc<Table>,
    /// Lifecycle status.
    pub status: EntityStatus,
    /// Primary-key values; empty while an auto-assigned key is pending.
    pub pk: Vec<Value>,
    /// Changed (or, for inserts, all) non-key column values.
    pub columns: Vec<(String, Value)>,
    /// Foreign-key values by constraint name; `None` sets the columns NULL.
    /// For a `Deleted` state these become WHERE conditions instead.
    pub foreign_keys: Vec<(String, Option<ObjectKey>)>,
    /// Relation-id column values by column name.
    pub relation_ids: Vec<(String, ObjectKey)>,
    /// Secondary-table operations belonging to this instance.
    pub secondary: Vec<SecondaryOp>,
    /// Bulk "all row" operations triggered by this instance.
    pub bulk: Vec<BulkOp>,
    /// Custom statements from the mapping strategy, if any.
    pub custom: Option<CustomOp>,
}

impl DirtyState {
    /// Create a state with no contributions yet.
    pub fn new(key: ObjectKey, table: Arc<Table>, status: EntityStatus) -> Self {
        Self {
            key,
            table,
            status,
            pk: Vec::new(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
            relation_ids: Vec::new(),
            secondary: Vec::new(),
            bulk: Vec::new(),
            custom: None,
        }
    }

    /// Set the known primary-key values.
    pub fn pk(mut self, values: Vec<Value>) -> Self {
        self.pk = values;
        self
    }

    /// Add a column value.
    pub fn column(mut self, name: impl Into<String>, value: Value) -> Self {
        self.columns.push((name.into(), value));
        self
    }

    /// Point a foreign key at another instance.
    pub fn foreign_key(mut self, fk: impl Into<String>, target: ObjectKey) -> Self {
        self.foreign_keys.push((fk.into(), Some(target)));
        self
    }

    /// Null a foreign key.
    pub fn null_foreign_key(mut self, fk: impl Into<String>) -> Self {
        self.foreign_keys.push((fk.into(), None));
        self
    }

    /// Point a relation-id column at another instance.
    pub fn relation_id(mut self, column: impl Into<String>, target: ObjectKey) -> Self {
        self.relation_ids.push((column.into(), target));
        self
    }

    /// Attach a secondary-table operation.
    pub fn secondary(mut self, op: SecondaryOp) -> Self {
        self.secondary.push(op);
        self
    }

    /// Attach a bulk operation.
    pub fn bulk(mut self, op: BulkOp) -> Self {
        self.bulk.push(op);
        self
    }

    /// Attach custom statements.
    pub fn custom(mut self, op: CustomOp) -> Self {
        self.custom = Some(op);
        self
    }
}
