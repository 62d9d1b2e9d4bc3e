//! Pending DML rows.
//!
//! A [`PendingRow`] is one planned INSERT, UPDATE, or DELETE against one
//! table for one logical entity instance. Rows accumulate column and
//! foreign-key contributions while a flush is being populated, get linked
//! into the dependency graphs, and are finally rendered to SQL text plus
//! bound parameters.
//!
//! Value maps are mutated only before the graphs are built (cycle
//! resolution may still clear a foreign key it defers); the action never
//! changes after creation.

use crate::keys::KeyRegistry;
use rowplan_core::{Dialect, Error, ObjectKey, Result, Table, Value};
use std::sync::Arc;

/// The DML action a pending row performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowAction {
    /// INSERT a new row.
    Insert,
    /// UPDATE an existing row.
    Update,
    /// DELETE an existing row.
    Delete,
}

/// Rendered SQL text plus bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// The statement text, with dialect placeholders.
    pub sql: String,
    /// Bound parameter values, in placeholder order.
    pub params: Vec<Value>,
}

impl Statement {
    /// Create a statement.
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// One pending DML statement against one table.
#[derive(Debug, Clone)]
pub struct PendingRow {
    table: Arc<Table>,
    action: RowAction,
    /// The owning entity's identity; `None` for all-row, secondary, and
    /// synthetic fix-up rows.
    primary_key: Option<ObjectKey>,
    /// Entity whose primary-key columns form the WHERE clause.
    pk_where: Option<ObjectKey>,
    /// Plain column values to SET (insert/update).
    sets: Vec<(String, Value)>,
    /// Plain column conditions for the WHERE clause.
    wheres: Vec<(String, Value)>,
    /// Foreign keys being set to point at another row (`None` = SET NULL).
    fk_sets: Vec<(String, Option<ObjectKey>)>,
    /// Foreign keys used only as WHERE conditions.
    fk_wheres: Vec<(String, ObjectKey)>,
    /// Relation-id columns being set to another row's identifier.
    rel_sets: Vec<(String, ObjectKey)>,
    valid: bool,
    dependent: bool,
    flushed: bool,
    /// Entity blamed when this row's UPDATE/DELETE affects zero rows.
    failed_entity: Option<ObjectKey>,
}

impl PendingRow {
    /// Create a pending row.
    pub fn new(table: Arc<Table>, action: RowAction, primary_key: Option<ObjectKey>) -> Self {
        Self {
            table,
            action,
            primary_key,
            pk_where: None,
            sets: Vec::new(),
            wheres: Vec::new(),
            fk_sets: Vec::new(),
            fk_wheres: Vec::new(),
            rel_sets: Vec::new(),
            valid: true,
            dependent: false,
            flushed: false,
            failed_entity: None,
        }
    }

    /// The target table.
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// The DML action; fixed at creation.
    pub fn action(&self) -> RowAction {
        self.action
    }

    /// The owning entity's identity, if any.
    pub fn primary_key(&self) -> Option<ObjectKey> {
        self.primary_key
    }

    /// Whether the row is still live. Invalidated rows were subsumed (e.g.
    /// an insert cancelled by a delete in the same flush) and are skipped in
    /// every phase.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Mark the row live or subsumed.
    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    /// Whether the row was linked into a dependency graph. Dependent rows
    /// are flushed by the graph walk, so the generic passes skip them.
    pub fn is_dependent(&self) -> bool {
        self.dependent
    }

    /// Mark the row as graph-linked.
    pub fn set_dependent(&mut self, dependent: bool) {
        self.dependent = dependent;
    }

    /// Whether the row's SQL has been executed.
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Mark the row as executed.
    pub fn set_flushed(&mut self, flushed: bool) {
        self.flushed = flushed;
    }

    /// Entity blamed for a zero-rows-affected failure, if known.
    pub fn failed_entity(&self) -> Option<ObjectKey> {
        self.failed_entity
    }

    /// Set the entity blamed for a zero-rows-affected failure.
    pub fn set_failed_entity(&mut self, entity: ObjectKey) {
        self.failed_entity = Some(entity);
    }

    /// Set a plain column value; a later set for the same column replaces
    /// the earlier one.
    pub fn set_column(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.sets.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.sets.push((name, value));
        }
    }

    /// Add a plain WHERE condition.
    pub fn where_column(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.wheres.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.wheres.push((name, value));
        }
    }

    /// Key the WHERE clause by the given entity's primary-key columns.
    pub fn where_primary_key(&mut self, key: ObjectKey) {
        self.pk_where = Some(key);
    }

    /// Entity whose primary key forms the WHERE clause, if any.
    pub fn pk_where(&self) -> Option<ObjectKey> {
        self.pk_where
    }

    /// Set a foreign key to point at the given entity.
    pub fn set_foreign_key(&mut self, fk: impl Into<String>, target: ObjectKey) {
        self.put_fk_set(fk.into(), Some(target));
    }

    /// Set a foreign key's columns to NULL.
    pub fn null_foreign_key(&mut self, fk: impl Into<String>) {
        self.put_fk_set(fk.into(), None);
    }

    fn put_fk_set(&mut self, fk: String, target: Option<ObjectKey>) {
        if let Some(slot) = self.fk_sets.iter_mut().find(|(n, _)| *n == fk) {
            slot.1 = target;
        } else {
            self.fk_sets.push((fk, target));
        }
    }

    /// The entity a foreign key is being set to point at, if any.
    pub fn fk_set_target(&self, fk: &str) -> Option<ObjectKey> {
        self.fk_sets
            .iter()
            .find(|(n, _)| n == fk)
            .and_then(|(_, t)| *t)
    }

    /// Remove a foreign key from the SET side entirely.
    ///
    /// Used when a dependency cycle is broken: the deferred value moves to
    /// a fix-up update and the original statement leaves the columns NULL.
    pub fn clear_foreign_key(&mut self, fk: &str) {
        self.fk_sets.retain(|(n, _)| n != fk);
    }

    /// Add a foreign-key WHERE condition against the given entity.
    pub fn where_foreign_key(&mut self, fk: impl Into<String>, target: ObjectKey) {
        let fk = fk.into();
        if let Some(slot) = self.fk_wheres.iter_mut().find(|(n, _)| *n == fk) {
            slot.1 = target;
        } else {
            self.fk_wheres.push((fk, target));
        }
    }

    /// The entity a foreign-key WHERE condition matches, if any.
    pub fn fk_where_target(&self, fk: &str) -> Option<ObjectKey> {
        self.fk_wheres
            .iter()
            .find(|(n, _)| n == fk)
            .map(|(_, t)| *t)
    }

    /// Remove a foreign-key WHERE condition.
    ///
    /// When a fix-up update nulls a foreign key before a delete, the delete
    /// must stop matching on the value that was just nulled.
    pub fn clear_foreign_key_where(&mut self, fk: &str) {
        self.fk_wheres.retain(|(n, _)| n != fk);
    }

    /// Set a relation-id column to the given entity's identifier.
    pub fn set_relation_id(&mut self, column: impl Into<String>, target: ObjectKey) {
        let column = column.into();
        if let Some(slot) = self.rel_sets.iter_mut().find(|(n, _)| *n == column) {
            slot.1 = target;
        } else {
            self.rel_sets.push((column, target));
        }
    }

    /// The entity a relation-id column points at, if any.
    pub fn relation_id_target(&self, column: &str) -> Option<ObjectKey> {
        self.rel_sets
            .iter()
            .find(|(n, _)| n == column)
            .map(|(_, t)| *t)
    }

    /// Remove a relation-id column from the SET side.
    pub fn clear_relation_id(&mut self, column: &str) {
        self.rel_sets.retain(|(n, _)| n != column);
    }

    /// Copy this row's WHERE conditions into a synthetic update row.
    pub fn copy_where_into(&self, other: &mut PendingRow) {
        other.pk_where = self.pk_where;
        for (name, value) in &self.wheres {
            other.where_column(name.clone(), value.clone());
        }
        for (fk, target) in &self.fk_wheres {
            other.where_foreign_key(fk.clone(), *target);
        }
    }

    /// Whether rendering this row would produce a meaningful statement.
    /// An UPDATE with nothing left to set (all its foreign keys deferred)
    /// is skipped rather than rendered.
    pub fn has_work(&self) -> bool {
        match self.action {
            RowAction::Insert | RowAction::Delete => true,
            RowAction::Update => {
                !self.sets.is_empty() || !self.fk_sets.is_empty() || !self.rel_sets.is_empty()
            }
        }
    }

    /// Whether executing this row must read back a database-generated key.
    pub fn wants_generated_key(&self, keys: &KeyRegistry) -> bool {
        self.action == RowAction::Insert
            && self.table.auto_assign
            && self.primary_key.is_some_and(|k| !keys.contains(k))
    }

    /// Render this row to SQL text plus bound parameters.
    ///
    /// Foreign-key and primary-key values resolve through the registry; a
    /// reference to a row whose key is still unassigned at render time means
    /// the planner failed to order a dependency and is reported as an
    /// internal error.
    pub fn to_statement(&self, keys: &KeyRegistry, dialect: Dialect) -> Result<Statement> {
        match self.action {
            RowAction::Insert => self.render_insert(keys, dialect),
            RowAction::Update => self.render_update(keys, dialect),
            RowAction::Delete => self.render_delete(keys, dialect),
        }
    }

    /// Collect `(column, value)` pairs for the SET side, resolving foreign
    /// keys and relation ids through the registry.
    fn set_entries(&self, keys: &KeyRegistry) -> Result<Vec<(String, Value)>> {
        let mut entries: Vec<(String, Value)> = Vec::new();
        for (name, value) in &self.sets {
            entries.push((name.clone(), value.clone()));
        }
        for (name, target) in &self.fk_sets {
            let fk = self.table.find_foreign_key(name).ok_or_else(|| {
                Error::config(format!(
                    "table {} has no foreign key named {name}",
                    self.table.name
                ))
            })?;
            match target {
                None => {
                    for col in &fk.columns {
                        entries.push((col.clone(), Value::Null));
                    }
                }
                Some(target) => {
                    let values = keys.resolve(*target).ok_or_else(|| {
                        Error::Internal(format!(
                            "foreign key {name} on {} references a row with no assigned \
                             primary key",
                            self.table.name
                        ))
                    })?;
                    if values.len() != fk.columns.len() {
                        return Err(Error::config(format!(
                            "foreign key {name} on {} spans {} columns but its target \
                             key has {} values",
                            self.table.name,
                            fk.columns.len(),
                            values.len()
                        )));
                    }
                    for (col, value) in fk.columns.iter().zip(values) {
                        entries.push((col.clone(), value.clone()));
                    }
                }
            }
        }
        for (name, target) in &self.rel_sets {
            let values = keys.resolve(*target).ok_or_else(|| {
                Error::Internal(format!(
                    "relation id {name} on {} references a row with no assigned primary key",
                    self.table.name
                ))
            })?;
            if values.len() != 1 {
                return Err(Error::config(format!(
                    "relation id {name} on {} requires a single-column key",
                    self.table.name
                )));
            }
            entries.push((name.clone(), values[0].clone()));
        }
        Ok(entries)
    }

    /// Collect `(column, value)` pairs for the WHERE side.
    fn where_entries(&self, keys: &KeyRegistry) -> Result<Vec<(String, Value)>> {
        let mut entries: Vec<(String, Value)> = Vec::new();
        if let Some(key) = self.pk_where {
            let values = keys.resolve(key).ok_or_else(|| {
                Error::Internal(format!(
                    "{} row on {} is keyed by a primary key that was never assigned",
                    action_name(self.action),
                    self.table.name
                ))
            })?;
            if values.len() != self.table.primary_key.len() {
                return Err(Error::config(format!(
                    "table {} has {} primary-key columns but its key has {} values",
                    self.table.name,
                    self.table.primary_key.len(),
                    values.len()
                )));
            }
            for (col, value) in self.table.primary_key.iter().zip(values) {
                entries.push((col.clone(), value.clone()));
            }
        }
        for (name, value) in &self.wheres {
            entries.push((name.clone(), value.clone()));
        }
        for (name, target) in &self.fk_wheres {
            let fk = self.table.find_foreign_key(name).ok_or_else(|| {
                Error::config(format!(
                    "table {} has no foreign key named {name}",
                    self.table.name
                ))
            })?;
            let values = keys.resolve(*target).ok_or_else(|| {
                Error::Internal(format!(
                    "foreign-key condition {name} on {} references a row with no \
                     assigned primary key",
                    self.table.name
                ))
            })?;
            if values.len() != fk.columns.len() {
                return Err(Error::config(format!(
                    "foreign key {name} on {} spans {} columns but its target key has \
                     {} values",
                    self.table.name,
                    fk.columns.len(),
                    values.len()
                )));
            }
            for (col, value) in fk.columns.iter().zip(values) {
                entries.push((col.clone(), value.clone()));
            }
        }
        Ok(entries)
    }

    fn render_insert(&self, keys: &KeyRegistry, dialect: Dialect) -> Result<Statement> {
        let mut entries: Vec<(String, Value)> = Vec::new();
        if let Some(key) = self.primary_key {
            if let Some(values) = keys.resolve(key) {
                if values.len() != self.table.primary_key.len() {
                    return Err(Error::config(format!(
                        "table {} has {} primary-key columns but its key has {} values",
                        self.table.name,
                        self.table.primary_key.len(),
                        values.len()
                    )));
                }
                for (col, value) in self.table.primary_key.iter().zip(values) {
                    entries.push((col.clone(), value.clone()));
                }
            } else if !self.table.auto_assign {
                return Err(Error::Internal(format!(
                    "insert into {} has no primary-key values and the table does not \
                     auto-assign them",
                    self.table.name
                )));
            }
        }
        entries.extend(self.set_entries(keys)?);

        let mut params: Vec<Value> = Vec::with_capacity(entries.len());
        let columns: Vec<String> = entries.iter().map(|(n, _)| format!("\"{n}\"")).collect();
        let placeholders: Vec<String> = entries
            .iter()
            .map(|(_, v)| {
                params.push(v.clone());
                dialect.placeholder(params.len())
            })
            .collect();
        let sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            self.table.name,
            columns.join(", "),
            placeholders.join(", ")
        );
        Ok(Statement::new(sql, params))
    }

    fn render_update(&self, keys: &KeyRegistry, dialect: Dialect) -> Result<Statement> {
        let sets = self.set_entries(keys)?;
        let mut params: Vec<Value> = Vec::new();
        let set_clause: Vec<String> = sets
            .iter()
            .map(|(name, value)| {
                params.push(value.clone());
                format!("\"{}\" = {}", name, dialect.placeholder(params.len()))
            })
            .collect();
        let mut sql = format!(
            "UPDATE \"{}\" SET {}",
            self.table.name,
            set_clause.join(", ")
        );
        push_where(&mut sql, &mut params, &self.where_entries(keys)?, dialect);
        Ok(Statement::new(sql, params))
    }

    fn render_delete(&self, keys: &KeyRegistry, dialect: Dialect) -> Result<Statement> {
        let mut params: Vec<Value> = Vec::new();
        let mut sql = format!("DELETE FROM \"{}\"", self.table.name);
        push_where(&mut sql, &mut params, &self.where_entries(keys)?, dialect);
        Ok(Statement::new(sql, params))
    }
}

/// Append a WHERE clause; NULL conditions render as `IS NULL`.
fn push_where(
    sql: &mut String,
    params: &mut Vec<Value>,
    entries: &[(String, Value)],
    dialect: Dialect,
) {
    if entries.is_empty() {
        return;
    }
    let clauses: Vec<String> = entries
        .iter()
        .map(|(name, value)| {
            if value.is_null() {
                format!("\"{name}\" IS NULL")
            } else {
                params.push(value.clone());
                format!("\"{}\" = {}", name, dialect.placeholder(params.len()))
            }
        })
        .collect();
    sql.push_str(" WHERE ");
    sql.push_str(&clauses.join(" AND "));
}

fn action_name(action: RowAction) -> &'static str {
    match action {
        RowAction::Insert => "insert",
        RowAction::Update => "update",
        RowAction::Delete => "delete",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowplan_core::{Column, ForeignKey};

    fn teams() -> Arc<Table> {
        Arc::new(
            Table::new("teams")
                .column(Column::new("id").not_null(true))
                .column(Column::new("name").not_null(true))
                .primary_key(vec!["id".into()]),
        )
    }

    fn heroes() -> Arc<Table> {
        Arc::new(
            Table::new("heroes")
                .column(Column::new("id").not_null(true))
                .column(Column::new("name").not_null(true))
                .column(Column::new("team_id"))
                .primary_key(vec!["id".into()])
                .foreign_key(ForeignKey::single("fk_team", "team_id", "teams")),
        )
    }

    fn registry_with(entries: &[(ObjectKey, i64)]) -> KeyRegistry {
        let mut keys = KeyRegistry::new();
        for (key, id) in entries {
            keys.record(*key, vec![Value::BigInt(*id)]);
        }
        keys
    }

    #[test]
    fn test_render_insert_with_fk() {
        let team_key = ObjectKey::from_pk("teams", &[Value::BigInt(1)]);
        let hero_key = ObjectKey::from_pk("heroes", &[Value::BigInt(10)]);
        let keys = registry_with(&[(team_key, 1), (hero_key, 10)]);

        let mut row = PendingRow::new(heroes(), RowAction::Insert, Some(hero_key));
        row.set_column("name", Value::Text("Spider-Man".into()));
        row.set_foreign_key("fk_team", team_key);

        let st = row.to_statement(&keys, Dialect::Postgres).unwrap();
        assert_eq!(
            st.sql,
            "INSERT INTO \"heroes\" (\"id\", \"name\", \"team_id\") VALUES ($1, $2, $3)"
        );
        assert_eq!(
            st.params,
            vec![
                Value::BigInt(10),
                Value::Text("Spider-Man".into()),
                Value::BigInt(1)
            ]
        );
    }

    #[test]
    fn test_render_insert_null_fk() {
        let hero_key = ObjectKey::from_pk("heroes", &[Value::BigInt(10)]);
        let keys = registry_with(&[(hero_key, 10)]);

        let mut row = PendingRow::new(heroes(), RowAction::Insert, Some(hero_key));
        row.null_foreign_key("fk_team");

        let st = row.to_statement(&keys, Dialect::Postgres).unwrap();
        assert_eq!(
            st.sql,
            "INSERT INTO \"heroes\" (\"id\", \"team_id\") VALUES ($1, $2)"
        );
        assert_eq!(st.params, vec![Value::BigInt(10), Value::Null]);
    }

    #[test]
    fn test_render_update_keyed_by_pk() {
        let hero_key = ObjectKey::from_pk("heroes", &[Value::BigInt(10)]);
        let keys = registry_with(&[(hero_key, 10)]);

        let mut row = PendingRow::new(heroes(), RowAction::Update, Some(hero_key));
        row.where_primary_key(hero_key);
        row.set_column("name", Value::Text("Peter".into()));

        let st = row.to_statement(&keys, Dialect::Postgres).unwrap();
        assert_eq!(
            st.sql,
            "UPDATE \"heroes\" SET \"name\" = $1 WHERE \"id\" = $2"
        );
        assert_eq!(st.params, vec![Value::Text("Peter".into()), Value::BigInt(10)]);
    }

    #[test]
    fn test_render_delete_with_null_where() {
        let hero_key = ObjectKey::from_pk("heroes", &[Value::BigInt(10)]);
        let keys = registry_with(&[(hero_key, 10)]);

        let mut row = PendingRow::new(heroes(), RowAction::Delete, Some(hero_key));
        row.where_primary_key(hero_key);
        row.where_column("team_id", Value::Null);

        let st = row.to_statement(&keys, Dialect::Postgres).unwrap();
        assert_eq!(
            st.sql,
            "DELETE FROM \"heroes\" WHERE \"id\" = $1 AND \"team_id\" IS NULL"
        );
        assert_eq!(st.params, vec![Value::BigInt(10)]);
    }

    #[test]
    fn test_unresolved_fk_target_is_internal_error() {
        let hero_key = ObjectKey::from_pk("heroes", &[Value::BigInt(10)]);
        let dangling = ObjectKey::unassigned("teams", 0);
        let keys = registry_with(&[(hero_key, 10)]);

        let mut row = PendingRow::new(heroes(), RowAction::Insert, Some(hero_key));
        row.set_foreign_key("fk_team", dangling);

        let err = row.to_statement(&keys, Dialect::Postgres).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_auto_assign_insert_omits_pk() {
        let table = Arc::new(
            Table::new("teams")
                .column(Column::new("id").not_null(true))
                .column(Column::new("name"))
                .primary_key(vec!["id".into()])
                .auto_assign(true),
        );
        let key = ObjectKey::unassigned("teams", 0);
        let keys = KeyRegistry::new();

        let mut row = PendingRow::new(table, RowAction::Insert, Some(key));
        row.set_column("name", Value::Text("Avengers".into()));

        assert!(row.wants_generated_key(&keys));
        let st = row.to_statement(&keys, Dialect::Postgres).unwrap();
        assert_eq!(st.sql, "INSERT INTO \"teams\" (\"name\") VALUES ($1)");
    }

    #[test]
    fn test_set_column_replaces_existing() {
        let mut row = PendingRow::new(teams(), RowAction::Update, None);
        row.set_column("name", Value::Text("a".into()));
        row.set_column("name", Value::Text("b".into()));

        let st = row
            .to_statement(&KeyRegistry::new(), Dialect::Postgres)
            .unwrap();
        assert_eq!(st.sql, "UPDATE \"teams\" SET \"name\" = $1");
        assert_eq!(st.params, vec![Value::Text("b".into())]);
    }

    #[test]
    fn test_clear_foreign_key_defers_columns() {
        let team_key = ObjectKey::from_pk("teams", &[Value::BigInt(1)]);
        let mut row = PendingRow::new(heroes(), RowAction::Update, None);
        row.set_foreign_key("fk_team", team_key);
        assert!(row.has_work());

        row.clear_foreign_key("fk_team");
        assert!(row.fk_set_target("fk_team").is_none());
        assert!(!row.has_work());
    }

    #[test]
    fn test_copy_where_into() {
        let hero_key = ObjectKey::from_pk("heroes", &[Value::BigInt(10)]);
        let team_key = ObjectKey::from_pk("teams", &[Value::BigInt(1)]);
        let mut delete = PendingRow::new(heroes(), RowAction::Delete, Some(hero_key));
        delete.where_primary_key(hero_key);
        delete.where_foreign_key("fk_team", team_key);

        let mut update = PendingRow::new(heroes(), RowAction::Update, None);
        delete.copy_where_into(&mut update);

        assert_eq!(update.pk_where(), Some(hero_key));
        assert_eq!(update.fk_where_target("fk_team"), Some(team_key));
    }

    #[test]
    fn test_sqlite_placeholders() {
        let hero_key = ObjectKey::from_pk("heroes", &[Value::BigInt(10)]);
        let keys = registry_with(&[(hero_key, 10)]);
        let mut row = PendingRow::new(heroes(), RowAction::Delete, Some(hero_key));
        row.where_primary_key(hero_key);

        let st = row.to_statement(&keys, Dialect::Sqlite).unwrap();
        assert_eq!(st.sql, "DELETE FROM \"heroes\" WHERE \"id\" = ?1");
    }
}
