//! Schema metadata descriptors.
//!
//! These types describe the relational shape the engine plans against:
//! which table an entity maps to, its primary-key columns, and the foreign
//! keys that create flush-order dependencies. They are *consumed* metadata,
//! built once by the mapping layer and shared read-only (as `Arc<Table>`)
//! across concurrent flushes.

/// A single table column.
#[derive(Debug, Clone)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Whether the column carries a NOT NULL constraint.
    pub not_null: bool,
    /// Table this column logically references, for relation-id columns:
    /// single columns holding another row's (possibly auto-assigned)
    /// identifier without a declared database foreign key.
    pub relation_target: Option<String>,
}

impl Column {
    /// Create a nullable column with no relation target.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            not_null: false,
            relation_target: None,
        }
    }

    /// Set the NOT NULL constraint.
    pub fn not_null(mut self, value: bool) -> Self {
        self.not_null = value;
        self
    }

    /// Mark this as a relation-id column pointing at the given table.
    pub fn relation_to(mut self, table: impl Into<String>) -> Self {
        self.relation_target = Some(table.into());
        self
    }
}

/// A foreign-key constraint from this table to another table's primary key.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    /// Constraint name, unique within the owning table.
    pub name: String,
    /// Referencing columns, in the order of the target's primary key.
    pub columns: Vec<String>,
    /// Table whose primary key is referenced.
    pub target_table: String,
    /// Whether the constraint is deferred (checked at commit, not per
    /// statement).
    pub deferred: bool,
    /// Whether this is a logical relation only, with no database-level
    /// constraint backing it.
    pub logical: bool,
    /// Whether any of the referencing columns is NOT NULL. A foreign key
    /// with a NOT NULL column cannot be broken by nulling it.
    pub not_null: bool,
}

impl ForeignKey {
    /// Create a nullable, synchronous, database-backed foreign key.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        target_table: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            target_table: target_table.into(),
            deferred: false,
            logical: false,
            not_null: false,
        }
    }

    /// Convenience constructor for the common single-column case.
    pub fn single(
        name: impl Into<String>,
        column: impl Into<String>,
        target_table: impl Into<String>,
    ) -> Self {
        Self::new(name, vec![column.into()], target_table)
    }

    /// Set whether the constraint is deferred.
    pub fn deferred(mut self, value: bool) -> Self {
        self.deferred = value;
        self
    }

    /// Set whether the relation is logical only.
    pub fn logical(mut self, value: bool) -> Self {
        self.logical = value;
        self
    }

    /// Set whether any referencing column is NOT NULL.
    pub fn not_null(mut self, value: bool) -> Self {
        self.not_null = value;
        self
    }

    /// Whether the referencing columns can be set to NULL.
    pub fn is_nullable(&self) -> bool {
        !self.not_null
    }
}

/// A table an entity (or part of one) maps to.
#[derive(Debug, Clone)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// All columns.
    pub columns: Vec<Column>,
    /// Primary-key column names, in key order.
    pub primary_key: Vec<String>,
    /// Foreign keys owned by this table.
    pub foreign_keys: Vec<ForeignKey>,
    /// Secondary tables join to a primary table and are never the target of
    /// a foreign key, so their deletes are always safe to flush first and
    /// their updates last.
    pub secondary: bool,
    /// Whether the primary key is assigned by the database on insert.
    pub auto_assign: bool,
}

impl Table {
    /// Create an empty primary table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            secondary: false,
            auto_assign: false,
        }
    }

    /// Add a column.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary-key column names.
    pub fn primary_key(mut self, columns: Vec<String>) -> Self {
        self.primary_key = columns;
        self
    }

    /// Add a foreign key.
    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Mark this as a secondary table.
    pub fn secondary(mut self, value: bool) -> Self {
        self.secondary = value;
        self
    }

    /// Mark the primary key as database-assigned.
    pub fn auto_assign(mut self, value: bool) -> Self {
        self.auto_assign = value;
        self
    }

    /// Look up a foreign key by constraint name.
    pub fn find_foreign_key(&self, name: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.name == name)
    }

    /// Look up a column by name.
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Relation-id columns: single-column logical references to another
    /// table's identifier.
    pub fn relation_id_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.relation_target.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hero_table() -> Table {
        Table::new("heroes")
            .column(Column::new("id").not_null(true))
            .column(Column::new("name").not_null(true))
            .column(Column::new("team_id"))
            .column(Column::new("mentor_id").relation_to("heroes"))
            .primary_key(vec!["id".into()])
            .foreign_key(ForeignKey::single("fk_team", "team_id", "teams"))
            .auto_assign(true)
    }

    #[test]
    fn test_find_foreign_key() {
        let table = hero_table();
        let fk = table.find_foreign_key("fk_team").unwrap();
        assert_eq!(fk.target_table, "teams");
        assert_eq!(fk.columns, vec!["team_id".to_string()]);
        assert!(fk.is_nullable());
        assert!(table.find_foreign_key("fk_missing").is_none());
    }

    #[test]
    fn test_not_null_fk_is_not_nullable() {
        let fk = ForeignKey::single("fk", "col", "t").not_null(true);
        assert!(!fk.is_nullable());
    }

    #[test]
    fn test_relation_id_columns() {
        let table = hero_table();
        let rels: Vec<&str> = table
            .relation_id_columns()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(rels, vec!["mentor_id"]);
    }

    #[test]
    fn test_secondary_flag() {
        let table = Table::new("hero_names").secondary(true);
        assert!(table.secondary);
        assert!(!table.auto_assign);
    }
}
