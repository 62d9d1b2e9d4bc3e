//! Primary-key value registry.

use rowplan_core::{ObjectKey, Value};
use std::collections::HashMap;

/// Maps entity identities to their primary-key values for one flush.
///
/// Seeded from the dirty states whose keys are already known, then extended
/// as auto-assign inserts execute and the database hands back generated
/// keys. Statements that reference another row (foreign keys, deferred
/// fix-up updates) resolve their bound values here at render time, which is
/// what lets a fix-up update "set the FK back once the target has been
/// inserted and its primary key is known".
#[derive(Debug, Default)]
pub struct KeyRegistry {
    keys: HashMap<ObjectKey, Vec<Value>>,
}

impl KeyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the primary-key values for an entity.
    pub fn record(&mut self, key: ObjectKey, values: Vec<Value>) {
        self.keys.insert(key, values);
    }

    /// Resolve an entity's primary-key values, if assigned.
    pub fn resolve(&self, key: ObjectKey) -> Option<&[Value]> {
        self.keys.get(&key).map(Vec::as_slice)
    }

    /// Whether the entity's primary key is known.
    pub fn contains(&self, key: ObjectKey) -> bool {
        self.keys.contains_key(&key)
    }
}
