//! Entity identity keys.
//!
//! An [`ObjectKey`] identifies one logical entity instance for the duration
//! of a flush. It is used as a graph-node identity and as a map key wherever
//! pending rows cross-reference each other (foreign-key targets, the
//! delete-then-insert replacement map, the generated-key registry).
//!
//! Keys are small `Copy` values built from hashes so they stay cheap to pass
//! through the dependency graph; the actual primary-key values live in the
//! engine's key registry.

use crate::value::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Identity of one entity instance within a flush.
///
/// Two keys are equal when they name the same logical row of the same table.
/// New instances whose primary key has not been assigned yet (auto-assign
/// inserts) get a distinct identity via [`ObjectKey::unassigned`]; the same
/// `(table, serial)` pair always yields the same key, so callers can hand
/// out stable identities before the database generates the real key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Hash of the owning table name.
    class: u64,
    /// Hash of the identifying values (or the unassigned serial).
    ident: u64,
}

impl ObjectKey {
    /// Build a key from a table name and its primary-key values.
    pub fn from_pk(table: &str, pk: &[Value]) -> Self {
        let mut hasher = DefaultHasher::new();
        for v in pk {
            v.hash_into(&mut hasher);
        }
        Self {
            class: hash_class(table),
            ident: hasher.finish(),
        }
    }

    /// Build a stable key for a new instance with no primary key yet.
    ///
    /// `serial` must be unique per pending new instance within one flush
    /// (a per-session counter works). The serial domain is tagged so it can
    /// never collide with a `from_pk` identity of the same table.
    pub fn unassigned(table: &str, serial: u64) -> Self {
        let mut hasher = DefaultHasher::new();
        // Domain tag keeps unassigned serials apart from real pk hashes.
        UNASSIGNED_TAG.hash(&mut hasher);
        serial.hash(&mut hasher);
        Self {
            class: hash_class(table),
            ident: hasher.finish(),
        }
    }

    /// Check whether this key belongs to the given table.
    pub fn is_class_of(&self, table: &str) -> bool {
        self.class == hash_class(table)
    }
}

fn hash_class(table: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    table.hash(&mut hasher);
    hasher.finish()
}

const UNASSIGNED_TAG: u8 = 0xA5;
