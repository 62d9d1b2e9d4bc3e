//! Dynamic SQL values.

use serde::{Deserialize, Serialize};

/// A dynamically-typed SQL value.
///
/// This enum represents the values a persistence layer binds as statement
/// parameters: primary keys, column values, and foreign-key values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 16-bit signed integer
    SmallInt(i16),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Date (days since epoch)
    Date(i32),

    /// Timestamp (microseconds since epoch)
    Timestamp(i64),

    /// UUID (as 16 bytes)
    Uuid([u8; 16]),

    /// JSON value
    Json(serde_json::Value),

    /// SQL DEFAULT keyword
    Default,
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
            Value::Default => "DEFAULT",
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::SmallInt(v) => Some(f64::from(*v)),
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Hash this value into the given hasher.
    ///
    /// Each variant is tagged with a discriminant byte so that, for example,
    /// `Int(0)` and `Bool(false)` never collide. Floats hash by bit pattern.
    /// Used to derive identity hashes for entity keys; stable for a given
    /// value.
    pub fn hash_into(&self, hasher: &mut impl std::hash::Hasher) {
        use std::hash::Hash;

        match self {
            Value::Null => 0u8.hash(hasher),
            Value::Bool(b) => {
                1u8.hash(hasher);
                b.hash(hasher);
            }
            Value::SmallInt(i) => {
                2u8.hash(hasher);
                i.hash(hasher);
            }
            Value::Int(i) => {
                3u8.hash(hasher);
                i.hash(hasher);
            }
            Value::BigInt(i) => {
                4u8.hash(hasher);
                i.hash(hasher);
            }
            Value::Double(f) => {
                5u8.hash(hasher);
                f.to_bits().hash(hasher);
            }
            Value::Decimal(s) => {
                6u8.hash(hasher);
                s.hash(hasher);
            }
            Value::Text(s) => {
                7u8.hash(hasher);
                s.hash(hasher);
            }
            Value::Bytes(b) => {
                8u8.hash(hasher);
                b.hash(hasher);
            }
            Value::Date(d) => {
                9u8.hash(hasher);
                d.hash(hasher);
            }
            Value::Timestamp(ts) => {
                10u8.hash(hasher);
                ts.hash(hasher);
            }
            Value::Uuid(u) => {
                11u8.hash(hasher);
                u.hash(hasher);
            }
            Value::Json(j) => {
                12u8.hash(hasher);
                j.to_string().hash(hasher);
            }
            Value::Default => 13u8.hash(hasher),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::Hasher;

    fn hash_of(v: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        v.hash_into(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_is_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int(0).is_null());
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::BigInt(1).type_name(), "BIGINT");
        assert_eq!(Value::Text("x".into()).type_name(), "TEXT");
        assert_eq!(Value::Null.type_name(), "NULL");
    }

    #[test]
    fn test_as_i64_conversions() {
        assert_eq!(Value::SmallInt(3).as_i64(), Some(3));
        assert_eq!(Value::Int(42).as_i64(), Some(42));
        assert_eq!(Value::BigInt(i64::MAX).as_i64(), Some(i64::MAX));
        assert_eq!(Value::Text("7".into()).as_i64(), None);
    }

    #[test]
    fn test_hash_is_stable() {
        let a = Value::Text("hello".into());
        let b = Value::Text("hello".into());
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_hash_discriminates_variants() {
        // Same bit pattern, different variant: must not collide.
        assert_ne!(hash_of(&Value::Int(0)), hash_of(&Value::Bool(false)));
        assert_ne!(hash_of(&Value::Date(5)), hash_of(&Value::Int(5)));
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(Some(7_i64)), Value::BigInt(7));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }
}
