//! Hashable key tuples.
//!
//! A [`Key`] is the ordered tuple of values used to match rows to records:
//! grouping keys in the batch loader, identity keys in the graph assembler,
//! primary keys on records. Integer widths are normalized so a key read as
//! `Int(1)` from one table matches `BigInt(1)` read from another.

use crate::value::Value;
use std::hash::{Hash, Hasher};

/// An ordered, possibly composite, key value.
#[derive(Debug, Clone)]
pub struct Key(Vec<Value>);

impl Key {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// A single-column key.
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if any component is NULL. Such keys never match anything.
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }

    /// True if every component is NULL (or the key is empty).
    pub fn all_null(&self) -> bool {
        self.0.iter().all(Value::is_null)
    }

    /// The key as a single value: the scalar for one column, a JSON array
    /// for composite keys. Used for logging and `Expr` literals.
    pub fn as_scalar(&self) -> Option<&Value> {
        match self.0.as_slice() {
            [single] => Some(single),
            _ => None,
        }
    }
}

impl From<Vec<Value>> for Key {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|(a, b)| component_eq(a, b))
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for v in &self.0 {
            hash_component(v, state);
        }
    }
}

// Structural equality with integer widths normalized. Unlike SQL, NULL
// equals NULL here so fallback identity keys with null columns still
// deduplicate.
fn component_eq(a: &Value, b: &Value) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        (Some(_), None) | (None, Some(_)) => false,
        (None, None) => match (a, b) {
            (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
            _ => a == b,
        },
    }
}

fn hash_component<H: Hasher>(v: &Value, state: &mut H) {
    if let Some(i) = v.as_i64() {
        2u8.hash(state);
        i.hash(state);
        return;
    }
    match v {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Double(f) => {
            3u8.hash(state);
            f.to_bits().hash(state);
        }
        Value::Decimal(s) => {
            4u8.hash(state);
            s.hash(state);
        }
        Value::Text(s) => {
            5u8.hash(state);
            s.hash(state);
        }
        Value::Bytes(b) => {
            6u8.hash(state);
            b.hash(state);
        }
        Value::Date(d) => {
            7u8.hash(state);
            d.hash(state);
        }
        Value::Timestamp(t) => {
            8u8.hash(state);
            t.hash(state);
        }
        Value::Uuid(u) => {
            9u8.hash(state);
            u.hash(state);
        }
        Value::Json(j) => {
            10u8.hash(state);
            j.to_string().hash(state);
        }
        Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn integer_widths_hash_alike() {
        let mut index: HashMap<Key, &str> = HashMap::new();
        index.insert(Key::single(Value::Int(1)), "album");
        assert_eq!(index.get(&Key::single(Value::BigInt(1))), Some(&"album"));
        assert_eq!(index.get(&Key::single(Value::SmallInt(1))), Some(&"album"));
        assert_eq!(index.get(&Key::single(Value::BigInt(2))), None);
    }

    #[test]
    fn composite_keys_compare_in_order() {
        let ab = Key::new(vec![Value::Int(5), Value::from("x")]);
        let ba = Key::new(vec![Value::from("x"), Value::Int(5)]);
        assert_ne!(ab, ba);
        assert_eq!(ab, Key::new(vec![Value::BigInt(5), Value::from("x")]));
    }

    #[test]
    fn null_detection() {
        let partial = Key::new(vec![Value::Int(5), Value::Null]);
        assert!(partial.has_null());
        assert!(!partial.all_null());
        assert!(Key::new(vec![Value::Null, Value::Null]).all_null());
        assert!(!Key::single(1i64).has_null());
    }

    #[test]
    fn nulls_are_structurally_equal() {
        let a = Key::new(vec![Value::Null, Value::from("t")]);
        let b = Key::new(vec![Value::Null, Value::from("t")]);
        assert_eq!(a, b);
    }
}
