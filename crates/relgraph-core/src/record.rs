//! The record capability consumed by the loaders.
//!
//! The engine only needs three things from a record: its model, column
//! values (for keys), and an association cache it can read and write.
//! Records are shared as [`RecordRef`] so that the same logical row seen
//! twice within one load is the *same* object, not an equal copy.

use crate::key::Key;
use crate::model::ModelDef;
use crate::row::Row;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Shared handle to a record.
pub type RecordRef = Arc<dyn Record>;

/// A record whose associations the engine can populate.
pub trait Record: fmt::Debug + Send + Sync {
    /// The record's kind.
    fn model(&self) -> &Arc<ModelDef>;

    /// Column value by name. `None` when the record has no such column.
    fn get(&self, column: &str) -> Option<Value>;

    /// Cached value for an association, or `None` when unset.
    fn association(&self, name: &str) -> Option<AssociationValue>;

    /// Replace the cached value for an association.
    fn set_association(&self, name: &str, value: AssociationValue);

    /// Remove a single cached association, returning it to "unset".
    fn unset_association(&self, name: &str);

    /// Forget every cached association (refresh / reload).
    fn clear_associations(&self);

    /// Values of `columns`, in order. Missing columns read as NULL.
    fn key_of(&self, columns: &[String]) -> Key {
        Key::new(
            columns
                .iter()
                .map(|c| self.get(c).unwrap_or(Value::Null))
                .collect(),
        )
    }

    /// The primary key, or `None` if the model has none or any component
    /// is NULL.
    fn primary_key(&self) -> Option<Key> {
        let columns = self.model().primary_key_columns();
        if columns.is_empty() {
            return None;
        }
        let key = self.key_of(columns);
        (!key.has_null()).then_some(key)
    }
}

/// A populated association cache entry.
#[derive(Clone)]
pub enum AssociationValue {
    /// Loaded, and there is no associated record.
    None,
    /// A single associated record.
    One(RecordRef),
    /// A reciprocal back-reference to a parent. Held weakly so a loaded
    /// parent/child graph does not keep itself alive.
    Back(Weak<dyn Record>),
    /// An ordered collection of associated records.
    Many(Vec<RecordRef>),
}

impl AssociationValue {
    pub fn is_none(&self) -> bool {
        matches!(self, AssociationValue::None)
    }

    pub fn is_many(&self) -> bool {
        matches!(self, AssociationValue::Many(_))
    }

    /// The single associated record. Back-references are upgraded; a
    /// dropped parent reads as `None`.
    pub fn one(&self) -> Option<RecordRef> {
        match self {
            AssociationValue::One(r) => Some(Arc::clone(r)),
            AssociationValue::Back(w) => w.upgrade(),
            AssociationValue::None | AssociationValue::Many(_) => None,
        }
    }

    /// The associated collection, if this is one.
    pub fn many(&self) -> Option<&[RecordRef]> {
        match self {
            AssociationValue::Many(v) => Some(v),
            _ => None,
        }
    }

    /// Number of associated records (0 or 1 for scalar values).
    pub fn len(&self) -> usize {
        match self {
            AssociationValue::Many(v) => v.len(),
            other => usize::from(other.one().is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every associated record as a list.
    pub fn records(&self) -> Vec<RecordRef> {
        match self {
            AssociationValue::Many(v) => v.clone(),
            other => other.one().into_iter().collect(),
        }
    }

    /// Whether two cache values refer to the same records (by identity).
    pub fn same_as(&self, other: &AssociationValue) -> bool {
        match (self, other) {
            (AssociationValue::None, AssociationValue::None) => true,
            (AssociationValue::Many(a), AssociationValue::Many(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same_record(x, y))
            }
            (AssociationValue::Many(_), _) | (_, AssociationValue::Many(_)) => false,
            (a, b) => match (a.one(), b.one()) {
                (Some(x), Some(y)) => same_record(&x, &y),
                _ => false,
            },
        }
    }
}

impl From<Option<RecordRef>> for AssociationValue {
    fn from(value: Option<RecordRef>) -> Self {
        match value {
            Some(r) => AssociationValue::One(r),
            None => AssociationValue::None,
        }
    }
}

impl From<Vec<RecordRef>> for AssociationValue {
    fn from(value: Vec<RecordRef>) -> Self {
        AssociationValue::Many(value)
    }
}

// Records are printed as `Model(pk)` so cyclic graphs do not recurse.
impl fmt::Debug for AssociationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssociationValue::None => write!(f, "None"),
            AssociationValue::One(r) => write!(f, "One({})", describe(r.as_ref())),
            AssociationValue::Back(w) => match w.upgrade() {
                Some(r) => write!(f, "Back({})", describe(r.as_ref())),
                None => write!(f, "Back(<dropped>)"),
            },
            AssociationValue::Many(v) => f
                .debug_list()
                .entries(v.iter().map(|r| DescribeRecord(r.as_ref())))
                .finish(),
        }
    }
}

struct DescribeRecord<'a>(&'a dyn Record);

impl fmt::Debug for DescribeRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe(self.0))
    }
}

fn describe(record: &dyn Record) -> String {
    let pk = record
        .primary_key()
        .map(|k| {
            k.values()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    format!("{}({})", record.model().name(), pk)
}

/// Address of the record's data, used as an identity token.
pub fn record_addr(record: &RecordRef) -> usize {
    Arc::as_ptr(record).cast::<()>() as usize
}

/// Identity comparison (same object, not equal values).
pub fn same_record(a: &RecordRef, b: &RecordRef) -> bool {
    record_addr(a) == record_addr(b)
}

/// The default record: a model, a row of column values, and an
/// association cache.
pub struct Instance {
    model: Arc<ModelDef>,
    row: Row,
    associations: Mutex<HashMap<String, AssociationValue>>,
}

impl Instance {
    pub fn new(model: Arc<ModelDef>, row: Row) -> Self {
        Self {
            model,
            row,
            associations: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying row.
    pub fn row(&self) -> &Row {
        &self.row
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, AssociationValue>> {
        match self.associations.lock() {
            Ok(guard) => guard,
            // A panic while holding the lock cannot leave the map itself
            // half-written, so keep using it.
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Record for Instance {
    fn model(&self) -> &Arc<ModelDef> {
        &self.model
    }

    fn get(&self, column: &str) -> Option<Value> {
        self.row.get_by_name(column).cloned()
    }

    fn association(&self, name: &str) -> Option<AssociationValue> {
        self.cache().get(name).cloned()
    }

    fn set_association(&self, name: &str, value: AssociationValue) {
        self.cache().insert(name.to_string(), value);
    }

    fn unset_association(&self, name: &str) {
        self.cache().remove(name);
    }

    fn clear_associations(&self) {
        self.cache().clear();
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cached: Vec<String> = self.cache().keys().cloned().collect();
        cached.sort();
        f.debug_struct("Instance")
            .field("model", &self.model.name())
            .field("values", &self.row.iter().collect::<Vec<_>>())
            .field("cached_associations", &cached)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn album_model() -> Arc<ModelDef> {
        Arc::new(ModelDef::new("Album").columns(["id", "band_id"]))
    }

    fn album(id: i64, band_id: Option<i64>) -> RecordRef {
        let model = album_model();
        Arc::new(Instance::new(
            model,
            Row::from_pairs([("id", Value::from(id)), ("band_id", Value::from(band_id))]),
        ))
    }

    #[test]
    fn primary_key_reads_declared_columns() {
        let a = album(1, Some(2));
        assert_eq!(a.primary_key(), Some(Key::single(1i64)));
        assert_eq!(
            a.key_of(&["band_id".to_string()]),
            Key::single(Value::BigInt(2))
        );
    }

    #[test]
    fn primary_key_absent_without_declaration() {
        let model = Arc::new(ModelDef::new("Tag").columns(["name"]).without_primary_key());
        let tag = Instance::new(model, Row::from_pairs([("name", "rock")]));
        assert_eq!(tag.primary_key(), None);
    }

    #[test]
    fn cache_set_get_clear() {
        let a = album(1, None);
        assert!(a.association("tracks").is_none());

        a.set_association("tracks", AssociationValue::Many(vec![]));
        let cached = a.association("tracks").unwrap();
        assert!(cached.is_many());
        assert!(cached.is_empty());

        a.set_association("band", AssociationValue::None);
        a.unset_association("band");
        assert!(a.association("band").is_none());

        a.clear_associations();
        assert!(a.association("tracks").is_none());
    }

    #[test]
    fn back_reference_does_not_keep_parent_alive() {
        let child = album(2, None);
        {
            let parent = album(1, None);
            child.set_association("parent", AssociationValue::Back(Arc::downgrade(&parent)));
            let up = child.association("parent").unwrap().one().unwrap();
            assert!(same_record(&up, &parent));
        }
        assert!(child.association("parent").unwrap().one().is_none());
    }

    #[test]
    fn identity_is_by_object_not_value() {
        let a = album(1, None);
        let b = album(1, None);
        assert!(same_record(&a, &Arc::clone(&a)));
        assert!(!same_record(&a, &b));

        let one = AssociationValue::One(Arc::clone(&a));
        assert!(one.same_as(&AssociationValue::One(Arc::clone(&a))));
        assert!(!one.same_as(&AssociationValue::One(b)));
    }

    #[test]
    fn debug_is_shallow() {
        let a = album(1, None);
        let b = album(2, None);
        a.set_association("next", AssociationValue::One(Arc::clone(&b)));
        b.set_association("prev", AssociationValue::Back(Arc::downgrade(&a)));
        let text = format!("{:?}", a.association("next").unwrap());
        assert_eq!(text, "One(Album(2))");
    }
}
