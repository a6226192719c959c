//! Association accessors.
//!
//! Each descriptor stores a static [`AssociationOps`] table chosen by its
//! kind at registration. [`AssociationHandle`] dispatches through it, so
//! unsupported operations (adding to a `many_to_one`, setting a
//! `one_to_many`) are rejected without inspecting the kind at call time.

use crate::augment::{Scope, augment};
use crate::config::AbortPolicy;
use crate::descriptor::AssociationDescriptor;
use crate::eager;
use crate::include::{DatasetHook, Include};
use crate::kind::AssociationKind;
use crate::options::MutationHook;
use crate::registry::Registry;
use crate::relation::Dataset;
use relgraph_core::{
    AssociationValue, CallbackAbort, ConfigurationError, Error, Key, RecordRef, Result,
    same_record,
};
use relgraph_query::{Expr, JoinType, RowSource};
use std::fmt;
use std::sync::Arc;

/// Arguments of one cache mutation.
pub(crate) struct Mutation<'a> {
    pub(crate) name: &'a str,
    pub(crate) reciprocal: Option<&'a str>,
    pub(crate) owner: &'a RecordRef,
    pub(crate) other: Option<&'a RecordRef>,
}

pub(crate) type MutateFn = fn(&Mutation<'_>);

/// Per-kind dispatch table.
pub struct AssociationOps {
    pub(crate) kind: AssociationKind,
    pub(crate) set: Option<MutateFn>,
    pub(crate) add: Option<MutateFn>,
    pub(crate) remove: Option<MutateFn>,
}

impl fmt::Debug for AssociationOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationOps")
            .field("kind", &self.kind)
            .field("set", &self.set.is_some())
            .field("add", &self.add.is_some())
            .field("remove", &self.remove.is_some())
            .finish()
    }
}

static MANY_TO_ONE_OPS: AssociationOps = AssociationOps {
    kind: AssociationKind::ManyToOne,
    set: Some(set_scalar),
    add: None,
    remove: None,
};

static ONE_TO_ONE_OPS: AssociationOps = AssociationOps {
    kind: AssociationKind::OneToOne,
    set: Some(set_scalar),
    add: None,
    remove: None,
};

static ONE_TO_MANY_OPS: AssociationOps = AssociationOps {
    kind: AssociationKind::OneToMany,
    set: None,
    add: Some(add_to_list),
    remove: Some(remove_from_list),
};

static MANY_TO_MANY_OPS: AssociationOps = AssociationOps {
    kind: AssociationKind::ManyToMany,
    set: None,
    add: Some(add_to_list),
    remove: Some(remove_from_list),
};

pub(crate) fn ops_for(kind: AssociationKind) -> &'static AssociationOps {
    match kind {
        AssociationKind::ManyToOne => &MANY_TO_ONE_OPS,
        AssociationKind::OneToOne => &ONE_TO_ONE_OPS,
        AssociationKind::OneToMany => &ONE_TO_MANY_OPS,
        AssociationKind::ManyToMany => &MANY_TO_MANY_OPS,
    }
}

fn set_scalar(m: &Mutation<'_>) {
    if let (Some(reciprocal), Some(previous)) = (m.reciprocal, m.owner.association(m.name)) {
        if let Some(old) = previous.one() {
            if m.other.is_none_or(|new| !same_record(&old, new)) {
                unlink_back(&old, reciprocal, m.owner);
            }
        }
    }
    m.owner
        .set_association(m.name, AssociationValue::from(m.other.cloned()));
    if let (Some(reciprocal), Some(child)) = (m.reciprocal, m.other) {
        child.set_association(reciprocal, AssociationValue::Back(Arc::downgrade(m.owner)));
    }
}

// Only touches a list that has been loaded; an unloaded cache stays unset.
fn add_to_list(m: &Mutation<'_>) {
    let Some(child) = m.other else { return };
    if let Some(AssociationValue::Many(mut list)) = m.owner.association(m.name) {
        if !list.iter().any(|r| same_record(r, child)) {
            list.push(Arc::clone(child));
            m.owner
                .set_association(m.name, AssociationValue::Many(list));
        }
    }
    if let Some(reciprocal) = m.reciprocal {
        child.set_association(reciprocal, AssociationValue::Back(Arc::downgrade(m.owner)));
    }
}

fn remove_from_list(m: &Mutation<'_>) {
    let Some(child) = m.other else { return };
    if let Some(AssociationValue::Many(mut list)) = m.owner.association(m.name) {
        list.retain(|r| !same_record(r, child));
        m.owner
            .set_association(m.name, AssociationValue::Many(list));
    }
    if let Some(reciprocal) = m.reciprocal {
        unlink_back(child, reciprocal, m.owner);
    }
}

fn unlink_back(child: &RecordRef, reciprocal: &str, owner: &RecordRef) {
    let points_at_owner = child
        .association(reciprocal)
        .and_then(|v| v.one())
        .is_some_and(|r| same_record(&r, owner));
    if points_at_owner {
        child.set_association(reciprocal, AssociationValue::None);
    }
}

/// Options for [`AssociationHandle::load`].
#[derive(Clone, Default)]
pub struct LoadOptions {
    /// Query again even if the association is cached.
    pub reload: bool,
    /// Reshape the association dataset for this call. A filtered result
    /// is returned but not cached.
    pub filter: Option<DatasetHook>,
}

impl LoadOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `reload` option (builder pattern).
    #[must_use]
    pub fn reload(mut self, value: bool) -> Self {
        self.reload = value;
        self
    }

    /// Set the per-call filter (builder pattern).
    #[must_use]
    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(Dataset) -> Dataset + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("reload", &self.reload)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// Accessor for one association, obtained from
/// [`Registry::association`](crate::Registry::association).
#[derive(Clone)]
pub struct AssociationHandle {
    registry: Registry,
    descriptor: Arc<AssociationDescriptor>,
}

impl AssociationHandle {
    pub(crate) fn new(registry: Registry, descriptor: Arc<AssociationDescriptor>) -> Self {
        Self {
            registry,
            descriptor,
        }
    }

    pub fn descriptor(&self) -> &Arc<AssociationDescriptor> {
        &self.descriptor
    }

    fn check_owner(&self, record: &RecordRef) -> Result<()> {
        let owner = self.descriptor.owner();
        if record.model().name() == owner.name() {
            Ok(())
        } else {
            Err(self.config_error(format!(
                "expected a {} record, got {}",
                owner.name(),
                record.model().name()
            )))
        }
    }

    fn config_error(&self, message: String) -> Error {
        ConfigurationError::new(message)
            .model(self.descriptor.owner().name())
            .association(self.descriptor.name())
            .into()
    }

    /// Cached value, or `None` when the association has not been loaded.
    pub fn get(&self, record: &RecordRef) -> Option<AssociationValue> {
        record.association(self.descriptor.name())
    }

    /// Load the association for one record.
    ///
    /// A cached value is returned as is, without querying, unless
    /// `options.reload` or `options.filter` is given.
    #[tracing::instrument(level = "debug", skip(self, record, source, options), fields(association = %self.descriptor.name()))]
    pub fn load(
        &self,
        record: &RecordRef,
        source: &dyn RowSource,
        options: LoadOptions,
    ) -> Result<AssociationValue> {
        self.check_owner(record)?;
        if !options.reload && options.filter.is_none() {
            if let Some(cached) = self.get(record) {
                tracing::trace!("association cached; no query");
                return Ok(cached);
            }
        }

        let mut include = Include::new(self.descriptor.name());
        include.filter = options.filter.clone();
        let roots = [Arc::clone(record)];
        let staged = eager::fetch_association(
            &self.registry,
            &self.descriptor,
            &roots,
            &include,
            source,
        )?;
        if options.filter.is_some() {
            return Ok(staged.value(0));
        }
        staged.commit();
        Ok(self.get(record).unwrap_or(AssociationValue::None))
    }

    /// The association's dataset for one record.
    pub fn dataset(&self, record: &RecordRef) -> Result<Dataset> {
        self.check_owner(record)?;
        let keys = self.registry.finalize(&self.descriptor)?;
        let owner_key = record.key_of(keys.owner_keys());
        let matching: Vec<Key> = if owner_key.has_null() {
            Vec::new()
        } else {
            vec![owner_key]
        };

        let target = keys.target();
        let mut ds = self.registry.dataset(target.name())?;
        match keys.join_table() {
            Some(join) => {
                let on = Expr::all(join.right_keys.iter().zip(keys.target_keys()).map(
                    |(jk, tk)| {
                        Expr::qualified(&join.table, jk).eq(Expr::qualified(target.table_name(), tk))
                    },
                ))
                .unwrap_or_else(|| Expr::lit(false));
                let left: Vec<Expr> = join
                    .left_keys
                    .iter()
                    .map(|c| Expr::qualified(&join.table, c))
                    .collect();
                ds = ds
                    .select_columns(target.column_names().iter().cloned())
                    .join_table(JoinType::Inner, &join.table, on, None)?
                    .filter(Expr::key_in(left, &matching));
            }
            None => {
                ds = ds.filter(Expr::key_in(keys.qualified_target_keys().to_vec(), &matching));
            }
        }
        Ok(augment(&self.descriptor, ds, &[], Scope::Single))
    }

    /// Set a scalar association in the cache.
    pub fn set(&self, record: &RecordRef, value: Option<RecordRef>) -> Result<bool> {
        let hooks = self.descriptor.options().callbacks();
        self.mutate(
            "set",
            self.descriptor.ops.set,
            &hooks.before_set,
            &hooks.after_set,
            ("before_set", record, value.as_ref()),
        )
    }

    /// Add a record to a loaded collection association.
    pub fn add(&self, record: &RecordRef, child: &RecordRef) -> Result<bool> {
        let hooks = self.descriptor.options().callbacks();
        self.mutate(
            "add",
            self.descriptor.ops.add,
            &hooks.before_add,
            &hooks.after_add,
            ("before_add", record, Some(child)),
        )
    }

    /// Remove a record from a loaded collection association.
    pub fn remove(&self, record: &RecordRef, child: &RecordRef) -> Result<bool> {
        let hooks = self.descriptor.options().callbacks();
        self.mutate(
            "remove",
            self.descriptor.ops.remove,
            &hooks.before_remove,
            &hooks.after_remove,
            ("before_remove", record, Some(child)),
        )
    }

    fn mutate(
        &self,
        op_name: &str,
        op: Option<MutateFn>,
        before: &[MutationHook],
        after: &[MutationHook],
        (hook_name, owner, other): (&'static str, &RecordRef, Option<&RecordRef>),
    ) -> Result<bool> {
        let op = op.ok_or_else(|| {
            self.config_error(format!(
                "{} associations do not support {}",
                self.descriptor.kind(),
                op_name
            ))
        })?;
        self.check_owner(owner)?;
        if let Some(other) = other {
            let target = self.descriptor.target_name();
            if other.model().name() != target {
                return Err(self.config_error(format!(
                    "expected a {} record, got {}",
                    target,
                    other.model().name()
                )));
            }
        }

        if before.iter().any(|hook| !hook(owner, other)) {
            tracing::debug!(
                association = %self.descriptor.name(),
                hook = hook_name,
                "association change vetoed"
            );
            return match self.registry.config().abort_policy {
                AbortPolicy::Raise => Err(Error::CallbackAbort(CallbackAbort {
                    association: self.descriptor.name().to_string(),
                    hook: hook_name,
                })),
                AbortPolicy::ReturnFalse => Ok(false),
            };
        }

        let reciprocal = if self.descriptor.kind().sets_reciprocal() {
            self.registry.reciprocal(&self.descriptor)?
        } else {
            None
        };
        op(&Mutation {
            name: self.descriptor.name(),
            reciprocal: reciprocal.as_ref().map(|r| r.name()),
            owner,
            other,
        });

        for hook in after {
            hook(owner, other);
        }
        Ok(true)
    }
}

impl fmt::Debug for AssociationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationHandle")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::options::AssociationOptions;
    use relgraph_core::{ModelDef, Row, Value};
    use relgraph_query::MemoryDatabase;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry(config: EngineConfig) -> Registry {
        let registry = Registry::with_config(config);
        registry
            .register_model(ModelDef::new("Album").columns(["id", "band_id"]))
            .unwrap();
        registry
            .register_model(ModelDef::new("Track").columns(["id", "album_id"]))
            .unwrap();
        registry
            .register_model(ModelDef::new("Band").columns(["id"]))
            .unwrap();
        registry
    }

    fn record(registry: &Registry, model: &str, pairs: &[(&str, i64)]) -> RecordRef {
        let model = registry.model(model).unwrap();
        let row = Row::from_pairs(pairs.iter().map(|(k, v)| (*k, Value::BigInt(*v))));
        model.instantiate(row).unwrap()
    }

    fn db() -> MemoryDatabase {
        MemoryDatabase::new()
            .with_table(
                "tracks",
                ["id", "album_id"],
                vec![
                    vec![Value::Int(10), Value::Int(1)],
                    vec![Value::Int(11), Value::Int(1)],
                ],
            )
            .with_table("bands", ["id"], vec![vec![Value::Int(2)]])
    }

    #[test]
    fn test_load_is_idempotent() {
        let registry = registry(EngineConfig::default());
        registry
            .associate(
                "Album",
                AssociationKind::OneToMany,
                "tracks",
                AssociationOptions::new(),
            )
            .unwrap();
        let handle = registry.association("Album", "tracks").unwrap();
        let album = record(&registry, "Album", &[("id", 1), ("band_id", 2)]);
        let db = db();

        assert!(handle.get(&album).is_none());
        let first = handle.load(&album, &db, LoadOptions::new()).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(db.query_count(), 1);

        let second = handle.load(&album, &db, LoadOptions::new()).unwrap();
        assert!(second.same_as(&first));
        assert_eq!(db.query_count(), 1);

        handle
            .load(&album, &db, LoadOptions::new().reload(true))
            .unwrap();
        assert_eq!(db.query_count(), 2);
    }

    #[test]
    fn test_filtered_load_is_not_cached() {
        let registry = registry(EngineConfig::default());
        registry
            .associate(
                "Album",
                AssociationKind::OneToMany,
                "tracks",
                AssociationOptions::new(),
            )
            .unwrap();
        let handle = registry.association("Album", "tracks").unwrap();
        let album = record(&registry, "Album", &[("id", 1), ("band_id", 2)]);
        let db = db();

        let filtered = handle
            .load(
                &album,
                &db,
                LoadOptions::new().filter(|ds| ds.where_eq("id", 11i64)),
            )
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert!(handle.get(&album).is_none());
    }

    #[test]
    fn test_scalar_dataset_limits_to_one() {
        let registry = registry(EngineConfig::default());
        registry
            .associate(
                "Album",
                AssociationKind::ManyToOne,
                "band",
                AssociationOptions::new(),
            )
            .unwrap();
        let handle = registry.association("Album", "band").unwrap();
        let album = record(&registry, "Album", &[("id", 1), ("band_id", 2)]);
        let ds = handle.dataset(&album).unwrap();
        assert_eq!(ds.query().limit, Some(1));
        let (sql, _) = ds.to_sql();
        assert!(sql.contains("\"bands\".\"id\" IN ($1)"));
    }

    #[test]
    fn test_unsupported_operation() {
        let registry = registry(EngineConfig::default());
        registry
            .associate(
                "Album",
                AssociationKind::ManyToOne,
                "band",
                AssociationOptions::new(),
            )
            .unwrap();
        let handle = registry.association("Album", "band").unwrap();
        let album = record(&registry, "Album", &[("id", 1), ("band_id", 2)]);
        let band = record(&registry, "Band", &[("id", 2)]);
        let err = handle.add(&album, &band).unwrap_err();
        assert!(err.is_configuration());
        assert!(handle.set(&album, Some(band)).unwrap());
    }

    #[test]
    fn test_set_with_reciprocal_writes_back_reference() {
        let registry = registry(EngineConfig::default());
        registry
            .associate(
                "Album",
                AssociationKind::OneToOne,
                "first_track",
                AssociationOptions::new().target("Track"),
            )
            .unwrap();
        registry
            .associate(
                "Track",
                AssociationKind::ManyToOne,
                "album",
                AssociationOptions::new(),
            )
            .unwrap();
        let handle = registry.association("Album", "first_track").unwrap();
        let album = record(&registry, "Album", &[("id", 1), ("band_id", 2)]);
        let track = record(&registry, "Track", &[("id", 10), ("album_id", 1)]);

        handle.set(&album, Some(Arc::clone(&track))).unwrap();
        let back = track.association("album").and_then(|v| v.one()).unwrap();
        assert!(same_record(&back, &album));

        handle.set(&album, None).unwrap();
        assert!(track.association("album").unwrap().is_none());
        assert!(handle.get(&album).unwrap().is_none());
    }

    #[test]
    fn test_add_and_remove_on_loaded_list() {
        let registry = registry(EngineConfig::default());
        registry
            .associate(
                "Album",
                AssociationKind::OneToMany,
                "tracks",
                AssociationOptions::new(),
            )
            .unwrap();
        let handle = registry.association("Album", "tracks").unwrap();
        let album = record(&registry, "Album", &[("id", 1), ("band_id", 2)]);
        let track = record(&registry, "Track", &[("id", 12), ("album_id", 1)]);

        // Not loaded: the cache stays unset.
        assert!(handle.add(&album, &track).unwrap());
        assert!(handle.get(&album).is_none());

        album.set_association("tracks", AssociationValue::Many(Vec::new()));
        handle.add(&album, &track).unwrap();
        handle.add(&album, &track).unwrap();
        assert_eq!(handle.get(&album).unwrap().len(), 1);

        handle.remove(&album, &track).unwrap();
        assert_eq!(handle.get(&album).unwrap().len(), 0);
    }

    #[test]
    fn test_before_hook_abort_policies() {
        let calls = Arc::new(AtomicUsize::new(0));
        let after_calls = Arc::clone(&calls);
        let options = AssociationOptions::new()
            .before_add(|_, _| false)
            .after_add(move |_, _| {
                after_calls.fetch_add(1, Ordering::SeqCst);
                true
            });

        let strict = registry(EngineConfig::default());
        strict
            .associate("Album", AssociationKind::OneToMany, "tracks", options.clone())
            .unwrap();
        let handle = strict.association("Album", "tracks").unwrap();
        let album = record(&strict, "Album", &[("id", 1), ("band_id", 2)]);
        let track = record(&strict, "Track", &[("id", 12), ("album_id", 1)]);
        album.set_association("tracks", AssociationValue::Many(Vec::new()));

        let err = handle.add(&album, &track).unwrap_err();
        assert!(err.is_callback_abort());
        assert!(handle.get(&album).unwrap().is_empty());

        let lenient = registry(EngineConfig::default().abort_policy(AbortPolicy::ReturnFalse));
        lenient
            .associate("Album", AssociationKind::OneToMany, "tracks", options)
            .unwrap();
        let handle = lenient.association("Album", "tracks").unwrap();
        let album = record(&lenient, "Album", &[("id", 1), ("band_id", 2)]);
        album.set_association("tracks", AssociationValue::Many(Vec::new()));
        assert!(!handle.add(&album, &track).unwrap());
        assert!(handle.get(&album).unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wrong_record_model() {
        let registry = registry(EngineConfig::default());
        registry
            .associate(
                "Album",
                AssociationKind::OneToMany,
                "tracks",
                AssociationOptions::new(),
            )
            .unwrap();
        let handle = registry.association("Album", "tracks").unwrap();
        let band = record(&registry, "Band", &[("id", 2)]);
        let err = handle.load(&band, &db(), LoadOptions::new()).unwrap_err();
        assert!(err.is_configuration());
    }
}
