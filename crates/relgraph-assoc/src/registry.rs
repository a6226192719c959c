//! The association registry.
//!
//! Holds every registered model and, per owner model, its associations in
//! declaration order. Registration validates eagerly and leaves the
//! registry untouched on failure. Derived descriptor fields are finalized
//! lazily under one registry-wide lock.

use crate::access::{AssociationHandle, ops_for};
use crate::config::EngineConfig;
use crate::descriptor::{AssociationDescriptor, ResolvedKeys, resolve_keys};
use crate::kind::{AssociationKind, EagerLimitStrategy};
use crate::options::AssociationOptions;
use crate::relation::Dataset;
use relgraph_core::{
    ConfigurationError, Error, ModelDef, Result, UndefinedAssociationError, validate_identifier,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct RegistryInner {
    config: EngineConfig,
    models: RwLock<HashMap<String, Arc<ModelDef>>>,
    associations: RwLock<HashMap<String, Vec<Arc<AssociationDescriptor>>>>,
    finalize_lock: Mutex<()>,
}

/// Registry of models and their associations.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn check_explicit_arity(
    owner: &str,
    name: &str,
    left: Option<&Vec<String>>,
    right: Option<&Vec<String>>,
) -> Result<()> {
    if let (Some(l), Some(r)) = (left, right) {
        if l.len() != r.len() {
            return Err(ConfigurationError::new(format!(
                "key arity mismatch: {:?} has {} column(s), {:?} has {}",
                l,
                l.len(),
                r,
                r.len()
            ))
            .model(owner)
            .association(name)
            .into());
        }
    }
    Ok(())
}

impl Registry {
    /// Create an empty registry with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an empty registry with `config`.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                models: RwLock::new(HashMap::new()),
                associations: RwLock::new(HashMap::new()),
                finalize_lock: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ==================== Models ====================

    /// Register a model. Names must be unique.
    pub fn register_model(&self, model: ModelDef) -> Result<Arc<ModelDef>> {
        model.validate()?;
        let mut models = write(&self.inner.models);
        if models.contains_key(model.name()) {
            return Err(ConfigurationError::new("model is already registered")
                .model(model.name())
                .into());
        }
        let model = Arc::new(model);
        models.insert(model.name().to_string(), Arc::clone(&model));
        tracing::debug!(model = %model.name(), table = %model.table_name(), "registered model");
        Ok(model)
    }

    pub fn model(&self, name: &str) -> Option<Arc<ModelDef>> {
        read(&self.inner.models).get(name).cloned()
    }

    fn require_model(&self, name: &str) -> Result<Arc<ModelDef>> {
        self.model(name)
            .ok_or_else(|| ConfigurationError::new("model is not registered").model(name).into())
    }

    /// A dataset over every row of `model`.
    pub fn dataset(&self, model: &str) -> Result<Dataset> {
        Ok(Dataset::new(self.clone(), self.require_model(model)?))
    }

    // ==================== Associations ====================

    /// Declare an association on `owner`.
    ///
    /// Fails with a configuration error, leaving the registry unchanged,
    /// if the name is malformed or taken, explicit composite keys differ in
    /// length, the clone source is missing or of an incompatible kind, or
    /// an option does not apply to `kind`.
    #[tracing::instrument(level = "debug", skip(self, options))]
    pub fn associate(
        &self,
        owner: &str,
        kind: AssociationKind,
        name: &str,
        options: AssociationOptions,
    ) -> Result<Arc<AssociationDescriptor>> {
        let owner_model = self.require_model(owner)?;
        validate_identifier("association name", name)?;
        let err = |message: String| -> Error {
            ConfigurationError::new(message)
                .model(owner)
                .association(name)
                .into()
        };

        let options = match options.clone.clone() {
            Some(source_name) => {
                let source = self.resolve(owner, &source_name).ok_or_else(|| {
                    err(format!("cannot clone unknown association '{}'", source_name))
                })?;
                if !kind.can_clone_from(source.kind()) {
                    return Err(err(format!(
                        "cannot clone {} association '{}' as {}",
                        source.kind(),
                        source_name,
                        kind
                    )));
                }
                options.overlay(source.options())
            }
            None => options,
        };

        let key_lists = [
            &options.keys,
            &options.primary_keys,
            &options.left_keys,
            &options.left_primary_keys,
            &options.right_keys,
            &options.right_primary_keys,
            &options.eager_loader_key,
        ];
        for columns in key_lists.into_iter().flatten() {
            if columns.is_empty() {
                return Err(err("key column list is empty".to_string()));
            }
            for column in columns {
                validate_identifier("key column", column)?;
            }
        }
        check_explicit_arity(owner, name, options.keys.as_ref(), options.primary_keys.as_ref())?;
        check_explicit_arity(
            owner,
            name,
            options.left_keys.as_ref(),
            options.left_primary_keys.as_ref(),
        )?;
        check_explicit_arity(
            owner,
            name,
            options.right_keys.as_ref(),
            options.right_primary_keys.as_ref(),
        )?;

        let m2m_only = options.join_table.is_some()
            || options.left_keys.is_some()
            || options.left_primary_keys.is_some()
            || options.right_keys.is_some()
            || options.right_primary_keys.is_some();
        if kind == AssociationKind::ManyToMany {
            if options.keys.is_some() || options.primary_keys.is_some() {
                return Err(err(
                    "many_to_many uses left/right keys, not keys/primary_keys".to_string(),
                ));
            }
        } else if m2m_only {
            return Err(err(format!("join table options do not apply to {}", kind)));
        }
        if let Some(table) = &options.join_table {
            validate_identifier("join table", table)?;
        }
        if options.eager_limit_strategy == Some(EagerLimitStrategy::DistinctOn)
            && kind != AssociationKind::OneToOne
        {
            return Err(err(format!(
                "the distinct_on eager limit strategy requires one_to_one, not {}",
                kind
            )));
        }
        if let Some(alias) = &options.graph_alias_base {
            validate_identifier("graph alias", alias)?;
        }

        let descriptor = Arc::new(AssociationDescriptor::new(
            kind,
            name.to_string(),
            owner_model,
            options,
            ops_for(kind),
        ));

        let mut associations = write(&self.inner.associations);
        let list = associations.entry(owner.to_string()).or_default();
        if list.iter().any(|d| d.name() == name) {
            return Err(err("association is already defined".to_string()));
        }
        list.push(Arc::clone(&descriptor));
        tracing::debug!(model = %owner, association = %name, kind = %kind, "registered association");
        Ok(descriptor)
    }

    /// Like [`associate`](Self::associate) with the kind given by name
    /// (`"many_to_one"`, `"one_to_many"`, `"one_to_one"`, `"many_to_many"`).
    pub fn register(
        &self,
        owner: &str,
        kind: &str,
        name: &str,
        options: AssociationOptions,
    ) -> Result<Arc<AssociationDescriptor>> {
        let kind: AssociationKind = kind.parse()?;
        self.associate(owner, kind, name, options)
    }

    pub fn resolve(&self, owner: &str, name: &str) -> Option<Arc<AssociationDescriptor>> {
        read(&self.inner.associations)
            .get(owner)
            .and_then(|list| list.iter().find(|d| d.name() == name))
            .cloned()
    }

    /// Resolve an association for eager loading.
    pub(crate) fn resolve_eager(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Arc<AssociationDescriptor>> {
        match self.resolve(owner, name) {
            Some(d) if d.options().eager_allowed() => Ok(d),
            found => Err(Error::UndefinedAssociation(UndefinedAssociationError {
                model: owner.to_string(),
                association: name.to_string(),
                eager_disallowed: found.is_some(),
            })),
        }
    }

    /// Every association of `owner`, in declaration order.
    pub fn all_associations(&self, owner: &str) -> Vec<Arc<AssociationDescriptor>> {
        read(&self.inner.associations)
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }

    /// Accessor for one association of `owner`.
    pub fn association(&self, owner: &str, name: &str) -> Result<AssociationHandle> {
        let descriptor = self.resolve(owner, name).ok_or_else(|| {
            Error::UndefinedAssociation(UndefinedAssociationError {
                model: owner.to_string(),
                association: name.to_string(),
                eager_disallowed: false,
            })
        })?;
        Ok(AssociationHandle::new(self.clone(), descriptor))
    }

    // ==================== Finalization ====================

    /// Resolved keys of `descriptor`, computing them on first use.
    ///
    /// Failures are not memoized, so registering a missing model and
    /// retrying succeeds.
    pub fn finalize<'a>(&self, descriptor: &'a AssociationDescriptor) -> Result<&'a ResolvedKeys> {
        if let Some(keys) = descriptor.resolved.get() {
            return Ok(keys);
        }
        let _guard = lock(&self.inner.finalize_lock);
        self.finalize_locked(descriptor)
    }

    // Caller holds the finalize lock.
    fn finalize_locked<'a>(
        &self,
        descriptor: &'a AssociationDescriptor,
    ) -> Result<&'a ResolvedKeys> {
        if let Some(keys) = descriptor.resolved.get() {
            return Ok(keys);
        }
        let keys = {
            let models = read(&self.inner.models);
            resolve_keys(descriptor, &models)?
        };
        Ok(descriptor.resolved.get_or_init(|| keys))
    }

    /// The reciprocal association of `descriptor` on its target, if any.
    ///
    /// An explicit `reciprocal` option is used as given. Otherwise the
    /// target's associations are scanned for the structural mirror; the
    /// outcome, including "none", is memoized.
    pub fn reciprocal(
        &self,
        descriptor: &AssociationDescriptor,
    ) -> Result<Option<Arc<AssociationDescriptor>>> {
        let name = match descriptor.reciprocal.get() {
            Some(name) => name.clone(),
            None => {
                let _guard = lock(&self.inner.finalize_lock);
                match descriptor.reciprocal.get() {
                    Some(name) => name.clone(),
                    None => {
                        let found = self.find_reciprocal_locked(descriptor)?;
                        descriptor.reciprocal.get_or_init(|| found).clone()
                    }
                }
            }
        };
        Ok(name.and_then(|n| self.resolve(descriptor.target_name(), &n)))
    }

    // Caller holds the finalize lock.
    fn find_reciprocal_locked(&self, descriptor: &AssociationDescriptor) -> Result<Option<String>> {
        if let Some(explicit) = &descriptor.options().reciprocal {
            if self.resolve(descriptor.target_name(), explicit).is_none() {
                tracing::warn!(
                    model = %descriptor.owner().name(),
                    association = %descriptor.name(),
                    reciprocal = %explicit,
                    "declared reciprocal does not exist on target"
                );
                return Ok(None);
            }
            return Ok(Some(explicit.clone()));
        }

        let keys = self.finalize_locked(descriptor)?;
        for candidate in self.all_associations(descriptor.target_name()) {
            let Ok(candidate_keys) = self.finalize_locked(&candidate) else {
                continue;
            };
            if descriptor.mirrors(keys, &candidate, candidate_keys) {
                tracing::trace!(
                    association = %descriptor.name(),
                    reciprocal = %candidate.name(),
                    "found reciprocal"
                );
                return Ok(Some(candidate.name().to_string()));
            }
        }
        Ok(None)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let models: Vec<String> = read(&self.inner.models).keys().cloned().collect();
        f.debug_struct("Registry")
            .field("config", &self.inner.config)
            .field("models", &models)
            .finish_non_exhaustive()
    }
}
