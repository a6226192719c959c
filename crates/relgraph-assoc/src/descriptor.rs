//! Association descriptors.
//!
//! A descriptor is created once when an association is declared and never
//! changes afterwards. Fields that depend on other models (the resolved
//! target, default key names, the join table, the reciprocal) are computed
//! on first use by the owning [`Registry`](crate::Registry) and memoized in
//! `OnceLock`s, so readers never lock once a descriptor is finalized.

use crate::access::AssociationOps;
use crate::kind::AssociationKind;
use crate::options::AssociationOptions;
use relgraph_core::inflect::{camelize, foreign_key, singularize, tableize, underscore};
use relgraph_core::{ConfigurationError, Error, ModelDef, Result};
use relgraph_query::Expr;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// The join table of a `many_to_many` association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTableKeys {
    pub table: String,
    /// Join table columns pointing at the owner.
    pub left_keys: Vec<String>,
    /// Join table columns pointing at the target.
    pub right_keys: Vec<String>,
}

/// Keys and target resolved at finalization.
///
/// `owner_keys[i]` on the owner matches `target_keys[i]` on the target
/// (through the join table for `many_to_many`).
#[derive(Debug, Clone)]
pub struct ResolvedKeys {
    target: Arc<ModelDef>,
    owner_keys: Vec<String>,
    target_keys: Vec<String>,
    join: Option<JoinTableKeys>,
    eager_key: Vec<String>,
    qualified_owner_keys: Vec<Expr>,
    qualified_target_keys: Vec<Expr>,
}

impl ResolvedKeys {
    pub fn target(&self) -> &Arc<ModelDef> {
        &self.target
    }

    pub fn owner_keys(&self) -> &[String] {
        &self.owner_keys
    }

    pub fn target_keys(&self) -> &[String] {
        &self.target_keys
    }

    pub fn join_table(&self) -> Option<&JoinTableKeys> {
        self.join.as_ref()
    }

    /// Owner columns batch results are grouped by.
    pub fn eager_key(&self) -> &[String] {
        &self.eager_key
    }

    /// Owner keys qualified with the owner table name.
    pub fn qualified_owner_keys(&self) -> &[Expr] {
        &self.qualified_owner_keys
    }

    /// Target keys qualified with the target table name.
    pub fn qualified_target_keys(&self) -> &[Expr] {
        &self.qualified_target_keys
    }
}

/// A declared association.
pub struct AssociationDescriptor {
    kind: AssociationKind,
    name: String,
    owner: Arc<ModelDef>,
    target_name: String,
    options: AssociationOptions,
    pub(crate) ops: &'static AssociationOps,
    pub(crate) resolved: OnceLock<ResolvedKeys>,
    pub(crate) reciprocal: OnceLock<Option<String>>,
}

impl AssociationDescriptor {
    pub(crate) fn new(
        kind: AssociationKind,
        name: String,
        owner: Arc<ModelDef>,
        options: AssociationOptions,
        ops: &'static AssociationOps,
    ) -> Self {
        let target_name = options
            .target
            .clone()
            .unwrap_or_else(|| default_target_name(kind, &name));
        let reciprocal = OnceLock::new();
        if options.no_reciprocal {
            let _ = reciprocal.set(None);
        }
        Self {
            kind,
            name,
            owner,
            target_name,
            options,
            ops,
            resolved: OnceLock::new(),
            reciprocal,
        }
    }

    pub fn kind(&self) -> AssociationKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &Arc<ModelDef> {
        &self.owner
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn options(&self) -> &AssociationOptions {
        &self.options
    }

    pub fn is_collection(&self) -> bool {
        self.kind.is_collection()
    }

    /// Resolved keys, if the descriptor has been finalized.
    pub fn resolved(&self) -> Option<&ResolvedKeys> {
        self.resolved.get()
    }

    /// Whether `other` is the structural mirror of `self`.
    pub(crate) fn mirrors(
        &self,
        keys: &ResolvedKeys,
        other: &AssociationDescriptor,
        other_keys: &ResolvedKeys,
    ) -> bool {
        if std::ptr::eq(self, other)
            || other.owner.name() != self.target_name
            || other.target_name != self.owner.name()
            || !self.kind.reciprocal_kinds().contains(&other.kind)
        {
            return false;
        }
        let keys_swap = keys.owner_keys == other_keys.target_keys
            && keys.target_keys == other_keys.owner_keys;
        match (&keys.join, &other_keys.join) {
            (None, None) => keys_swap,
            (Some(a), Some(b)) => {
                keys_swap
                    && a.table == b.table
                    && a.left_keys == b.right_keys
                    && a.right_keys == b.left_keys
            }
            _ => false,
        }
    }
}

impl fmt::Debug for AssociationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationDescriptor")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("owner", &self.owner.name())
            .field("target", &self.target_name)
            .field("resolved", &self.resolved.get().is_some())
            .finish_non_exhaustive()
    }
}

/// `band` -> `Band`, `tracks` -> `Track`.
pub(crate) fn default_target_name(kind: AssociationKind, name: &str) -> String {
    if kind.is_collection() {
        camelize(&singularize(name))
    } else {
        camelize(name)
    }
}

/// `Album` + `Artist` -> `albums_artists`.
pub(crate) fn default_join_table(owner: &str, target: &str) -> String {
    let mut tables = [tableize(owner), tableize(target)];
    tables.sort();
    tables.join("_")
}

fn config_error(desc: &AssociationDescriptor, message: impl Into<String>) -> Error {
    ConfigurationError::new(message)
        .model(desc.owner.name())
        .association(&desc.name)
        .into()
}

fn require_key(
    desc: &AssociationDescriptor,
    explicit: Option<&Vec<String>>,
    model: &ModelDef,
) -> Result<Vec<String>> {
    if let Some(columns) = explicit {
        return Ok(columns.clone());
    }
    if !model.has_primary_key() {
        return Err(Error::missing_key(
            model.name(),
            format!(
                "{} association '{}.{}' needs a primary key",
                desc.kind,
                desc.owner.name(),
                desc.name
            ),
        ));
    }
    Ok(model.primary_key_columns().to_vec())
}

fn check_columns(desc: &AssociationDescriptor, model: &ModelDef, columns: &[String]) -> Result<()> {
    match columns.iter().find(|c| !model.has_column(c)) {
        Some(missing) => Err(config_error(
            desc,
            format!("'{}' is not a column of {}", missing, model.name()),
        )),
        None => Ok(()),
    }
}

fn check_arity(desc: &AssociationDescriptor, left: &[String], right: &[String]) -> Result<()> {
    if left.len() == right.len() {
        Ok(())
    } else {
        Err(config_error(
            desc,
            format!(
                "key arity mismatch: {:?} has {} column(s), {:?} has {}",
                left,
                left.len(),
                right,
                right.len()
            ),
        ))
    }
}

/// Compute the resolved keys of `desc` against the registered models.
///
/// Pure: takes no locks, so the caller decides how results are memoized.
pub(crate) fn resolve_keys(
    desc: &AssociationDescriptor,
    models: &HashMap<String, Arc<ModelDef>>,
) -> Result<ResolvedKeys> {
    let options = &desc.options;
    let owner = &desc.owner;
    let target = models.get(&desc.target_name).cloned().ok_or_else(|| {
        config_error(
            desc,
            format!("target model '{}' is not registered", desc.target_name),
        )
    })?;

    let (owner_keys, target_keys, join) = match desc.kind {
        AssociationKind::ManyToOne => {
            let owner_keys = options
                .keys
                .clone()
                .unwrap_or_else(|| vec![format!("{}_id", underscore(&desc.name))]);
            let target_keys = require_key(desc, options.primary_keys.as_ref(), &target)?;
            (owner_keys, target_keys, None)
        }
        AssociationKind::OneToMany | AssociationKind::OneToOne => {
            let target_keys = options
                .keys
                .clone()
                .unwrap_or_else(|| vec![foreign_key(owner.name())]);
            let owner_keys = require_key(desc, options.primary_keys.as_ref(), owner)?;
            (owner_keys, target_keys, None)
        }
        AssociationKind::ManyToMany => {
            let owner_keys = require_key(desc, options.left_primary_keys.as_ref(), owner)?;
            let target_keys = require_key(desc, options.right_primary_keys.as_ref(), &target)?;
            let join = JoinTableKeys {
                table: options
                    .join_table
                    .clone()
                    .unwrap_or_else(|| default_join_table(owner.name(), target.name())),
                left_keys: options
                    .left_keys
                    .clone()
                    .unwrap_or_else(|| vec![foreign_key(owner.name())]),
                right_keys: options
                    .right_keys
                    .clone()
                    .unwrap_or_else(|| vec![format!("{}_id", singularize(&desc.name))]),
            };
            check_arity(desc, &join.left_keys, &owner_keys)?;
            check_arity(desc, &join.right_keys, &target_keys)?;
            (owner_keys, target_keys, Some(join))
        }
    };

    if join.is_none() {
        check_arity(desc, &owner_keys, &target_keys)?;
    }
    check_columns(desc, owner, &owner_keys)?;
    check_columns(desc, &target, &target_keys)?;

    let eager_key = options
        .eager_loader_key
        .clone()
        .unwrap_or_else(|| owner_keys.clone());
    check_columns(desc, owner, &eager_key)?;
    check_arity(desc, &eager_key, &owner_keys)?;

    let qualified_owner_keys = owner_keys
        .iter()
        .map(|c| Expr::qualified(owner.table_name(), c))
        .collect();
    let qualified_target_keys = target_keys
        .iter()
        .map(|c| Expr::qualified(target.table_name(), c))
        .collect();

    tracing::trace!(
        model = %owner.name(),
        association = %desc.name,
        owner_keys = ?owner_keys,
        target_keys = ?target_keys,
        "resolved association keys"
    );

    Ok(ResolvedKeys {
        target,
        owner_keys,
        target_keys,
        join,
        eager_key,
        qualified_owner_keys,
        qualified_target_keys,
    })
}
