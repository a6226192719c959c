//! Batch eager loading.
//!
//! One query per association: the target dataset is filtered by an IN
//! list of the owners' keys, and each result row is handed back to every
//! owner holding its key. Results are staged and only written to the
//! owners' caches once the row stream has completed without error.

use crate::augment::{Scope, augment};
use crate::descriptor::{AssociationDescriptor, ResolvedKeys};
use crate::include::{Include, merge_includes};
use crate::kind::{AssociationKind, EagerLimitStrategy};
use crate::registry::Registry;
use crate::relation::Dataset;
use relgraph_core::{AssociationValue, Error, Key, ModelDef, RecordRef, Result, record_addr};
use relgraph_query::{Distinct, Expr, JoinType, RowSource, Select, SelectItem};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Per-owner row number column used by the window function strategy.
pub const SEQUENCE_COLUMN: &str = "x_sequence_x";

/// Join table key column carried through a `many_to_many` query.
pub fn foreign_key_alias(index: usize) -> String {
    format!("x_foreign_key_{}_x", index)
}

/// Eager load `includes` onto `roots`, all of kind `model`.
///
/// Every association name is checked before any query is issued. Each
/// association is committed as soon as it has loaded, so when a later one
/// fails the earlier ones stay loaded.
#[tracing::instrument(level = "debug", skip_all, fields(model = %model.name(), roots = roots.len()))]
pub fn load_includes(
    registry: &Registry,
    model: &ModelDef,
    roots: &[RecordRef],
    includes: &[Include],
    source: &dyn RowSource,
) -> Result<()> {
    let includes = merge_includes(includes);
    let descriptors = includes
        .iter()
        .map(|include| registry.resolve_eager(model.name(), &include.name))
        .collect::<Result<Vec<_>>>()?;
    if roots.is_empty() {
        return Ok(());
    }
    for (include, descriptor) in includes.iter().zip(&descriptors) {
        fetch_association(registry, descriptor, roots, include, source)?.commit();
    }
    Ok(())
}

/// One association loaded for a batch of owners, not yet written to
/// their caches.
pub(crate) struct Staged {
    descriptor: Arc<AssociationDescriptor>,
    roots: Vec<RecordRef>,
    values: Vec<AssociationValue>,
    reciprocal: Option<String>,
}

impl Staged {
    pub(crate) fn value(&self, index: usize) -> AssociationValue {
        self.values
            .get(index)
            .cloned()
            .unwrap_or(AssociationValue::None)
    }

    /// Write every owner's value, wire reciprocals, then run `after_load`.
    pub(crate) fn commit(self) {
        let name = self.descriptor.name();
        for (root, value) in self.roots.iter().zip(&self.values) {
            if let Some(reciprocal) = &self.reciprocal {
                for child in value.records() {
                    child.set_association(reciprocal, AssociationValue::Back(Arc::downgrade(root)));
                }
            }
            root.set_association(name, value.clone());
        }
        let hooks = &self.descriptor.options().callbacks().after_load;
        for (root, value) in self.roots.iter().zip(&self.values) {
            for hook in hooks {
                hook(root, value);
            }
        }
    }
}

struct BatchQuery {
    dataset: Dataset,
    select: Select,
    /// Row columns holding the owner key each row belongs to.
    join_back: Vec<String>,
    /// Columns to strip before building target records.
    synthetic: Vec<String>,
    /// In-memory `(offset, limit)` window per owner.
    slice: Option<(usize, usize)>,
}

/// Fetch one association for `roots` and stage the result.
pub(crate) fn fetch_association(
    registry: &Registry,
    descriptor: &Arc<AssociationDescriptor>,
    roots: &[RecordRef],
    include: &Include,
    source: &dyn RowSource,
) -> Result<Staged> {
    let keys = registry.finalize(descriptor)?;
    let kind = descriptor.kind();
    let empty = if kind.is_collection() {
        AssociationValue::Many(Vec::new())
    } else {
        AssociationValue::None
    };

    let mut index: HashMap<Key, Vec<usize>> = HashMap::new();
    let mut owner_keys: Vec<Key> = Vec::new();
    for (i, root) in roots.iter().enumerate() {
        let key = root.key_of(keys.eager_key());
        if key.has_null() {
            tracing::trace!(association = %descriptor.name(), "owner key has a null component; no match");
            continue;
        }
        match index.entry(key) {
            Entry::Occupied(mut e) => e.get_mut().push(i),
            Entry::Vacant(e) => {
                owner_keys.push(e.key().clone());
                e.insert(vec![i]);
            }
        }
    }

    let reciprocal = if kind.sets_reciprocal() {
        registry
            .reciprocal(descriptor)?
            .map(|r| r.name().to_string())
    } else {
        None
    };
    let mut staged = Staged {
        descriptor: Arc::clone(descriptor),
        roots: roots.to_vec(),
        values: vec![empty; roots.len()],
        reciprocal,
    };
    if owner_keys.is_empty() {
        tracing::debug!(association = %descriptor.name(), "no owner keys; skipping query");
        return Ok(staged);
    }

    let query = batch_query(registry, descriptor, keys, include, &owner_keys)?;
    let target = keys.target();
    let target_pk = target.primary_key_columns();
    let drop: Vec<&str> = query.synthetic.iter().map(String::as_str).collect();
    let mut identity: HashMap<Key, RecordRef> = HashMap::new();
    let mut pairs: HashSet<(usize, usize)> = HashSet::new();
    let mut loaded: Vec<RecordRef> = Vec::new();
    let mut rows = 0usize;

    source.each_row(&query.select, &mut |row| {
        rows += 1;
        let key = Key::new(row.values_of(&query.join_back));
        let Some(owners) = index.get(&key) else {
            tracing::trace!(key = ?key, "row matches no owner");
            return Ok(());
        };

        let pk = if target_pk.is_empty() {
            None
        } else {
            let pk = Key::new(row.values_of(target_pk));
            (!pk.has_null()).then_some(pk)
        };
        let existing = pk.as_ref().and_then(|k| identity.get(k)).cloned();
        let record = match existing {
            Some(existing) => existing,
            None => {
                let row = if drop.is_empty() { row } else { row.without(&drop) };
                let record = target.instantiate(row)?;
                if let Some(pk) = pk {
                    identity.insert(pk, Arc::clone(&record));
                }
                loaded.push(Arc::clone(&record));
                record
            }
        };

        for &i in owners {
            match &mut staged.values[i] {
                AssociationValue::Many(list) => {
                    if kind == AssociationKind::ManyToMany
                        && !pairs.insert((i, record_addr(&record)))
                    {
                        continue;
                    }
                    list.push(Arc::clone(&record));
                }
                slot => {
                    if slot.is_none() {
                        *slot = AssociationValue::One(Arc::clone(&record));
                    }
                }
            }
        }
        Ok(())
    })?;

    if let Some((offset, limit)) = query.slice {
        for value in &mut staged.values {
            if let AssociationValue::Many(list) = value {
                *list = std::mem::take(list)
                    .into_iter()
                    .skip(offset)
                    .take(limit)
                    .collect();
            }
        }
        let kept: HashSet<usize> = staged
            .values
            .iter()
            .flat_map(AssociationValue::records)
            .map(|r| record_addr(&r))
            .collect();
        loaded.retain(|r| kept.contains(&record_addr(r)));
    }

    if !query.dataset.includes.is_empty() && !loaded.is_empty() {
        load_includes(
            registry,
            target,
            &loaded,
            &query.dataset.includes,
            source,
        )?;
    }

    tracing::info!(
        model = %descriptor.owner().name(),
        association = %descriptor.name(),
        owners = roots.len(),
        keys = owner_keys.len(),
        rows,
        records = loaded.len(),
        "eager loaded association"
    );
    Ok(staged)
}

/// The limit strategy to apply and the per-owner row limit.
fn limit_strategy(
    registry: &Registry,
    descriptor: &AssociationDescriptor,
) -> Option<(EagerLimitStrategy, u64)> {
    let options = descriptor.options();
    let explicit = options.eager_limit_strategy;
    if descriptor.is_collection() {
        let limit = options.limit_value()?;
        let strategy = match explicit.unwrap_or(registry.config().default_limit_strategy) {
            EagerLimitStrategy::DistinctOn => {
                tracing::warn!(
                    association = %descriptor.name(),
                    "distinct_on only applies to one_to_one; slicing in memory"
                );
                EagerLimitStrategy::Slice
            }
            other => other,
        };
        Some((strategy, limit))
    } else if descriptor.kind() == AssociationKind::OneToOne {
        match explicit {
            Some(s @ (EagerLimitStrategy::WindowFunction | EagerLimitStrategy::DistinctOn)) => {
                Some((s, 1))
            }
            _ => None,
        }
    } else {
        None
    }
}

fn batch_query(
    registry: &Registry,
    descriptor: &AssociationDescriptor,
    keys: &ResolvedKeys,
    include: &Include,
    owner_keys: &[Key],
) -> Result<BatchQuery> {
    let target = keys.target();
    let mut ds = Dataset::new(registry.clone(), Arc::clone(target));
    ds = augment(descriptor, ds, &include.nested, Scope::Batch);
    if let Some(filter) = &include.filter {
        ds = filter(ds);
    }
    let table = ds.select.reference_name().to_string();

    let (key_exprs, join_back, mut synthetic) = match keys.join_table() {
        None => {
            ensure_selected(&mut ds.select, &table, keys.target_keys());
            let exprs: Vec<Expr> = keys
                .target_keys()
                .iter()
                .map(|c| Expr::qualified(table.as_str(), c))
                .collect();
            (exprs, keys.target_keys().to_vec(), Vec::new())
        }
        Some(join) => {
            if ds.graph.is_some() {
                return Err(Error::join_planning(
                    None,
                    format!(
                        "many_to_many association '{}' cannot be batch loaded through a graph joined dataset",
                        descriptor.name()
                    ),
                ));
            }
            if ds.select.items.is_empty() {
                ds.select.items.push(SelectItem::Wildcard {
                    table: Some(table.clone()),
                });
            }
            let on = Expr::all(join.right_keys.iter().zip(keys.target_keys()).map(|(jk, tk)| {
                Expr::qualified(join.table.as_str(), jk).eq(Expr::qualified(table.as_str(), tk))
            }))
            .unwrap_or_else(|| Expr::lit(false));
            ds = ds.join_table(JoinType::Inner, &join.table, on, None)?;

            let exprs: Vec<Expr> = join
                .left_keys
                .iter()
                .map(|c| Expr::qualified(join.table.as_str(), c))
                .collect();
            let aliases: Vec<String> = (0..exprs.len()).map(foreign_key_alias).collect();
            for (expr, alias) in exprs.iter().zip(&aliases) {
                ds.select.items.push(SelectItem::Expr {
                    expr: expr.clone(),
                    alias: Some(alias.clone()),
                });
            }
            (exprs, aliases.clone(), aliases)
        }
    };
    ds.select = ds.select.filter(Expr::key_in(key_exprs.clone(), owner_keys));

    let offset = descriptor.options().offset_value().unwrap_or(0);
    let mut slice = None;
    let select = match limit_strategy(registry, descriptor) {
        None => ds.select.clone(),
        Some((EagerLimitStrategy::Slice, limit)) => {
            slice = Some((offset as usize, limit as usize));
            ds.select.clone()
        }
        Some((EagerLimitStrategy::WindowFunction, limit)) => {
            let mut inner = ds.select.clone();
            let order = if inner.order_by.is_empty() {
                target
                    .primary_key_columns()
                    .iter()
                    .map(|c| Expr::qualified(table.as_str(), c).asc())
                    .collect()
            } else {
                std::mem::take(&mut inner.order_by)
            };
            if inner.items.is_empty() {
                inner.items.push(SelectItem::Wildcard {
                    table: Some(table.clone()),
                });
            }
            inner.items.push(SelectItem::Expr {
                expr: Expr::row_number(key_exprs, order),
                alias: Some(SEQUENCE_COLUMN.to_string()),
            });
            synthetic.push(SEQUENCE_COLUMN.to_string());
            let sequence = || Expr::col(SEQUENCE_COLUMN);
            Select::from_subquery(inner, "t1")
                .filter(sequence().gt(offset as i64))
                .filter(sequence().le((offset + limit) as i64))
                .order_by(sequence().asc())
        }
        Some((EagerLimitStrategy::DistinctOn, _)) => {
            let mut select = ds.select.clone();
            select.distinct = Distinct::On(key_exprs.clone());
            for expr in key_exprs.iter().rev() {
                select = select.order_first(expr.clone().asc());
            }
            select
        }
    };

    let (sql, _) = select.to_sql_with_dialect(registry.config().dialect);
    tracing::debug!(association = %descriptor.name(), sql = %sql, "batch query");

    Ok(BatchQuery {
        dataset: ds,
        select,
        join_back,
        synthetic,
        slice,
    })
}

// Row values are read back by name, so key columns must be projected.
fn ensure_selected(select: &mut Select, table: &str, columns: &[String]) {
    if select.items.is_empty() {
        return;
    }
    let present: Vec<String> = select
        .items
        .iter()
        .filter_map(|i| i.output_name().map(str::to_string))
        .collect();
    let has_wildcard = select
        .items
        .iter()
        .any(|i| matches!(i, SelectItem::Wildcard { .. }));
    if has_wildcard {
        return;
    }
    for column in columns {
        if !present.contains(column) {
            select.items.push(SelectItem::Expr {
                expr: Expr::qualified(table, column.as_str()),
                alias: None,
            });
        }
    }
}
