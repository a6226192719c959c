//! Declarative association options.
//!
//! [`AssociationOptions`] is the builder handed to
//! [`Registry::associate`](crate::Registry::associate). Every key option is
//! optional; unset keys are derived from model names when the association
//! is first used.

use crate::include::Include;
use crate::kind::EagerLimitStrategy;
use relgraph_core::{AssociationValue, RecordRef, Value};
use relgraph_query::{Expr, JoinType, OrderBy};
use std::fmt;
use std::sync::Arc;

/// Hook run around `set`/`add`/`remove`. Receives the owner and the other
/// record (absent when a scalar association is cleared). A before-hook
/// returning `false` vetoes the change.
pub type MutationHook = Arc<dyn Fn(&RecordRef, Option<&RecordRef>) -> bool + Send + Sync>;

/// Hook run after an association is loaded, with the loaded value.
pub type LoadHook = Arc<dyn Fn(&RecordRef, &AssociationValue) + Send + Sync>;

/// Which columns of the target are selected.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Projection {
    /// Every declared column.
    #[default]
    Default,
    /// Only these columns.
    Columns(Vec<String>),
    /// No columns. Graph joins use the table for filtering only.
    Nothing,
}

/// Extra conditions on the target dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Conditions {
    /// `column = value` for every pair.
    Equals(Vec<(String, Value)>),
    /// An arbitrary predicate over target columns.
    Predicate(Expr),
}

impl Conditions {
    /// The condition as one expression, columns qualified with `table`.
    pub fn to_expr(&self, table: &str) -> Option<Expr> {
        match self {
            Conditions::Equals(pairs) => Expr::all(
                pairs
                    .iter()
                    .map(|(column, value)| Expr::qualified(table, column).eq(value.clone())),
            ),
            Conditions::Predicate(expr) => Some(expr.clone().qualify(table)),
        }
    }
}

/// Ordered lists of lifecycle hooks.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub before_add: Vec<MutationHook>,
    pub after_add: Vec<MutationHook>,
    pub before_remove: Vec<MutationHook>,
    pub after_remove: Vec<MutationHook>,
    pub before_set: Vec<MutationHook>,
    pub after_set: Vec<MutationHook>,
    pub after_load: Vec<LoadHook>,
}

impl Callbacks {
    pub fn is_empty(&self) -> bool {
        self.before_add.is_empty()
            && self.after_add.is_empty()
            && self.before_remove.is_empty()
            && self.after_remove.is_empty()
            && self.before_set.is_empty()
            && self.after_set.is_empty()
            && self.after_load.is_empty()
    }

    /// `self`'s hooks followed by `other`'s.
    fn chain(&self, other: &Callbacks) -> Callbacks {
        fn join<T: Clone>(a: &[T], b: &[T]) -> Vec<T> {
            a.iter().chain(b).cloned().collect()
        }
        Callbacks {
            before_add: join(&self.before_add, &other.before_add),
            after_add: join(&self.after_add, &other.after_add),
            before_remove: join(&self.before_remove, &other.before_remove),
            after_remove: join(&self.after_remove, &other.after_remove),
            before_set: join(&self.before_set, &other.before_set),
            after_set: join(&self.after_set, &other.after_set),
            after_load: join(&self.after_load, &other.after_load),
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("before_add", &self.before_add.len())
            .field("after_add", &self.after_add.len())
            .field("before_remove", &self.before_remove.len())
            .field("after_remove", &self.after_remove.len())
            .field("before_set", &self.before_set.len())
            .field("after_set", &self.after_set.len())
            .field("after_load", &self.after_load.len())
            .finish()
    }
}

/// Options for declaring an association.
///
/// Key naming depends on the kind:
///
/// - `many_to_one`: `keys` are owner columns, `primary_keys` target columns
/// - `one_to_many` / `one_to_one`: `keys` are target columns,
///   `primary_keys` owner columns
/// - `many_to_many`: `left_keys`/`right_keys` are join table columns
///   pointing at the owner's `left_primary_keys` and the target's
///   `right_primary_keys`
#[derive(Clone, Default, Debug)]
pub struct AssociationOptions {
    pub(crate) target: Option<String>,
    pub(crate) keys: Option<Vec<String>>,
    pub(crate) primary_keys: Option<Vec<String>>,
    pub(crate) join_table: Option<String>,
    pub(crate) left_keys: Option<Vec<String>>,
    pub(crate) left_primary_keys: Option<Vec<String>>,
    pub(crate) right_keys: Option<Vec<String>>,
    pub(crate) right_primary_keys: Option<Vec<String>>,
    pub(crate) order: Vec<OrderBy>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) select: Projection,
    pub(crate) conditions: Vec<Conditions>,
    pub(crate) distinct: bool,
    pub(crate) callbacks: Callbacks,
    pub(crate) allow_eager: Option<bool>,
    pub(crate) reciprocal: Option<String>,
    pub(crate) no_reciprocal: bool,
    pub(crate) eager_limit_strategy: Option<EagerLimitStrategy>,
    pub(crate) graph_alias_base: Option<String>,
    pub(crate) graph_join_type: Option<JoinType>,
    pub(crate) eager_loader_key: Option<Vec<String>>,
    pub(crate) eager: Vec<Include>,
    pub(crate) clone: Option<String>,
}

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

impl AssociationOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Target model name. Defaults to the camelized (and, for collections,
    /// singularized) association name.
    #[must_use]
    pub fn target(mut self, model: impl Into<String>) -> Self {
        self.target = Some(model.into());
        self
    }

    /// Single key column.
    #[must_use]
    pub fn key(mut self, column: impl Into<String>) -> Self {
        self.keys = Some(vec![column.into()]);
        self
    }

    /// Composite key columns.
    #[must_use]
    pub fn keys<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(strings(columns));
        self
    }

    /// Single column the key points at.
    #[must_use]
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_keys = Some(vec![column.into()]);
        self
    }

    /// Composite columns the keys point at.
    #[must_use]
    pub fn primary_keys<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = Some(strings(columns));
        self
    }

    /// Join table for `many_to_many`.
    #[must_use]
    pub fn join_table(mut self, table: impl Into<String>) -> Self {
        self.join_table = Some(table.into());
        self
    }

    /// Join table column(s) pointing at the owner.
    #[must_use]
    pub fn left_keys<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.left_keys = Some(strings(columns));
        self
    }

    /// Owner column(s) the left keys point at.
    #[must_use]
    pub fn left_primary_keys<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.left_primary_keys = Some(strings(columns));
        self
    }

    /// Join table column(s) pointing at the target.
    #[must_use]
    pub fn right_keys<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.right_keys = Some(strings(columns));
        self
    }

    /// Target column(s) the right keys point at.
    #[must_use]
    pub fn right_primary_keys<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.right_primary_keys = Some(strings(columns));
        self
    }

    /// Append an ORDER BY item for the target dataset.
    #[must_use]
    pub fn order(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Select only these target columns.
    #[must_use]
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Projection::Columns(strings(columns));
        self
    }

    /// Select no target columns when graph joined.
    #[must_use]
    pub fn select_none(mut self) -> Self {
        self.select = Projection::Nothing;
        self
    }

    /// Require `column = value` on the target.
    #[must_use]
    pub fn condition(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let pair = (column.into(), value.into());
        match self.conditions.last_mut() {
            Some(Conditions::Equals(pairs)) => pairs.push(pair),
            _ => self.conditions.push(Conditions::Equals(vec![pair])),
        }
        self
    }

    /// Require an arbitrary predicate on the target.
    #[must_use]
    pub fn predicate(mut self, expr: Expr) -> Self {
        self.conditions.push(Conditions::Predicate(expr));
        self
    }

    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    #[must_use]
    pub fn before_add<F>(mut self, f: F) -> Self
    where
        F: Fn(&RecordRef, Option<&RecordRef>) -> bool + Send + Sync + 'static,
    {
        self.callbacks.before_add.push(Arc::new(f));
        self
    }

    #[must_use]
    pub fn after_add<F>(mut self, f: F) -> Self
    where
        F: Fn(&RecordRef, Option<&RecordRef>) -> bool + Send + Sync + 'static,
    {
        self.callbacks.after_add.push(Arc::new(f));
        self
    }

    #[must_use]
    pub fn before_remove<F>(mut self, f: F) -> Self
    where
        F: Fn(&RecordRef, Option<&RecordRef>) -> bool + Send + Sync + 'static,
    {
        self.callbacks.before_remove.push(Arc::new(f));
        self
    }

    #[must_use]
    pub fn after_remove<F>(mut self, f: F) -> Self
    where
        F: Fn(&RecordRef, Option<&RecordRef>) -> bool + Send + Sync + 'static,
    {
        self.callbacks.after_remove.push(Arc::new(f));
        self
    }

    #[must_use]
    pub fn before_set<F>(mut self, f: F) -> Self
    where
        F: Fn(&RecordRef, Option<&RecordRef>) -> bool + Send + Sync + 'static,
    {
        self.callbacks.before_set.push(Arc::new(f));
        self
    }

    #[must_use]
    pub fn after_set<F>(mut self, f: F) -> Self
    where
        F: Fn(&RecordRef, Option<&RecordRef>) -> bool + Send + Sync + 'static,
    {
        self.callbacks.after_set.push(Arc::new(f));
        self
    }

    #[must_use]
    pub fn after_load<F>(mut self, f: F) -> Self
    where
        F: Fn(&RecordRef, &AssociationValue) + Send + Sync + 'static,
    {
        self.callbacks.after_load.push(Arc::new(f));
        self
    }

    /// Allow or forbid eager loading (allowed by default).
    #[must_use]
    pub fn allow_eager(mut self, allow: bool) -> Self {
        self.allow_eager = Some(allow);
        self
    }

    /// Name the reciprocal association explicitly.
    #[must_use]
    pub fn reciprocal(mut self, name: impl Into<String>) -> Self {
        self.reciprocal = Some(name.into());
        self.no_reciprocal = false;
        self
    }

    /// Never wire a reciprocal for this association.
    #[must_use]
    pub fn no_reciprocal(mut self) -> Self {
        self.reciprocal = None;
        self.no_reciprocal = true;
        self
    }

    #[must_use]
    pub fn eager_limit_strategy(mut self, strategy: EagerLimitStrategy) -> Self {
        self.eager_limit_strategy = Some(strategy);
        self
    }

    /// Table alias base used by graph joins. Defaults to the association name.
    #[must_use]
    pub fn graph_alias_base(mut self, alias: impl Into<String>) -> Self {
        self.graph_alias_base = Some(alias.into());
        self
    }

    #[must_use]
    pub fn graph_join_type(mut self, join_type: JoinType) -> Self {
        self.graph_join_type = Some(join_type);
        self
    }

    /// Owner column(s) used to group batch results.
    #[must_use]
    pub fn eager_loader_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.eager_loader_key = Some(strings(columns));
        self
    }

    /// Associations always eager loaded on the target records.
    #[must_use]
    pub fn eager(mut self, include: Include) -> Self {
        self.eager.push(include);
        self
    }

    /// Start from the options of another association on the same owner.
    #[must_use]
    pub fn clone_of(mut self, association: impl Into<String>) -> Self {
        self.clone = Some(association.into());
        self
    }

    /// `self` layered over `base`: anything set here wins, unset options
    /// fall back to `base`, and callbacks run base-first.
    pub(crate) fn overlay(self, base: &AssociationOptions) -> AssociationOptions {
        fn pick<T: Clone>(own: Option<T>, base: &Option<T>) -> Option<T> {
            own.or_else(|| base.clone())
        }
        fn pick_vec<T: Clone>(own: Vec<T>, base: &[T]) -> Vec<T> {
            if own.is_empty() { base.to_vec() } else { own }
        }

        let no_reciprocal = self.no_reciprocal || (self.reciprocal.is_none() && base.no_reciprocal);
        AssociationOptions {
            target: pick(self.target, &base.target),
            keys: pick(self.keys, &base.keys),
            primary_keys: pick(self.primary_keys, &base.primary_keys),
            join_table: pick(self.join_table, &base.join_table),
            left_keys: pick(self.left_keys, &base.left_keys),
            left_primary_keys: pick(self.left_primary_keys, &base.left_primary_keys),
            right_keys: pick(self.right_keys, &base.right_keys),
            right_primary_keys: pick(self.right_primary_keys, &base.right_primary_keys),
            order: pick_vec(self.order, &base.order),
            limit: pick(self.limit, &base.limit),
            offset: pick(self.offset, &base.offset),
            select: match self.select {
                Projection::Default => base.select.clone(),
                own => own,
            },
            conditions: pick_vec(self.conditions, &base.conditions),
            distinct: self.distinct || base.distinct,
            callbacks: base.callbacks.chain(&self.callbacks),
            allow_eager: pick(self.allow_eager, &base.allow_eager),
            reciprocal: if no_reciprocal {
                None
            } else {
                pick(self.reciprocal, &base.reciprocal)
            },
            no_reciprocal,
            eager_limit_strategy: pick(self.eager_limit_strategy, &base.eager_limit_strategy),
            graph_alias_base: pick(self.graph_alias_base, &base.graph_alias_base),
            graph_join_type: pick(self.graph_join_type, &base.graph_join_type),
            eager_loader_key: pick(self.eager_loader_key, &base.eager_loader_key),
            eager: pick_vec(self.eager, &base.eager),
            clone: None,
        }
    }

    // ==================== Accessors ====================

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn projection(&self) -> &Projection {
        &self.select
    }

    pub fn conditions(&self) -> &[Conditions] {
        &self.conditions
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    pub fn eager_allowed(&self) -> bool {
        self.allow_eager.unwrap_or(true)
    }

    pub fn default_eager(&self) -> &[Include] {
        &self.eager
    }
}
