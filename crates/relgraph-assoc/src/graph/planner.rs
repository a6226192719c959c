//! Join planning for `eager_graph`.

use super::{GraphNode, GraphPlan};
use crate::descriptor::ResolvedKeys;
use crate::include::{Include, merge_includes};
use crate::kind::AssociationKind;
use crate::options::Projection;
use crate::registry::Registry;
use relgraph_core::{Error, ModelDef, Result};
use relgraph_query::{Expr, Join, JoinType, Select, SelectItem};
use std::sync::Arc;

/// Start a graph plan over `select`, whose base table holds `model` rows.
///
/// The root's columns are rewritten as explicit aliased items. A root query
/// that is already limited is wrapped in a derived table first, so the
/// limit counts root rows rather than joined rows.
pub(crate) fn start(model: &Arc<ModelDef>, select: &mut Select) -> GraphPlan {
    let selected = root_columns(model, select);
    if select.limit.is_some() || select.offset.is_some() {
        let reference = select.reference_name().to_string();
        let inner = std::mem::replace(select, Select::from_table(reference.as_str()));
        let order = inner
            .order_by
            .iter()
            .map(|o| o.clone().qualify(&reference))
            .collect();
        *select = Select::from_subquery(inner, reference.as_str());
        select.order_by = order;
        tracing::debug!(table = %reference, "wrapped limited root query for graph joins");
    }

    let alias = select.reference_name().to_string();
    let mut plan = GraphPlan::new(GraphNode {
        alias: alias.clone(),
        model: Arc::clone(model),
        parent: None,
        children: Vec::new(),
        descriptor: None,
        columns: Vec::new(),
        identity: Vec::new(),
        reciprocal: None,
        offset: 0,
        limit: None,
    });
    for reference in select.reference_names() {
        plan.reserve_alias(reference);
    }

    let columns = allocate_columns(&mut plan, &alias, &selected);
    select.items = select_items(&alias, &columns);
    plan.nodes[0].identity = identity(model, &columns);
    plan.nodes[0].columns = columns;
    plan
}

fn root_columns(model: &ModelDef, select: &Select) -> Vec<String> {
    if select.items.is_empty() {
        return model.column_names().to_vec();
    }
    let mut columns = Vec::new();
    for item in &select.items {
        match item {
            SelectItem::Wildcard { .. } => {
                for column in model.column_names() {
                    if !columns.contains(column) {
                        columns.push(column.clone());
                    }
                }
            }
            other => {
                if let Some(name) = other.output_name() {
                    if !columns.iter().any(|c| c == name) {
                        columns.push(name.to_string());
                    }
                }
            }
        }
    }
    columns
}

fn allocate_columns(plan: &mut GraphPlan, alias: &str, columns: &[String]) -> Vec<(String, String)> {
    columns
        .iter()
        .map(|column| (plan.allocate_column(alias, column), column.clone()))
        .collect()
}

fn select_items(alias: &str, columns: &[(String, String)]) -> Vec<SelectItem> {
    columns
        .iter()
        .map(|(output, column)| SelectItem::Expr {
            expr: Expr::qualified(alias, column.as_str()),
            alias: Some(output.clone()),
        })
        .collect()
}

// Primary key aliases when every key column is selected, else every
// selected column in the model's declaration order.
fn identity(model: &ModelDef, columns: &[(String, String)]) -> Vec<String> {
    let alias_of = |column: &str| {
        columns
            .iter()
            .find(|(_, c)| c == column)
            .map(|(output, _)| output.clone())
    };
    let pk = model.primary_key_columns();
    if !pk.is_empty() {
        if let Some(aliases) = pk.iter().map(|c| alias_of(c)).collect::<Option<Vec<_>>>() {
            return aliases;
        }
    }
    let mut ordered: Vec<String> = model
        .column_names()
        .iter()
        .filter_map(|c| alias_of(c))
        .collect();
    for (output, column) in columns {
        if !model.has_column(column) {
            ordered.push(output.clone());
        }
    }
    ordered
}

/// Join `include` under the plan node `parent`, then its nested includes.
#[tracing::instrument(level = "debug", skip(registry, plan, select, include), fields(association = %include.name))]
pub(crate) fn plan_include(
    registry: &Registry,
    plan: &mut GraphPlan,
    select: &mut Select,
    parent: usize,
    include: &Include,
) -> Result<()> {
    let parent_model = Arc::clone(&plan.nodes[parent].model);
    let parent_alias = plan.nodes[parent].alias.clone();
    let descriptor = registry.resolve_eager(parent_model.name(), &include.name)?;
    let keys = registry.finalize(&descriptor)?;
    let options = descriptor.options();

    // A column-less alias is never assembled, nor would anything nested
    // beneath it be.
    if *options.projection() == Projection::Nothing && !include.nested.is_empty() {
        return Err(Error::join_planning(
            Some(descriptor.name()),
            "cannot nest includes under an association that selects no columns",
        ));
    }

    if include.filter.is_some() {
        tracing::warn!(
            association = %descriptor.name(),
            "dataset hooks do not apply to graph joins; ignoring"
        );
    }

    let alias = match &include.alias {
        Some(explicit) => {
            if plan.alias_taken(explicit) {
                return Err(Error::join_planning(
                    Some(explicit.as_str()),
                    "explicit graph alias is already used by this query",
                ));
            }
            plan.reserve_alias(explicit);
            explicit.clone()
        }
        None => {
            let base = options
                .graph_alias_base
                .clone()
                .unwrap_or_else(|| descriptor.name().to_string());
            plan.allocate_alias(&base)
        }
    };
    let join_type = options
        .graph_join_type
        .unwrap_or(registry.config().default_graph_join);
    let target = keys.target();

    let mut on = match descriptor.kind() {
        AssociationKind::ManyToOne => {
            pairs_eq(&parent_alias, keys.owner_keys(), &alias, keys.target_keys())
        }
        AssociationKind::OneToMany | AssociationKind::OneToOne => {
            pairs_eq(&alias, keys.target_keys(), &parent_alias, keys.owner_keys())
        }
        AssociationKind::ManyToMany => {
            join_through(plan, select, join_type, &parent_alias, &alias, keys)?
        }
    };
    for condition in options.conditions() {
        if let Some(expr) = condition.to_expr(&alias) {
            on = on.and(expr);
        }
    }
    select
        .joins
        .push(Join::new(join_type, target.table_name(), on).alias(alias.as_str()));

    let selected: Vec<String> = match options.projection() {
        Projection::Default => target.column_names().to_vec(),
        Projection::Columns(columns) => columns.clone(),
        Projection::Nothing => Vec::new(),
    };
    let columns = allocate_columns(plan, &alias, &selected);
    select.items.extend(select_items(&alias, &columns));

    for order in options.order_by() {
        select.order_by.push(order.clone().qualify(&alias));
    }

    let reciprocal = if descriptor.kind().sets_reciprocal() {
        registry.reciprocal(&descriptor)?.map(|r| r.name().to_string())
    } else {
        None
    };
    let (offset, limit) = if descriptor.is_collection() {
        (
            options.offset_value().unwrap_or(0) as usize,
            options.limit_value().map(|l| l as usize),
        )
    } else {
        (0, None)
    };

    tracing::debug!(
        association = %descriptor.name(),
        alias = %alias,
        join = join_type.as_str(),
        columns = columns.len(),
        "planned graph join"
    );

    let node = plan.add_node(GraphNode {
        alias,
        model: Arc::clone(target),
        parent: Some(parent),
        children: Vec::new(),
        identity: identity(target, &columns),
        columns,
        descriptor: Some(Arc::clone(&descriptor)),
        reciprocal,
        offset,
        limit,
    });

    for nested in merge_includes(&include.nested) {
        plan_include(registry, plan, select, node, &nested)?;
    }
    Ok(())
}

// `left.a = right.b` for each key pair, ANDed.
fn pairs_eq(left: &str, left_keys: &[String], right: &str, right_keys: &[String]) -> Expr {
    Expr::all(
        left_keys
            .iter()
            .zip(right_keys)
            .map(|(l, r)| Expr::qualified(left, l.as_str()).eq(Expr::qualified(right, r.as_str()))),
    )
    .unwrap_or_else(|| Expr::lit(false))
}

// Join the join table under its own alias and return the condition that
// joins the target through it.
fn join_through(
    plan: &mut GraphPlan,
    select: &mut Select,
    join_type: JoinType,
    parent_alias: &str,
    alias: &str,
    keys: &ResolvedKeys,
) -> Result<Expr> {
    let join = keys.join_table().ok_or_else(|| {
        Error::join_planning(Some(alias), "many_to_many association has no join table")
    })?;
    let through = plan.allocate_alias(&join.table);
    let on = pairs_eq(&through, &join.left_keys, parent_alias, keys.owner_keys());
    select
        .joins
        .push(Join::new(join_type, join.table.as_str(), on).alias(through.as_str()));
    Ok(pairs_eq(alias, keys.target_keys(), &through, &join.right_keys))
}
