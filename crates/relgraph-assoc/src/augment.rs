//! Shaping a target relation with an association's options.

use crate::descriptor::AssociationDescriptor;
use crate::include::Include;
use crate::options::Projection;
use crate::relation::Relation;

/// Whether the relation serves one owner or a batch of owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// One owner: the association's limit applies directly, and scalar
    /// associations are limited to one row.
    Single,
    /// Many owners at once: limits are left to the eager limit strategy.
    Batch,
}

/// Apply `descriptor`'s select, conditions, order, limit, nested eager
/// includes and distinct to `relation`, in that order.
///
/// Builds only; nothing is executed.
pub fn augment<R: Relation>(
    descriptor: &AssociationDescriptor,
    relation: R,
    nested: &[Include],
    scope: Scope,
) -> R {
    let options = descriptor.options();
    let table = relation.reference_name().to_string();
    let mut relation = relation;

    if let Projection::Columns(columns) = options.projection() {
        relation = relation.select_columns(columns);
    }

    for condition in options.conditions() {
        if let Some(expr) = condition.to_expr(&table) {
            relation = relation.filter(expr);
        }
    }

    if !options.order_by().is_empty() {
        let order: Vec<_> = options
            .order_by()
            .iter()
            .map(|o| o.clone().qualify(&table))
            .collect();
        relation = relation.order(&order);
    }

    if scope == Scope::Single {
        if !descriptor.is_collection() {
            relation = relation.limit_offset(1, options.offset_value());
        } else if let Some(limit) = options.limit_value() {
            relation = relation.limit_offset(limit, options.offset_value());
        }
    }

    for include in options.default_eager().iter().chain(nested) {
        relation = relation.eager(include.clone());
    }

    if options.is_distinct() {
        relation = relation.distinct();
    }

    relation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::AssociationKind;
    use crate::options::AssociationOptions;
    use crate::registry::Registry;
    use relgraph_core::ModelDef;
    use relgraph_query::{Expr, OrderBy};

    fn registry() -> Registry {
        let registry = Registry::new();
        registry
            .register_model(ModelDef::new("Album").columns(["id", "band_id", "title"]))
            .unwrap();
        registry
            .register_model(
                ModelDef::new("Track").columns(["id", "album_id", "position", "live"]),
            )
            .unwrap();
        registry
            .register_model(ModelDef::new("Band").columns(["id", "name"]))
            .unwrap();
        registry
    }

    #[test]
    fn test_augment_single_collection() {
        let registry = registry();
        let d = registry
            .associate(
                "Album",
                AssociationKind::OneToMany,
                "tracks",
                AssociationOptions::new()
                    .select(["id", "album_id", "position"])
                    .condition("live", false)
                    .predicate(Expr::col("position").gt(0i64))
                    .order(OrderBy::asc("position"))
                    .limit(2)
                    .offset(1)
                    .eager(crate::include::Include::new("writers"))
                    .distinct(),
            )
            .unwrap();
        let ds = augment(
            &d,
            registry.dataset("Track").unwrap(),
            &[crate::include::Include::new("album")],
            Scope::Single,
        );
        let (sql, params) = ds.to_sql();
        assert_eq!(
            sql,
            "SELECT DISTINCT \"tracks\".\"id\", \"tracks\".\"album_id\", \"tracks\".\"position\" \
             FROM \"tracks\" WHERE \"tracks\".\"live\" = $1 AND \"tracks\".\"position\" > $2 \
             ORDER BY \"tracks\".\"position\" ASC LIMIT 2 OFFSET 1"
        );
        assert_eq!(params.len(), 2);
        let names: Vec<_> = ds.includes().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["writers", "album"]);
    }

    #[test]
    fn test_augment_batch_leaves_limit() {
        let registry = registry();
        let d = registry
            .associate(
                "Album",
                AssociationKind::OneToMany,
                "tracks",
                AssociationOptions::new().limit(2),
            )
            .unwrap();
        let ds = augment(&d, registry.dataset("Track").unwrap(), &[], Scope::Batch);
        assert!(ds.query().limit.is_none());
    }

    #[test]
    fn test_augment_scalar_forces_limit_one() {
        let registry = registry();
        let d = registry
            .associate(
                "Album",
                AssociationKind::ManyToOne,
                "band",
                AssociationOptions::new().limit(5),
            )
            .unwrap();
        let ds = augment(&d, registry.dataset("Band").unwrap(), &[], Scope::Single);
        assert_eq!(ds.query().limit, Some(1));
    }
}
