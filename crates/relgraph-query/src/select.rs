//! SELECT query builder.

use crate::clause::OrderBy;
use crate::expr::{Dialect, Expr};
use crate::join::Join;
use relgraph_core::Value;

/// The FROM item of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    /// A base table, optionally aliased.
    Table { name: String, alias: Option<String> },
    /// A derived table. Derived tables always carry an alias.
    Subquery { query: Box<Select>, alias: String },
}

impl FromItem {
    /// The name columns of this item are qualified with.
    pub fn reference_name(&self) -> &str {
        match self {
            FromItem::Table { name, alias } => alias.as_deref().unwrap_or(name),
            FromItem::Subquery { alias, .. } => alias,
        }
    }
}

/// One entry of the SELECT list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*` or `table.*`
    Wildcard { table: Option<String> },
    /// An expression with an optional output name.
    Expr { expr: Expr, alias: Option<String> },
}

impl SelectItem {
    /// Output name of this item, if it produces exactly one named column.
    pub fn output_name(&self) -> Option<&str> {
        match self {
            SelectItem::Wildcard { .. } => None,
            SelectItem::Expr { alias: Some(a), .. } => Some(a),
            SelectItem::Expr {
                expr: Expr::Column { name, .. },
                alias: None,
            } => Some(name),
            SelectItem::Expr { .. } => None,
        }
    }
}

/// DISTINCT mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Distinct {
    #[default]
    No,
    /// `SELECT DISTINCT`
    All,
    /// `SELECT DISTINCT ON (exprs)`: first row per distinct value.
    On(Vec<Expr>),
}

/// A SELECT query.
///
/// Fields are public so row sources can interpret the query; use the
/// builder methods to construct one.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub from: FromItem,
    /// SELECT list. Empty means `*`.
    pub items: Vec<SelectItem>,
    pub joins: Vec<Join>,
    pub filter: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub distinct: Distinct,
}

impl Select {
    fn with_from(from: FromItem) -> Self {
        Self {
            from,
            items: Vec::new(),
            joins: Vec::new(),
            filter: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: Distinct::No,
        }
    }

    /// `SELECT * FROM table`
    pub fn from_table(table: impl Into<String>) -> Self {
        Self::with_from(FromItem::Table {
            name: table.into(),
            alias: None,
        })
    }

    /// `SELECT * FROM (query) AS alias`
    pub fn from_subquery(query: Select, alias: impl Into<String>) -> Self {
        Self::with_from(FromItem::Subquery {
            query: Box::new(query),
            alias: alias.into(),
        })
    }

    /// Alias the FROM table. No effect on a derived table.
    #[must_use]
    pub fn from_alias(mut self, new_alias: impl Into<String>) -> Self {
        if let FromItem::Table { alias, .. } = &mut self.from {
            *alias = Some(new_alias.into());
        }
        self
    }

    /// The name FROM columns are qualified with.
    pub fn reference_name(&self) -> &str {
        self.from.reference_name()
    }

    /// Every table reference name in the query (FROM then joins).
    pub fn reference_names(&self) -> Vec<&str> {
        std::iter::once(self.from.reference_name())
            .chain(self.joins.iter().map(Join::reference_name))
            .collect()
    }

    /// Append a column or expression to the SELECT list.
    #[must_use]
    pub fn column(mut self, expr: Expr, alias: Option<String>) -> Self {
        self.items.push(SelectItem::Expr { expr, alias });
        self
    }

    /// Append `table.*` (or `*`) to the SELECT list.
    #[must_use]
    pub fn wildcard(mut self, table: Option<String>) -> Self {
        self.items.push(SelectItem::Wildcard { table });
        self
    }

    /// Replace the SELECT list.
    #[must_use]
    pub fn items(mut self, items: Vec<SelectItem>) -> Self {
        self.items = items;
        self
    }

    /// Add a WHERE condition (ANDed with any existing one).
    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Add ORDER BY clause.
    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Put an ORDER BY item ahead of the existing ones.
    #[must_use]
    pub fn order_first(mut self, order: OrderBy) -> Self {
        self.order_by.insert(0, order);
        self
    }

    /// Add a JOIN clause.
    #[must_use]
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Set LIMIT.
    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Set OFFSET.
    #[must_use]
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Remove LIMIT and OFFSET.
    #[must_use]
    pub fn unlimited(mut self) -> Self {
        self.limit = None;
        self.offset = None;
        self
    }

    /// Make this a DISTINCT query.
    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = Distinct::All;
        self
    }

    /// Make this a DISTINCT ON query.
    #[must_use]
    pub fn distinct_on(mut self, exprs: Vec<Expr>) -> Self {
        self.distinct = Distinct::On(exprs);
        self
    }

    /// Build SQL text and parameters with the default dialect.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        self.to_sql_with_dialect(Dialect::default())
    }

    /// Build SQL text and parameters for a dialect.
    pub fn to_sql_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.build_with_dialect(dialect, &mut params);
        (sql, params)
    }

    /// Build SQL, appending bound values to `params`.
    pub fn build_with_dialect(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let mut sql = String::from("SELECT ");

        match &self.distinct {
            Distinct::No => {}
            Distinct::All => sql.push_str("DISTINCT "),
            Distinct::On(exprs) => {
                let on: Vec<_> = exprs
                    .iter()
                    .map(|e| e.build_with_dialect(dialect, params, 0))
                    .collect();
                sql.push_str(&format!("DISTINCT ON ({}) ", on.join(", ")));
            }
        }

        if self.items.is_empty() {
            sql.push('*');
        } else {
            let items: Vec<_> = self
                .items
                .iter()
                .map(|item| match item {
                    SelectItem::Wildcard { table: None } => "*".to_string(),
                    SelectItem::Wildcard { table: Some(t) } => {
                        format!("{}.*", dialect.quote_identifier(t))
                    }
                    SelectItem::Expr { expr, alias } => {
                        let expr_sql = expr.build_with_dialect(dialect, params, 0);
                        match alias {
                            Some(a) => format!("{} AS {}", expr_sql, dialect.quote_identifier(a)),
                            None => expr_sql,
                        }
                    }
                })
                .collect();
            sql.push_str(&items.join(", "));
        }

        sql.push_str(" FROM ");
        match &self.from {
            FromItem::Table { name, alias } => {
                sql.push_str(&dialect.quote_identifier(name));
                if let Some(a) = alias {
                    sql.push_str(" AS ");
                    sql.push_str(&dialect.quote_identifier(a));
                }
            }
            FromItem::Subquery { query, alias } => {
                let inner = query.build_with_dialect(dialect, params);
                sql.push_str(&format!("({}) AS {}", inner, dialect.quote_identifier(alias)));
            }
        }

        for join in &self.joins {
            sql.push_str(&join.build_with_dialect(dialect, params, 0));
        }

        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.build_with_dialect(dialect, params, 0));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let order_strs: Vec<_> = self
                .order_by
                .iter()
                .map(|o| o.build_with_dialect(dialect, params, 0))
                .collect();
            sql.push_str(&order_strs.join(", "));
        }

        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        if let Some(n) = self.offset {
            sql.push_str(&format!(" OFFSET {}", n));
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relgraph_core::Key;

    #[test]
    fn test_simple_select() {
        let (sql, params) = Select::from_table("albums").to_sql();
        assert_eq!(sql, "SELECT * FROM \"albums\"");
        assert!(params.is_empty());
    }

    #[test]
    fn test_select_with_filter_order_limit() {
        let query = Select::from_table("tracks")
            .filter(Expr::key_in(
                vec![Expr::qualified("tracks", "album_id")],
                &[Key::single(1i64), Key::single(2i64)],
            ))
            .filter(Expr::col("live").eq(false))
            .order_by(OrderBy::asc("position"))
            .limit(5)
            .offset(2);
        let (sql, params) = query.to_sql();
        assert_eq!(
            sql,
            "SELECT * FROM \"tracks\" WHERE \"tracks\".\"album_id\" IN ($1, $2) AND \"live\" = $3 \
             ORDER BY \"position\" ASC LIMIT 5 OFFSET 2"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_subquery_params_are_numbered_in_order() {
        let inner = Select::from_table("tracks")
            .wildcard(None)
            .column(
                Expr::row_number(vec![Expr::col("album_id")], vec![OrderBy::asc("id")]),
                Some("x_sequence_x".to_string()),
            )
            .filter(Expr::col("album_id").in_list(vec![1i64, 2i64]));
        let outer = Select::from_subquery(inner, "t1").filter(Expr::col("x_sequence_x").le(3i64));
        let (sql, params) = outer.to_sql();
        assert!(sql.starts_with("SELECT * FROM (SELECT *, ROW_NUMBER() OVER"));
        assert!(sql.contains("IN ($1, $2)) AS \"t1\" WHERE \"x_sequence_x\" <= $3"));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_distinct_on_and_join() {
        let query = Select::from_table("albums")
            .distinct_on(vec![Expr::qualified("albums", "band_id")])
            .join(
                Join::left(
                    "tracks",
                    Expr::qualified("t", "album_id").eq(Expr::qualified("albums", "id")),
                )
                .alias("t"),
            )
            .order_by(OrderBy::asc("band_id"));
        let (sql, _) = query.to_sql_with_dialect(Dialect::Postgres);
        assert!(sql.starts_with("SELECT DISTINCT ON (\"albums\".\"band_id\") *"));
        assert!(sql.contains("LEFT JOIN \"tracks\" AS \"t\""));
        assert_eq!(query.reference_names(), vec!["albums", "t"]);
    }

    #[test]
    fn test_output_names() {
        let aliased = SelectItem::Expr {
            expr: Expr::qualified("t", "id"),
            alias: Some("id_0".to_string()),
        };
        assert_eq!(aliased.output_name(), Some("id_0"));
        let plain = SelectItem::Expr {
            expr: Expr::qualified("t", "id"),
            alias: None,
        };
        assert_eq!(plain.output_name(), Some("id"));
        assert_eq!(SelectItem::Wildcard { table: None }.output_name(), None);
    }
}
