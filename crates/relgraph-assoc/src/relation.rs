//! The relation capability and the `Dataset` that implements it.

use crate::eager;
use crate::graph::GraphPlan;
use crate::graph::assembler::GraphAssembler;
use crate::graph::planner;
use crate::include::Include;
use crate::registry::Registry;
use relgraph_core::{Error, ModelDef, RecordRef, Result, Row, Value};
use relgraph_query::{Expr, FromItem, Join, JoinType, OrderBy, RowSource, Select, SelectItem};
use std::fmt;
use std::sync::Arc;

/// A composable, lazily executed query over one model.
///
/// The query augmenter is written against this trait: every method returns
/// a modified relation without running anything, except `each_row`.
pub trait Relation: Sized {
    /// Name columns of the base table are qualified with.
    fn reference_name(&self) -> &str;

    /// Output column names, in order.
    fn columns(&self) -> Vec<String>;

    /// Restrict the projection to `columns` of the base table.
    fn select_columns(self, columns: &[String]) -> Self;

    /// Add a WHERE predicate (ANDed with existing ones).
    fn filter(self, predicate: Expr) -> Self;

    /// Append ORDER BY items.
    fn order(self, order: &[OrderBy]) -> Self;

    /// Set LIMIT and OFFSET.
    fn limit_offset(self, limit: u64, offset: Option<u64>) -> Self;

    /// Make the query DISTINCT.
    fn distinct(self) -> Self;

    /// Eager load an association on every returned record.
    fn eager(self, include: Include) -> Self;

    /// Join another table. Fails if the table reference is already used.
    fn join_table(
        self,
        join_type: JoinType,
        table: &str,
        on: Expr,
        alias: Option<&str>,
    ) -> Result<Self>;

    /// Run the query and stream its rows.
    fn each_row(&self, source: &dyn RowSource, f: &mut dyn FnMut(Row) -> Result<()>)
    -> Result<()>;
}

/// A query over one model, carrying batch eager includes and, once
/// `eager_graph` is used, the graph join plan.
#[derive(Clone)]
pub struct Dataset {
    pub(crate) registry: Registry,
    pub(crate) model: Arc<ModelDef>,
    pub(crate) select: Select,
    pub(crate) includes: Vec<Include>,
    pub(crate) graph: Option<GraphPlan>,
    /// Root query the graph joins are laid over. Root pagination applied
    /// after `eager_graph` lands here, not on the joined query.
    pub(crate) graph_root: Option<Box<Select>>,
}

impl Dataset {
    /// Every row of `model`.
    pub fn new(registry: Registry, model: Arc<ModelDef>) -> Self {
        let select = Select::from_table(model.table_name());
        Self {
            registry,
            model,
            select,
            includes: Vec::new(),
            graph: None,
            graph_root: None,
        }
    }

    pub fn model(&self) -> &Arc<ModelDef> {
        &self.model
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The query as built so far.
    pub fn query(&self) -> &Select {
        &self.select
    }

    pub fn includes(&self) -> &[Include] {
        &self.includes
    }

    /// The graph join plan, if `eager_graph` has been used.
    pub fn graph(&self) -> Option<&GraphPlan> {
        self.graph.as_ref()
    }

    /// SQL text and parameters in the registry's dialect.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        self.select
            .to_sql_with_dialect(self.registry.config().dialect)
    }

    // ==================== Query Building ====================

    /// Add a WHERE predicate.
    ///
    /// On a graph joined dataset, a predicate over root columns only also
    /// restricts the root query, so later root pagination sees it.
    #[must_use]
    pub fn filter(mut self, predicate: Expr) -> Self {
        if let Some(root) = self.graph_root.as_deref_mut() {
            if references_only(&predicate, self.select.reference_name()) {
                *root = root.clone().filter(predicate.clone());
            }
        }
        self.select = self.select.filter(predicate);
        self
    }

    /// Add `table.column = value` on the base table.
    #[must_use]
    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        let column = Expr::qualified(self.select.reference_name(), column);
        self.filter(column.eq(value.into()))
    }

    /// Append an ORDER BY item. On a graph joined dataset the item orders
    /// roots, ahead of the association orders.
    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        match self.graph_root.as_deref_mut() {
            Some(root) => {
                let at = root.order_by.len().min(self.select.order_by.len());
                let qualified = order.clone().qualify(self.select.reference_name());
                self.select.order_by.insert(at, qualified);
                root.order_by.push(order);
            }
            None => self.select = self.select.order_by(order),
        }
        self
    }

    /// Limit the number of records returned.
    ///
    /// On a graph joined dataset this limits roots: the root query moves
    /// into a derived table so joined rows never count against it.
    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        match self.graph_root.as_deref_mut() {
            Some(root) => {
                root.limit = Some(n);
                self.paginate_graph_root();
            }
            None => self.select = self.select.limit(n),
        }
        self
    }

    #[must_use]
    pub fn offset(mut self, n: u64) -> Self {
        match self.graph_root.as_deref_mut() {
            Some(root) => {
                root.offset = Some(n);
                self.paginate_graph_root();
            }
            None => self.select = self.select.offset(n),
        }
        self
    }

    // Replace the joined query's FROM with the paginated root query. The
    // derived table keeps the root's reference name, so joins, select items
    // and filters stay valid.
    fn paginate_graph_root(&mut self) {
        let Some(root) = &self.graph_root else {
            return;
        };
        let reference = self.select.reference_name().to_string();
        self.select.from = FromItem::Subquery {
            query: root.clone(),
            alias: reference.clone(),
        };
        let roots = root.order_by.len().min(self.select.order_by.len());
        for order in &mut self.select.order_by[..roots] {
            *order = order.clone().qualify(&reference);
        }
        tracing::debug!(table = %reference, "paginated graph root in a derived table");
    }

    /// Select only these base table columns. Must be called before
    /// `eager_graph`; afterwards the graph owns the projection.
    #[must_use]
    pub fn select_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.graph.is_some() {
            tracing::warn!(
                model = %self.model.name(),
                "select_columns ignored on a graph joined dataset"
            );
            return self;
        }
        let table = self.select.reference_name().to_string();
        let items = columns
            .into_iter()
            .map(|c| SelectItem::Expr {
                expr: Expr::qualified(table.as_str(), c),
                alias: None,
            })
            .collect();
        self.select = self.select.items(items);
        self
    }

    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.select = self.select.distinct();
        self
    }

    /// Batch eager load an association on the returned records.
    #[must_use]
    pub fn eager(mut self, include: impl Into<Include>) -> Self {
        self.includes.push(include.into());
        self
    }

    /// Batch eager load a dotted association path such as
    /// `"albums.tracks"`. Empty paths are ignored.
    #[must_use]
    pub fn eager_path(self, path: &str) -> Self {
        match Include::path(path) {
            Some(include) => self.eager(include),
            None => self,
        }
    }

    /// Load an association (and its nested includes) through joins in the
    /// same query.
    ///
    /// Plans the joins immediately, so unknown associations fail here
    /// rather than when the query runs.
    pub fn eager_graph(mut self, include: impl Into<Include>) -> Result<Self> {
        let include = include.into();
        let mut plan = match self.graph.take() {
            Some(plan) => plan,
            None => {
                self.graph_root = Some(Box::new(self.select.clone()));
                planner::start(&self.model, &mut self.select)
            }
        };
        planner::plan_include(&self.registry, &mut plan, &mut self.select, 0, &include)?;
        self.graph = Some(plan);
        Ok(self)
    }

    /// Join another table. An alias (or table name, when unaliased) that is
    /// already used by the query is a join planning error.
    pub fn join_table(
        mut self,
        join_type: JoinType,
        table: &str,
        on: Expr,
        alias: Option<&str>,
    ) -> Result<Self> {
        let reference = alias.unwrap_or(table);
        let taken = self.select.reference_names().contains(&reference)
            || self.graph.as_ref().is_some_and(|g| g.alias_taken(reference));
        if taken {
            return Err(Error::join_planning(
                Some(reference),
                "table reference is already used by this query",
            ));
        }
        let mut join = Join::new(join_type, table, on);
        if let Some(alias) = alias {
            join = join.alias(alias);
        }
        self.select = self.select.join(join);
        if let Some(plan) = &mut self.graph {
            plan.reserve_alias(reference);
        }
        Ok(self)
    }

    // ==================== Execution ====================

    /// Run the query, build records and eager load every include.
    #[tracing::instrument(level = "debug", skip(self, source), fields(model = %self.model.name()))]
    pub fn all(&self, source: &dyn RowSource) -> Result<Vec<RecordRef>> {
        let roots = match &self.graph {
            Some(plan) => {
                let mut assembler = GraphAssembler::new(plan);
                source.each_row(&self.select, &mut |row| assembler.push(&row))?;
                assembler.finish()?
            }
            None => {
                let mut records = Vec::new();
                source.each_row(&self.select, &mut |row| {
                    records.push(self.model.instantiate(row)?);
                    Ok(())
                })?;
                records
            }
        };
        tracing::debug!(records = roots.len(), "dataset loaded");
        if !self.includes.is_empty() {
            eager::load_includes(&self.registry, &self.model, &roots, &self.includes, source)?;
        }
        Ok(roots)
    }

    /// First record, if any.
    pub fn first(&self, source: &dyn RowSource) -> Result<Option<RecordRef>> {
        Ok(self.clone().limit(1).all(source)?.into_iter().next())
    }

    /// Call `f` for each record. Streams when nothing needs eager loading.
    pub fn each(
        &self,
        source: &dyn RowSource,
        f: &mut dyn FnMut(RecordRef) -> Result<()>,
    ) -> Result<()> {
        if self.graph.is_none() && self.includes.is_empty() {
            return source.each_row(&self.select, &mut |row| f(self.model.instantiate(row)?));
        }
        for record in self.all(source)? {
            f(record)?;
        }
        Ok(())
    }
}

impl Relation for Dataset {
    fn reference_name(&self) -> &str {
        self.select.reference_name()
    }

    fn columns(&self) -> Vec<String> {
        if self.select.items.is_empty() {
            return self.model.column_names().to_vec();
        }
        let reference = self.select.reference_name();
        let mut columns = Vec::new();
        for item in &self.select.items {
            match item {
                SelectItem::Wildcard { table } => {
                    if table.as_deref().is_none_or(|t| t == reference) {
                        columns.extend(self.model.column_names().iter().cloned());
                    }
                }
                other => {
                    if let Some(name) = other.output_name() {
                        columns.push(name.to_string());
                    }
                }
            }
        }
        columns
    }

    fn select_columns(self, columns: &[String]) -> Self {
        Dataset::select_columns(self, columns.iter().cloned())
    }

    fn filter(self, predicate: Expr) -> Self {
        Dataset::filter(self, predicate)
    }

    fn order(mut self, order: &[OrderBy]) -> Self {
        for o in order {
            self = self.order_by(o.clone());
        }
        self
    }

    fn limit_offset(self, limit: u64, offset: Option<u64>) -> Self {
        let ds = self.limit(limit);
        match offset {
            Some(n) => ds.offset(n),
            None => ds,
        }
    }

    fn distinct(self) -> Self {
        Dataset::distinct(self)
    }

    fn eager(self, include: Include) -> Self {
        Dataset::eager(self, include)
    }

    fn join_table(
        self,
        join_type: JoinType,
        table: &str,
        on: Expr,
        alias: Option<&str>,
    ) -> Result<Self> {
        Dataset::join_table(self, join_type, table, on, alias)
    }

    fn each_row(
        &self,
        source: &dyn RowSource,
        f: &mut dyn FnMut(Row) -> Result<()>,
    ) -> Result<()> {
        source.each_row(&self.select, f)
    }
}

// Whether every column `expr` mentions belongs to `reference`. Unqualified
// columns resolve against the base table.
fn references_only(expr: &Expr, reference: &str) -> bool {
    let mut only = true;
    let _ = expr.clone().map_columns(&mut |table, name| {
        if table.as_deref().is_some_and(|t| t != reference) {
            only = false;
        }
        (table, name)
    });
    only
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("model", &self.model.name())
            .field("sql", &self.to_sql().0)
            .field("includes", &self.includes)
            .field("graph", &self.graph.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relgraph_query::MemoryDatabase;

    fn setup() -> (Registry, MemoryDatabase) {
        let registry = Registry::new();
        registry
            .register_model(ModelDef::new("Album").columns(["id", "band_id", "title"]))
            .unwrap();
        let db = MemoryDatabase::new().with_table(
            "albums",
            ["id", "band_id", "title"],
            vec![
                vec![Value::Int(1), Value::Int(2), Value::from("Low")],
                vec![Value::Int(2), Value::Int(2), Value::from("Heroes")],
                vec![Value::Int(3), Value::Int(9), Value::from("Lodger")],
            ],
        );
        (registry, db)
    }

    #[test]
    fn test_all_and_filter() {
        let (registry, db) = setup();
        let ds = registry.dataset("Album").unwrap().where_eq("band_id", 2i64);
        let albums = ds.all(&db).unwrap();
        assert_eq!(albums.len(), 2);
        assert_eq!(albums[1].get("title"), Some(Value::from("Heroes")));
        assert_eq!(db.query_count(), 1);
    }

    #[test]
    fn test_first_and_each() {
        let (registry, db) = setup();
        let ds = registry
            .dataset("Album")
            .unwrap()
            .order_by(OrderBy::desc("id"));
        let first = ds.first(&db).unwrap().unwrap();
        assert_eq!(first.get("id"), Some(Value::Int(3)));

        let mut seen = Vec::new();
        ds.each(&db, &mut |r| {
            seen.push(r.get("id").and_then(|v| v.as_i64()).unwrap_or_default());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![3, 2, 1]);
    }

    #[test]
    fn test_columns() {
        let (registry, _) = setup();
        let ds = registry.dataset("Album").unwrap();
        assert_eq!(ds.columns(), vec!["id", "band_id", "title"]);
        let ds = ds.select_columns(["id", "title"]);
        assert_eq!(ds.columns(), vec!["id", "title"]);
    }

    #[test]
    fn test_join_table_alias_collision() {
        let (registry, _) = setup();
        let ds = registry.dataset("Album").unwrap();
        let on = Expr::qualified("b", "id").eq(Expr::qualified("albums", "band_id"));
        let ds = ds
            .join_table(JoinType::Inner, "bands", on.clone(), Some("b"))
            .unwrap();
        let err = ds
            .clone()
            .join_table(JoinType::Inner, "bands", on, Some("b"))
            .unwrap_err();
        assert!(err.is_join_planning());
        let err = ds
            .join_table(
                JoinType::Inner,
                "albums",
                Expr::lit(true),
                None,
            )
            .unwrap_err();
        assert!(err.is_join_planning());
    }

    #[test]
    fn test_eager_path_ignores_empty() {
        let (registry, _) = setup();
        let ds = registry.dataset("Album").unwrap().eager_path(" . ");
        assert!(ds.includes().is_empty());
        let ds = ds.eager_path("band.members");
        assert_eq!(ds.includes().len(), 1);
    }

    #[test]
    fn test_to_sql() {
        let (registry, _) = setup();
        let (sql, params) = registry
            .dataset("Album")
            .unwrap()
            .where_eq("id", 1i64)
            .limit(1)
            .to_sql();
        assert_eq!(
            sql,
            "SELECT * FROM \"albums\" WHERE \"albums\".\"id\" = $1 LIMIT 1"
        );
        assert_eq!(params, vec![Value::BigInt(1)]);
    }
}
