//! An in-memory row source.
//!
//! `MemoryDatabase` evaluates the [`Select`] AST directly against tables
//! held in memory: joins, filters, `ROW_NUMBER()` windows, ordering,
//! `DISTINCT`/`DISTINCT ON`, derived tables and LIMIT/OFFSET. Every
//! executed query is rendered to SQL and logged so callers can assert on
//! the number and shape of queries issued.

use crate::clause::{OrderBy, OrderDirection};
use crate::expr::{BinaryOp, Dialect, Expr};
use crate::select::{Distinct, FromItem, Select, SelectItem};
use crate::source::RowSource;
use relgraph_core::{ColumnInfo, Error, Key, QueryError, QueryErrorKind, Result, Row, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Table {
    columns: Arc<ColumnInfo>,
    rows: Vec<Vec<Value>>,
}

/// One table's row within an evaluation scope.
#[derive(Debug, Clone)]
struct Binding {
    name: String,
    columns: Arc<ColumnInfo>,
    values: Vec<Value>,
}

impl Binding {
    fn get(&self, column: &str) -> Option<Value> {
        self.columns
            .index_of(column)
            .and_then(|i| self.values.get(i))
            .cloned()
    }
}

type Scope = Vec<Binding>;

/// In-memory tables plus a log of executed queries.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: HashMap<String, Table>,
    dialect: Dialect,
    log: Mutex<Vec<String>>,
    fail_pattern: Mutex<Option<String>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render logged SQL in `dialect`.
    #[must_use]
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Builder form of [`create_table`](Self::create_table) + inserts.
    #[must_use]
    pub fn with_table<C, S>(mut self, name: &str, columns: C, rows: Vec<Vec<Value>>) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.create_table(name, columns);
        if let Some(table) = self.tables.get_mut(name) {
            table.rows.extend(rows);
        }
        self
    }

    /// Create (or replace) an empty table.
    pub fn create_table<C, S>(&mut self, name: &str, columns: C)
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = columns.into_iter().map(Into::into).collect();
        self.tables.insert(
            name.to_string(),
            Table {
                columns: Arc::new(ColumnInfo::new(columns)),
                rows: Vec::new(),
            },
        );
    }

    /// Append a row. The value count must match the table's columns.
    pub fn insert(&mut self, table: &str, values: Vec<Value>) -> Result<()> {
        let t = self
            .tables
            .get_mut(table)
            .ok_or_else(|| query_error(QueryErrorKind::NotFound, format!("no table '{table}'")))?;
        if values.len() != t.columns.len() {
            return Err(query_error(
                QueryErrorKind::Database,
                format!(
                    "table '{}' has {} columns but {} values were supplied",
                    table,
                    t.columns.len(),
                    values.len()
                ),
            ));
        }
        t.rows.push(values);
        Ok(())
    }

    /// Make every query whose SQL contains `pattern` fail, until cleared.
    pub fn fail_when_sql_contains(&self, pattern: impl Into<String>) {
        *lock(&self.fail_pattern) = Some(pattern.into());
    }

    pub fn clear_failure(&self) {
        *lock(&self.fail_pattern) = None;
    }

    /// Number of queries executed so far.
    pub fn query_count(&self) -> usize {
        lock(&self.log).len()
    }

    /// SQL of every query executed so far, in order.
    pub fn queries(&self) -> Vec<String> {
        lock(&self.log).clone()
    }

    pub fn clear_log(&self) {
        lock(&self.log).clear();
    }

    /// Evaluate a query without logging it.
    pub fn execute(&self, query: &Select) -> Result<Vec<Row>> {
        let mut scopes = self.source_scopes(&query.from)?;

        for join in &query.joins {
            let table = self.table(&join.table)?;
            let name = join.reference_name().to_string();
            let mut joined = Vec::with_capacity(scopes.len());
            for scope in scopes {
                let mut matched = false;
                for values in &table.rows {
                    let mut candidate = scope.clone();
                    candidate.push(Binding {
                        name: name.clone(),
                        columns: Arc::clone(&table.columns),
                        values: values.clone(),
                    });
                    if truthy(&eval(&join.on, &candidate)?) == Some(true) {
                        matched = true;
                        joined.push(candidate);
                    }
                }
                if !matched && join.join_type == crate::join::JoinType::Left {
                    let mut padded = scope;
                    padded.push(Binding {
                        name: name.clone(),
                        columns: Arc::clone(&table.columns),
                        values: vec![Value::Null; table.columns.len()],
                    });
                    joined.push(padded);
                }
            }
            scopes = joined;
        }

        if let Some(filter) = &query.filter {
            let mut kept = Vec::with_capacity(scopes.len());
            for scope in scopes {
                if truthy(&eval(filter, &scope)?) == Some(true) {
                    kept.push(scope);
                }
            }
            scopes = kept;
        }

        // Window values are computed over the filtered set, before ordering.
        let mut windows: Vec<Option<Vec<Value>>> = Vec::with_capacity(query.items.len());
        for item in &query.items {
            match item {
                SelectItem::Expr {
                    expr:
                        Expr::Window {
                            partition_by,
                            order_by,
                            ..
                        },
                    ..
                } => windows.push(Some(row_numbers(&scopes, partition_by, order_by)?)),
                SelectItem::Expr { expr, .. } if expr.has_window() => {
                    return Err(Error::unsupported(
                        "window functions must be top-level SELECT items",
                    ));
                }
                _ => windows.push(None),
            }
        }

        let mut order: Vec<usize> = (0..scopes.len()).collect();
        if !query.order_by.is_empty() {
            let keys = order_keys(&scopes, &query.order_by)?;
            order.sort_by(|&a, &b| compare_keys(&keys[a], &keys[b], &query.order_by));
        }

        if let Distinct::On(exprs) = &query.distinct {
            let mut seen = HashSet::new();
            let mut kept = Vec::with_capacity(order.len());
            for i in order {
                let key = Key::new(
                    exprs
                        .iter()
                        .map(|e| eval(e, &scopes[i]))
                        .collect::<Result<Vec<_>>>()?,
                );
                if seen.insert(key) {
                    kept.push(i);
                }
            }
            order = kept;
        }

        let mut rows = Vec::with_capacity(order.len());
        for i in order {
            rows.push(project(&query.items, &scopes[i], &windows, i)?);
        }

        if query.distinct == Distinct::All {
            let mut seen = HashSet::new();
            rows.retain(|row| seen.insert(Key::new(row.values().cloned().collect())));
        }

        let offset = query.offset.unwrap_or(0) as usize;
        let rows = rows.into_iter().skip(offset);
        Ok(match query.limit {
            Some(n) => rows.take(n as usize).collect(),
            None => rows.collect(),
        })
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| {
            query_error(
                QueryErrorKind::NotFound,
                format!("relation \"{name}\" does not exist"),
            )
        })
    }

    fn source_scopes(&self, from: &FromItem) -> Result<Vec<Scope>> {
        match from {
            FromItem::Table { name, .. } => {
                let table = self.table(name)?;
                let reference = from.reference_name().to_string();
                Ok(table
                    .rows
                    .iter()
                    .map(|values| {
                        vec![Binding {
                            name: reference.clone(),
                            columns: Arc::clone(&table.columns),
                            values: values.clone(),
                        }]
                    })
                    .collect())
            }
            FromItem::Subquery { query, alias } => Ok(self
                .execute(query)?
                .into_iter()
                .map(|row| {
                    vec![Binding {
                        name: alias.clone(),
                        columns: row.column_info(),
                        values: row.values().cloned().collect(),
                    }]
                })
                .collect()),
        }
    }
}

impl RowSource for MemoryDatabase {
    fn each_row(&self, query: &Select, f: &mut dyn FnMut(Row) -> Result<()>) -> Result<()> {
        let (sql, params) = query.to_sql_with_dialect(self.dialect);
        tracing::debug!(sql = %sql, params = params.len(), "memory query");
        lock(&self.log).push(sql.clone());

        let failing = lock(&self.fail_pattern)
            .as_ref()
            .is_some_and(|p| sql.contains(p.as_str()));
        if failing {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: Some(sql),
                message: "injected failure".to_string(),
                source: None,
            }));
        }

        let rows = self.execute(query).map_err(|e| match e {
            Error::Query(mut q) => {
                q.sql = Some(sql.clone());
                Error::Query(q)
            }
            other => other,
        })?;
        tracing::trace!(rows = rows.len(), "memory query complete");
        for row in rows {
            f(row)?;
        }
        Ok(())
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn query_error(kind: QueryErrorKind, message: String) -> Error {
    Error::Query(QueryError {
        kind,
        sql: None,
        message,
        source: None,
    })
}

fn project(
    items: &[SelectItem],
    scope: &[Binding],
    windows: &[Option<Vec<Value>>],
    index: usize,
) -> Result<Row> {
    fn push_binding(b: &Binding, names: &mut Vec<String>, values: &mut Vec<Value>) {
        names.extend(b.columns.names().iter().cloned());
        values.extend(b.values.iter().cloned());
    }

    let mut names = Vec::new();
    let mut values = Vec::new();

    if items.is_empty() {
        for b in scope {
            push_binding(b, &mut names, &mut values);
        }
        return Ok(Row::new(names, values));
    }

    for (i, item) in items.iter().enumerate() {
        match item {
            SelectItem::Wildcard { table: None } => {
                for b in scope {
                    push_binding(b, &mut names, &mut values);
                }
            }
            SelectItem::Wildcard { table: Some(t) } => {
                let b = scope.iter().find(|b| &b.name == t).ok_or_else(|| {
                    query_error(
                        QueryErrorKind::NotFound,
                        format!("missing FROM-clause entry for table \"{t}\""),
                    )
                })?;
                push_binding(b, &mut names, &mut values);
            }
            SelectItem::Expr { expr, .. } => {
                let value = match windows.get(i).and_then(Option::as_ref) {
                    Some(column) => column[index].clone(),
                    None => eval(expr, scope)?,
                };
                names.push(item.output_name().unwrap_or("?column?").to_string());
                values.push(value);
            }
        }
    }
    Ok(Row::new(names, values))
}

fn row_numbers(
    scopes: &[Scope],
    partition_by: &[Expr],
    order_by: &[OrderBy],
) -> Result<Vec<Value>> {
    let mut partitions: HashMap<Key, Vec<usize>> = HashMap::new();
    for (i, scope) in scopes.iter().enumerate() {
        let key = Key::new(
            partition_by
                .iter()
                .map(|e| eval(e, scope))
                .collect::<Result<Vec<_>>>()?,
        );
        partitions.entry(key).or_default().push(i);
    }
    let keys = order_keys(scopes, order_by)?;
    let mut numbers = vec![Value::Null; scopes.len()];
    for members in partitions.values_mut() {
        members.sort_by(|&a, &b| compare_keys(&keys[a], &keys[b], order_by));
        for (n, &i) in members.iter().enumerate() {
            numbers[i] = Value::BigInt(n as i64 + 1);
        }
    }
    Ok(numbers)
}

fn order_keys(scopes: &[Scope], order_by: &[OrderBy]) -> Result<Vec<Vec<Value>>> {
    scopes
        .iter()
        .map(|scope| order_by.iter().map(|o| eval(&o.expr, scope)).collect())
        .collect()
}

// NULLs sort last ascending and first descending.
fn compare_keys(a: &[Value], b: &[Value], order_by: &[OrderBy]) -> Ordering {
    for ((x, y), o) in a.iter().zip(b).zip(order_by) {
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => x.sql_cmp(y).unwrap_or(Ordering::Equal),
        };
        let ord = match o.direction {
            OrderDirection::Asc => ord,
            OrderDirection::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn truthy(value: &Value) -> Option<bool> {
    if value.is_null() {
        None
    } else {
        value.as_bool()
    }
}

fn lookup(scope: &[Binding], table: Option<&str>, name: &str) -> Result<Value> {
    let found = match table {
        Some(t) => scope
            .iter()
            .find(|b| b.name == t)
            .ok_or_else(|| {
                query_error(
                    QueryErrorKind::NotFound,
                    format!("missing FROM-clause entry for table \"{t}\""),
                )
            })?
            .get(name),
        None => scope.iter().find_map(|b| b.get(name)),
    };
    found.ok_or_else(|| {
        let full = table.map_or_else(|| name.to_string(), |t| format!("{t}.{name}"));
        query_error(
            QueryErrorKind::NotFound,
            format!("column \"{full}\" does not exist"),
        )
    })
}

fn eval_row(expr: &Expr, scope: &[Binding]) -> Result<Vec<Value>> {
    match expr {
        Expr::Tuple(items) => items.iter().map(|e| eval(e, scope)).collect(),
        other => Ok(vec![eval(other, scope)?]),
    }
}

// Three-valued row equality: `None` when the answer is unknown (NULLs).
fn rows_equal(a: &[Value], b: &[Value]) -> Option<bool> {
    if a.len() != b.len() {
        return Some(false);
    }
    let mut unknown = false;
    for (x, y) in a.iter().zip(b) {
        if x.is_null() || y.is_null() {
            unknown = true;
            continue;
        }
        if x.sql_cmp(y) != Some(Ordering::Equal) {
            return Some(false);
        }
    }
    if unknown { None } else { Some(true) }
}

fn eval(expr: &Expr, scope: &[Binding]) -> Result<Value> {
    match expr {
        Expr::Column { table, name } => lookup(scope, table.as_deref(), name),
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Binary { left, op, right } if op.is_logical() => {
            let l = truthy(&eval(left, scope)?);
            let r = truthy(&eval(right, scope)?);
            let out = match op {
                BinaryOp::And => match (l, r) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                },
                _ => match (l, r) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                },
            };
            Ok(out.map_or(Value::Null, Value::Bool))
        }
        Expr::Binary { left, op, right } => {
            let l = eval(left, scope)?;
            let r = eval(right, scope)?;
            Ok(match l.sql_cmp(&r) {
                None => Value::Null,
                Some(ord) => Value::Bool(match op {
                    BinaryOp::Eq => ord == Ordering::Equal,
                    BinaryOp::Ne => ord != Ordering::Equal,
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Le => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    BinaryOp::Ge => ord != Ordering::Less,
                    BinaryOp::And | BinaryOp::Or => false,
                }),
            })
        }
        Expr::Not(inner) => {
            Ok(truthy(&eval(inner, scope)?).map_or(Value::Null, |b| Value::Bool(!b)))
        }
        Expr::In {
            expr,
            values,
            negated,
        } => {
            let lhs = eval_row(expr, scope)?;
            let mut found = false;
            let mut unknown = false;
            for candidate in values {
                match rows_equal(&lhs, &eval_row(candidate, scope)?) {
                    Some(true) => {
                        found = true;
                        break;
                    }
                    Some(false) => {}
                    None => unknown = true,
                }
            }
            let result = if found {
                Some(true)
            } else if unknown {
                None
            } else {
                Some(false)
            };
            Ok(result.map_or(Value::Null, |b| Value::Bool(b != *negated)))
        }
        Expr::IsNull { expr, negated } => Ok(Value::Bool(eval(expr, scope)?.is_null() != *negated)),
        Expr::Tuple(_) => Err(Error::unsupported("row value outside of IN")),
        Expr::Window { .. } => Err(Error::unsupported(
            "window function outside of the SELECT list",
        )),
        Expr::Raw(sql) => Err(Error::unsupported(format!(
            "raw SQL fragment '{sql}' cannot be evaluated in memory"
        ))),
    }
}
