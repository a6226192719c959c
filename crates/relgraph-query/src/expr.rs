//! SQL expressions for query building.
//!
//! A small expression AST: enough to express association keys, filters,
//! window-function limits and join conditions. `build_with_dialect`
//! renders SQL text and collects bound parameters.

use crate::clause::{OrderBy, OrderDirection};
use relgraph_core::{Key, Value};
use serde::{Deserialize, Serialize};

/// SQL dialect for generating dialect-specific SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => relgraph_core::quote_ident(name),
            Dialect::Mysql => relgraph_core::quote_ident_mysql(name),
        }
    }

    /// Whether `SELECT DISTINCT ON (...)` is available.
    pub const fn supports_distinct_on(self) -> bool {
        matches!(self, Dialect::Postgres)
    }
}

/// A SQL expression that can be used in WHERE, ON, ORDER BY and SELECT.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference with optional table qualifier
    Column {
        /// Optional table name or alias
        table: Option<String>,
        /// Column name
        name: String,
    },

    /// Literal value
    Literal(Value),

    /// Row value, e.g. `(a, b)`
    Tuple(Vec<Expr>),

    /// Binary operation (e.g., a = b, a AND b)
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// NOT expr
    Not(Box<Expr>),

    /// IN expression
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// Window function with OVER clause
    Window {
        function: WindowFunction,
        partition_by: Vec<Expr>,
        order_by: Vec<OrderBy>,
    },

    /// Raw SQL fragment (escape hatch; not understood by `MemoryDatabase`)
    Raw(String),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Equal (=)
    Eq,
    /// Not equal (<>)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
    /// Logical AND
    And,
    /// Logical OR
    Or,
}

impl BinaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }

    pub const fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Window functions understood by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFunction {
    RowNumber,
}

impl WindowFunction {
    pub const fn as_str(self) -> &'static str {
        match self {
            WindowFunction::RowNumber => "ROW_NUMBER()",
        }
    }
}

impl Expr {
    // ==================== Constructors ====================

    /// Create an unqualified column reference.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    /// Create a table-qualified column reference.
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: column.into(),
        }
    }

    /// Create a literal value.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Create a raw SQL fragment.
    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    /// Row value from several expressions. A single element collapses to
    /// itself.
    pub fn tuple(mut items: Vec<Expr>) -> Self {
        if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::Tuple(items)
        }
    }

    /// `ROW_NUMBER() OVER (PARTITION BY ... ORDER BY ...)`
    pub fn row_number(partition_by: Vec<Expr>, order_by: Vec<OrderBy>) -> Self {
        Expr::Window {
            function: WindowFunction::RowNumber,
            partition_by,
            order_by,
        }
    }

    /// AND together every expression; `None` for an empty list.
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(|acc, e| acc.and(e))
    }

    /// Row-value membership test against a set of keys.
    ///
    /// One column renders as `col IN (v1, v2)`, several as
    /// `(a, b) IN ((1, 2), (3, 4))`.
    pub fn key_in(columns: Vec<Expr>, keys: &[Key]) -> Self {
        let values = keys
            .iter()
            .map(|k| Expr::tuple(k.values().iter().cloned().map(Expr::Literal).collect()))
            .collect();
        Expr::In {
            expr: Box::new(Expr::tuple(columns)),
            values,
            negated: false,
        }
    }

    // ==================== Comparison Operators ====================

    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other.into()),
        }
    }

    /// Equal to (=)
    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    /// Not equal to (<>)
    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    /// Less than (<)
    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    /// Less than or equal to (<=)
    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    /// Greater than (>)
    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    /// Greater than or equal to (>=)
    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    // ==================== Logical Operators ====================

    /// Logical AND
    pub fn and(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, other)
    }

    /// Logical OR
    pub fn or(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    /// Logical NOT
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    // ==================== Null Checks ====================

    /// IS NULL
    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// IS NOT NULL
    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    // ==================== IN Lists ====================

    /// IN list of values
    pub fn in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    /// NOT IN list of values
    pub fn not_in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    // ==================== Ordering ====================

    /// Create an ascending ORDER BY expression.
    pub fn asc(self) -> OrderBy {
        OrderBy {
            expr: self,
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending ORDER BY expression.
    pub fn desc(self) -> OrderBy {
        OrderBy {
            expr: self,
            direction: OrderDirection::Desc,
        }
    }

    // ==================== Rewriting ====================

    /// Qualify every unqualified column with `table`.
    #[must_use]
    pub fn qualify(self, table: &str) -> Self {
        self.map_columns(&mut |t, name| (t.or_else(|| Some(table.to_string())), name))
    }

    /// Rewrite every column reference through `f`.
    #[must_use]
    pub fn map_columns(
        self,
        f: &mut dyn FnMut(Option<String>, String) -> (Option<String>, String),
    ) -> Self {
        match self {
            Expr::Column { table, name } => {
                let (table, name) = f(table, name);
                Expr::Column { table, name }
            }
            Expr::Tuple(items) => {
                Expr::Tuple(items.into_iter().map(|e| e.map_columns(f)).collect())
            }
            Expr::Binary { left, op, right } => Expr::Binary {
                left: Box::new(left.map_columns(f)),
                op,
                right: Box::new(right.map_columns(f)),
            },
            Expr::Not(inner) => Expr::Not(Box::new(inner.map_columns(f))),
            Expr::In {
                expr,
                values,
                negated,
            } => Expr::In {
                expr: Box::new(expr.map_columns(f)),
                values: values.into_iter().map(|e| e.map_columns(f)).collect(),
                negated,
            },
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: Box::new(expr.map_columns(f)),
                negated,
            },
            Expr::Window {
                function,
                partition_by,
                order_by,
            } => Expr::Window {
                function,
                partition_by: partition_by.into_iter().map(|e| e.map_columns(f)).collect(),
                order_by: order_by
                    .into_iter()
                    .map(|o| OrderBy {
                        expr: o.expr.map_columns(f),
                        direction: o.direction,
                    })
                    .collect(),
            },
            other @ (Expr::Literal(_) | Expr::Raw(_)) => other,
        }
    }

    /// Whether this expression contains a window function.
    pub fn has_window(&self) -> bool {
        match self {
            Expr::Window { .. } => true,
            Expr::Tuple(items) => items.iter().any(Expr::has_window),
            Expr::Binary { left, right, .. } => left.has_window() || right.has_window(),
            Expr::Not(inner) => inner.has_window(),
            Expr::In { expr, values, .. } => {
                expr.has_window() || values.iter().any(Expr::has_window)
            }
            Expr::IsNull { expr, .. } => expr.has_window(),
            Expr::Column { .. } | Expr::Literal(_) | Expr::Raw(_) => false,
        }
    }

    // ==================== SQL Generation ====================

    /// Build SQL string and collect parameters (default PostgreSQL dialect).
    pub fn build(&self, params: &mut Vec<Value>, offset: usize) -> String {
        self.build_with_dialect(Dialect::Postgres, params, offset)
    }

    /// Build SQL string with specific dialect.
    pub fn build_with_dialect(
        &self,
        dialect: Dialect,
        params: &mut Vec<Value>,
        offset: usize,
    ) -> String {
        match self {
            Expr::Column { table, name } => {
                if let Some(t) = table {
                    format!(
                        "{}.{}",
                        dialect.quote_identifier(t),
                        dialect.quote_identifier(name)
                    )
                } else {
                    dialect.quote_identifier(name)
                }
            }

            Expr::Literal(Value::Null) => "NULL".to_string(),

            Expr::Literal(value) => {
                params.push(value.clone());
                dialect.placeholder(offset + params.len())
            }

            Expr::Tuple(items) => {
                let sqls: Vec<_> = items
                    .iter()
                    .map(|e| e.build_with_dialect(dialect, params, offset))
                    .collect();
                format!("({})", sqls.join(", "))
            }

            Expr::Binary { left, op, right } => {
                let left_sql = left.build_with_dialect(dialect, params, offset);
                let right_sql = right.build_with_dialect(dialect, params, offset);
                if *op == BinaryOp::Or {
                    format!("({left_sql} {} {right_sql})", op.as_str())
                } else {
                    format!("{left_sql} {} {right_sql}", op.as_str())
                }
            }

            Expr::Not(inner) => {
                let inner_sql = inner.build_with_dialect(dialect, params, offset);
                format!("NOT ({inner_sql})")
            }

            Expr::In {
                expr,
                values,
                negated,
            } => {
                let not_str = if *negated { "NOT " } else { "" };
                if values.is_empty() {
                    // Empty IN lists are a syntax error in most databases.
                    return if *negated { "1 = 1" } else { "1 = 0" }.to_string();
                }
                let expr_sql = expr.build_with_dialect(dialect, params, offset);
                let value_sqls: Vec<_> = values
                    .iter()
                    .map(|v| v.build_with_dialect(dialect, params, offset))
                    .collect();
                format!("{expr_sql} {not_str}IN ({})", value_sqls.join(", "))
            }

            Expr::IsNull { expr, negated } => {
                let expr_sql = expr.build_with_dialect(dialect, params, offset);
                let not_str = if *negated { " NOT" } else { "" };
                format!("{expr_sql} IS{not_str} NULL")
            }

            Expr::Window {
                function,
                partition_by,
                order_by,
            } => {
                let mut over_parts: Vec<String> = Vec::new();
                if !partition_by.is_empty() {
                    let partition_sqls: Vec<_> = partition_by
                        .iter()
                        .map(|e| e.build_with_dialect(dialect, params, offset))
                        .collect();
                    over_parts.push(format!("PARTITION BY {}", partition_sqls.join(", ")));
                }
                if !order_by.is_empty() {
                    let order_sqls: Vec<_> = order_by
                        .iter()
                        .map(|o| o.build_with_dialect(dialect, params, offset))
                        .collect();
                    over_parts.push(format!("ORDER BY {}", order_sqls.join(", ")));
                }
                format!("{} OVER ({})", function.as_str(), over_parts.join(" "))
            }

            Expr::Raw(sql) => sql.clone(),
        }
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Literal(v)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Literal(Value::Text(s.to_string()))
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Literal(Value::Text(s))
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Expr::Literal(Value::Int(n))
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Literal(Value::BigInt(n))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Literal(Value::Bool(b))
    }
}
