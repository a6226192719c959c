//! ORDER BY clause types.

use crate::expr::{Dialect, Expr};
use relgraph_core::Value;

/// ORDER BY item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub direction: OrderDirection,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderBy {
    /// Ascending order on a column.
    pub fn asc(column: impl Into<String>) -> Self {
        Expr::col(column).asc()
    }

    /// Descending order on a column.
    pub fn desc(column: impl Into<String>) -> Self {
        Expr::col(column).desc()
    }

    /// The same ordering with every unqualified column qualified by `table`.
    #[must_use]
    pub fn qualify(self, table: &str) -> Self {
        Self {
            expr: self.expr.qualify(table),
            direction: self.direction,
        }
    }

    /// Generate SQL for this ORDER BY item.
    pub fn build_with_dialect(
        &self,
        dialect: Dialect,
        params: &mut Vec<Value>,
        offset: usize,
    ) -> String {
        let expr_sql = self.expr.build_with_dialect(dialect, params, offset);
        match self.direction {
            OrderDirection::Asc => format!("{expr_sql} ASC"),
            OrderDirection::Desc => format!("{expr_sql} DESC"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_by_sql() {
        let mut params = Vec::new();
        let asc = OrderBy::asc("position").build_with_dialect(Dialect::Postgres, &mut params, 0);
        assert_eq!(asc, "\"position\" ASC");
        let desc = OrderBy::desc("id")
            .qualify("tracks")
            .build_with_dialect(Dialect::Sqlite, &mut params, 0);
        assert_eq!(desc, "\"tracks\".\"id\" DESC");
        assert!(params.is_empty());
    }
}
