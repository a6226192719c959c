//! JOIN clause types.

use crate::expr::{Dialect, Expr};
use relgraph_core::Value;
use serde::{Deserialize, Serialize};

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Type of join
    pub join_type: JoinType,
    /// Table to join
    pub table: String,
    /// Optional table alias
    pub alias: Option<String>,
    /// ON condition
    pub on: Expr,
}

/// Types of SQL joins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    #[default]
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

impl Join {
    /// Create a join of the given type.
    pub fn new(join_type: JoinType, table: impl Into<String>, on: Expr) -> Self {
        Self {
            join_type,
            table: table.into(),
            alias: None,
            on,
        }
    }

    /// Create an INNER JOIN.
    pub fn inner(table: impl Into<String>, on: Expr) -> Self {
        Self::new(JoinType::Inner, table, on)
    }

    /// Create a LEFT JOIN.
    pub fn left(table: impl Into<String>, on: Expr) -> Self {
        Self::new(JoinType::Left, table, on)
    }

    /// Set an alias for the joined table.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The name columns of this table are qualified with: the alias if set,
    /// else the table name.
    pub fn reference_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    /// Build the JOIN clause with a dialect and parameter offset.
    pub fn build_with_dialect(
        &self,
        dialect: Dialect,
        params: &mut Vec<Value>,
        offset: usize,
    ) -> String {
        let mut sql = format!(
            " {} {}",
            self.join_type.as_str(),
            dialect.quote_identifier(&self.table)
        );
        if let Some(alias) = &self.alias {
            sql.push_str(" AS ");
            sql.push_str(&dialect.quote_identifier(alias));
        }
        let on_sql = self.on.build_with_dialect(dialect, params, offset);
        sql.push_str(" ON ");
        sql.push_str(&on_sql);
        sql
    }
}
