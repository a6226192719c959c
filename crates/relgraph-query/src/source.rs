//! The row-streaming capability.

use crate::expr::Dialect;
use crate::select::Select;
use relgraph_core::{Result, Row};

/// Something that can execute a [`Select`] and stream its rows.
///
/// Errors returned by the source are propagated by the loaders unchanged.
/// If the callback returns an error, the source must stop and return it.
pub trait RowSource {
    /// Execute `query`, calling `f` once per result row in order.
    fn each_row(&self, query: &Select, f: &mut dyn FnMut(Row) -> Result<()>) -> Result<()>;

    /// Execute `query` and collect every row.
    fn fetch_all(&self, query: &Select) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        self.each_row(query, &mut |row| {
            rows.push(row);
            Ok(())
        })?;
        Ok(rows)
    }

    /// Dialect used when rendering queries for this source.
    fn dialect(&self) -> Dialect {
        Dialect::default()
    }
}

impl<S: RowSource + ?Sized> RowSource for &S {
    fn each_row(&self, query: &Select, f: &mut dyn FnMut(Row) -> Result<()>) -> Result<()> {
        (**self).each_row(query, f)
    }

    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }
}
