//! SQL AST and row sources for relgraph.
//!
//! - `Expr`, `OrderBy`, `Join`, `Select`: the query AST, renderable as SQL
//! - `RowSource`: the capability of executing a `Select` and streaming rows
//! - `MemoryDatabase`: a `RowSource` that evaluates the AST in memory

pub mod clause;
pub mod expr;
pub mod join;
pub mod memory;
pub mod select;
pub mod source;

pub use clause::{OrderBy, OrderDirection};
pub use expr::{BinaryOp, Dialect, Expr, WindowFunction};
pub use join::{Join, JoinType};
pub use memory::MemoryDatabase;
pub use select::{Distinct, FromItem, Select, SelectItem};
pub use source::RowSource;
