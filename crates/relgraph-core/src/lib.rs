//! Core types and traits for relgraph.
//!
//! This crate provides the foundational pieces shared by the query layer
//! and the association engine:
//!
//! - `Value`, `Key` and `Row` for data flowing out of row sources
//! - `ModelDef` describing a record kind
//! - the `Record` capability and its association cache
//! - the crate-wide `Error` taxonomy
//! - naming inflections and identifier helpers

pub mod error;
pub mod identifiers;
pub mod inflect;
pub mod key;
pub mod model;
pub mod record;
pub mod row;
pub mod value;

pub use error::{
    CallbackAbort, ConfigurationError, Error, JoinPlanningError, MissingKeyError, QueryError,
    QueryErrorKind, Result, TypeError, UndefinedAssociationError,
};
pub use identifiers::{is_valid_identifier, quote_ident, quote_ident_mysql, validate_identifier};
pub use key::Key;
pub use model::{Constructor, ModelDef};
pub use record::{AssociationValue, Instance, Record, RecordRef, record_addr, same_record};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
