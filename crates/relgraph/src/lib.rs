//! relgraph - association resolution and eager loading for relational
//! object graphs.
//!
//! relgraph resolves declared associations between record kinds and
//! loads them for whole batches of records at once:
//!
//! - `eager`: one query per association, matched back to owners by key
//! - `eager_graph`: a single joined query, rebuilt into an object graph
//!   with duplicate rows collapsed and one instance per identity
//!
//! # Quick Start
//!
//! ```
//! use relgraph::prelude::*;
//!
//! let registry = Registry::new();
//! registry.register_model(ModelDef::new("Album").columns(["id", "title"]))?;
//! registry.register_model(ModelDef::new("Track").columns(["id", "album_id"]))?;
//! registry.associate("Album", AssociationKind::OneToMany, "tracks", AssociationOptions::new())?;
//!
//! let db = MemoryDatabase::new()
//!     .with_table("albums", ["id", "title"], vec![vec![Value::Int(1), Value::from("Low")]])
//!     .with_table("tracks", ["id", "album_id"], vec![vec![Value::Int(10), Value::Int(1)]]);
//!
//! let albums = registry.dataset("Album")?.eager("tracks").all(&db)?;
//! assert_eq!(albums[0].association("tracks").map(|t| t.len()), Some(1));
//! # Ok::<(), relgraph::Error>(())
//! ```

pub use relgraph_core::{
    AssociationValue, CallbackAbort, ConfigurationError, Error, Instance, JoinPlanningError,
    Key, MissingKeyError, ModelDef, QueryError, QueryErrorKind, Record, RecordRef, Result, Row,
    UndefinedAssociationError, Value, inflect, record_addr, same_record,
};
pub use relgraph_query::{
    Dialect, Distinct, Expr, Join, JoinType, MemoryDatabase, OrderBy, OrderDirection, RowSource,
    Select, SelectItem,
};
pub use relgraph_assoc::{
    AbortPolicy, AssociationDescriptor, AssociationHandle, AssociationKind, AssociationOps,
    AssociationOptions, Callbacks, Conditions, Dataset, DatasetHook, EagerLimitStrategy,
    EngineConfig, GraphAssembler, GraphNode, GraphPlan, Include, JoinTableKeys, LoadHook,
    LoadOptions, MutationHook, Projection, Registry, Relation, ResolvedKeys, Scope, augment,
    load_includes, merge_includes,
};

/// Common imports.
pub mod prelude {
    pub use crate::{
        // Records and values
        AssociationValue,
        Error,
        Key,
        ModelDef,
        Record,
        RecordRef,
        Result,
        Row,
        Value,
        // Query building
        Expr,
        JoinType,
        MemoryDatabase,
        OrderBy,
        RowSource,
        Select,
        // Associations
        AbortPolicy,
        AssociationKind,
        AssociationOptions,
        Dataset,
        EagerLimitStrategy,
        EngineConfig,
        Include,
        LoadOptions,
        Registry,
    };
}
