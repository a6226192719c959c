//! Association resolution and eager loading for relgraph.
//!
//! - `Registry`: models and their declared associations, with key
//!   defaults and reciprocals resolved lazily on first use
//! - `augment`: shaping a target query with an association's options
//! - batch eager loading (`Dataset::eager`): one query per association
//! - graph eager loading (`Dataset::eager_graph`): one joined query,
//!   assembled back into an object graph
//! - `AssociationHandle`: per-record get, load and cache mutation

pub mod access;
pub mod augment;
pub mod config;
pub mod descriptor;
pub mod eager;
pub mod graph;
pub mod include;
pub mod kind;
pub mod options;
pub mod registry;
pub mod relation;

pub use access::{AssociationHandle, AssociationOps, LoadOptions};
pub use augment::{Scope, augment};
pub use config::{AbortPolicy, EngineConfig};
pub use descriptor::{AssociationDescriptor, JoinTableKeys, ResolvedKeys};
pub use eager::{SEQUENCE_COLUMN, foreign_key_alias, load_includes};
pub use graph::{GraphAssembler, GraphNode, GraphPlan};
pub use include::{DatasetHook, Include, merge_includes};
pub use kind::{AssociationKind, EagerLimitStrategy};
pub use options::{
    AssociationOptions, Callbacks, Conditions, LoadHook, MutationHook, Projection,
};
pub use registry::Registry;
pub use relation::{Dataset, Relation};
