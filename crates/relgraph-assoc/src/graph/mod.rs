//! Graph eager loading: one joined query for a whole include tree.
//!
//! The planner adds the joins and records, per table alias, which result
//! columns belong to it and how it nests. The assembler then rebuilds the
//! object graph from the flat rows.

pub mod assembler;
pub mod planner;

pub use assembler::GraphAssembler;

use crate::descriptor::AssociationDescriptor;
use relgraph_core::ModelDef;
use std::collections::HashSet;
use std::sync::Arc;

/// One table alias in a graph query.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub(crate) alias: String,
    pub(crate) model: Arc<ModelDef>,
    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,
    /// The association that joined this alias; `None` for the root.
    pub(crate) descriptor: Option<Arc<AssociationDescriptor>>,
    /// `(result column alias, model column)` pairs.
    pub(crate) columns: Vec<(String, String)>,
    /// Result column aliases forming the identity key.
    pub(crate) identity: Vec<String>,
    pub(crate) reciprocal: Option<String>,
    pub(crate) offset: usize,
    pub(crate) limit: Option<usize>,
}

impl GraphNode {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn model(&self) -> &Arc<ModelDef> {
        &self.model
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// Name of the association that joined this alias.
    pub fn association(&self) -> Option<&str> {
        self.descriptor.as_deref().map(AssociationDescriptor::name)
    }

    pub fn columns(&self) -> &[(String, String)] {
        &self.columns
    }

    pub fn identity(&self) -> &[String] {
        &self.identity
    }

    pub fn is_collection(&self) -> bool {
        self.descriptor
            .as_deref()
            .is_some_and(AssociationDescriptor::is_collection)
    }

    pub(crate) fn is_sliced(&self) -> bool {
        self.offset > 0 || self.limit.is_some()
    }
}

/// Dependency tree and column map for one graph query.
///
/// Nodes live in a flat arena; index 0 is the root and a node's parent
/// always has a smaller index.
#[derive(Debug, Clone)]
pub struct GraphPlan {
    pub(crate) nodes: Vec<GraphNode>,
    aliases: HashSet<String>,
    column_aliases: HashSet<String>,
    cartesian: usize,
}

impl GraphPlan {
    pub(crate) fn new(root: GraphNode) -> Self {
        let mut aliases = HashSet::new();
        aliases.insert(root.alias.clone());
        Self {
            nodes: vec![root],
            aliases,
            column_aliases: HashSet::new(),
            cartesian: 0,
        }
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn root(&self) -> &GraphNode {
        &self.nodes[0]
    }

    /// Node joined for `alias`.
    pub fn node(&self, alias: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.alias == alias)
    }

    /// Sum of the duplication weights of every joined association.
    pub fn cartesian_weight(&self) -> usize {
        self.cartesian
    }

    /// Whether the joins may have repeated rows for one root.
    pub fn may_duplicate(&self) -> bool {
        self.cartesian > 1
    }

    pub fn alias_taken(&self, alias: &str) -> bool {
        self.aliases.contains(alias)
    }

    /// Mark a table reference as used.
    pub fn reserve_alias(&mut self, alias: &str) {
        self.aliases.insert(alias.to_string());
    }

    // `base`, else `base_N` for the smallest free N.
    pub(crate) fn allocate_alias(&mut self, base: &str) -> String {
        let alias = if self.aliases.contains(base) {
            (0..)
                .map(|n| format!("{}_{}", base, n))
                .find(|a| !self.aliases.contains(a))
                .unwrap_or_else(|| base.to_string())
        } else {
            base.to_string()
        };
        self.aliases.insert(alias.clone());
        alias
    }

    // `column`, else `alias_column`, else `alias_column_N`.
    pub(crate) fn allocate_column(&mut self, table_alias: &str, column: &str) -> String {
        let name = if !self.column_aliases.contains(column) {
            column.to_string()
        } else {
            let prefixed = format!("{}_{}", table_alias, column);
            if self.column_aliases.contains(&prefixed) {
                (0..)
                    .map(|n| format!("{}_{}", prefixed, n))
                    .find(|a| !self.column_aliases.contains(a))
                    .unwrap_or(prefixed)
            } else {
                prefixed
            }
        };
        self.column_aliases.insert(name.clone());
        name
    }

    pub(crate) fn add_node(&mut self, node: GraphNode) -> usize {
        let index = self.nodes.len();
        if let Some(parent) = node.parent {
            self.nodes[parent].children.push(index);
        }
        if let Some(descriptor) = &node.descriptor {
            self.cartesian += descriptor.kind().duplication_weight();
        }
        self.nodes.push(node);
        index
    }
}
