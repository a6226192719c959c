//! Rebuilding an object graph from flat joined rows.

use super::GraphPlan;
use relgraph_core::{AssociationValue, Key, RecordRef, Result, Row, record_addr};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Association value staged for one parent under one plan node.
struct Link {
    node: usize,
    parent: RecordRef,
    value: AssociationValue,
}

/// Consumes the rows of a graph query and builds the root records.
///
/// Every distinct identity per alias is built once. Association caches are
/// written only by [`finish`](Self::finish), so a failed row stream leaves
/// no record half populated.
pub struct GraphAssembler<'a> {
    plan: &'a GraphPlan,
    roots: Vec<RecordRef>,
    records: HashMap<(usize, Key), RecordRef>,
    links: Vec<Link>,
    link_index: HashMap<(usize, usize), usize>,
    /// `(link, record address)` pairs already appended.
    members: HashSet<(usize, usize)>,
    rows: usize,
}

impl<'a> GraphAssembler<'a> {
    pub fn new(plan: &'a GraphPlan) -> Self {
        Self {
            plan,
            roots: Vec::new(),
            records: HashMap::new(),
            links: Vec::new(),
            link_index: HashMap::new(),
            members: HashSet::new(),
            rows: 0,
        }
    }

    /// Decompose one row into the records of every alias.
    pub fn push(&mut self, row: &Row) -> Result<()> {
        self.rows += 1;
        let Some((root, is_new)) = self.materialize(0, row)? else {
            tracing::trace!("row has no root identity; skipped");
            return Ok(());
        };
        if is_new {
            self.roots.push(Arc::clone(&root));
        }
        self.descend(0, &root, row)
    }

    fn materialize(&mut self, node: usize, row: &Row) -> Result<Option<(RecordRef, bool)>> {
        let plan = self.plan;
        let spec = &plan.nodes[node];
        let key = Key::new(row.values_of(&spec.identity));
        if key.is_empty() || key.all_null() {
            return Ok(None);
        }
        let slot = (node, key);
        if let Some(existing) = self.records.get(&slot) {
            return Ok(Some((Arc::clone(existing), false)));
        }
        let record = spec.model.instantiate(row.remap(&spec.columns))?;
        self.records.insert(slot, Arc::clone(&record));
        Ok(Some((record, true)))
    }

    fn descend(&mut self, node: usize, parent: &RecordRef, row: &Row) -> Result<()> {
        let plan = self.plan;
        for &child in &plan.nodes[node].children {
            let spec = &plan.nodes[child];
            if spec.columns.is_empty() {
                continue;
            }
            let link = self.link(child, parent);
            let Some((record, _)) = self.materialize(child, row)? else {
                continue;
            };
            match &mut self.links[link].value {
                AssociationValue::Many(list) => {
                    if self.members.insert((link, record_addr(&record))) {
                        list.push(Arc::clone(&record));
                    }
                }
                slot => {
                    if slot.is_none() {
                        *slot = AssociationValue::One(Arc::clone(&record));
                    }
                }
            }
            self.descend(child, &record, row)?;
        }
        Ok(())
    }

    // Staged value for `parent` under `node`, created empty on first sight.
    fn link(&mut self, node: usize, parent: &RecordRef) -> usize {
        let key = (node, record_addr(parent));
        if let Some(&index) = self.link_index.get(&key) {
            return index;
        }
        let value = if self.plan.nodes[node].is_collection() {
            AssociationValue::Many(Vec::new())
        } else {
            AssociationValue::None
        };
        let index = self.links.len();
        self.links.push(Link {
            node,
            parent: Arc::clone(parent),
            value,
        });
        self.link_index.insert(key, index);
        index
    }

    /// Slice limited collections, write every cache, wire reciprocals and
    /// run `after_load` callbacks.
    ///
    /// Collections are already free of duplicates: a record is appended to
    /// a parent's list at most once however many joined rows repeat it.
    pub fn finish(mut self) -> Result<Vec<RecordRef>> {
        let plan = self.plan;
        for link in &mut self.links {
            let spec = &plan.nodes[link.node];
            if !spec.is_sliced() {
                continue;
            }
            if let AssociationValue::Many(list) = &mut link.value {
                let limit = spec.limit.unwrap_or(usize::MAX);
                *list = std::mem::take(list)
                    .into_iter()
                    .skip(spec.offset)
                    .take(limit)
                    .collect();
            }
        }

        for link in &self.links {
            let spec = &plan.nodes[link.node];
            let Some(name) = spec.association() else {
                continue;
            };
            if let Some(reciprocal) = &spec.reciprocal {
                for child in link.value.records() {
                    child.set_association(
                        reciprocal,
                        AssociationValue::Back(Arc::downgrade(&link.parent)),
                    );
                }
            }
            link.parent.set_association(name, link.value.clone());
        }

        for (index, spec) in plan.nodes.iter().enumerate() {
            let Some(descriptor) = &spec.descriptor else {
                continue;
            };
            let hooks = &descriptor.options().callbacks().after_load;
            if hooks.is_empty() {
                continue;
            }
            for link in self.links.iter().filter(|l| l.node == index) {
                for hook in hooks {
                    hook(&link.parent, &link.value);
                }
            }
        }

        tracing::debug!(
            rows = self.rows,
            may_duplicate = plan.may_duplicate(),
            roots = self.roots.len(),
            records = self.records.len(),
            "assembled object graph"
        );
        Ok(self.roots)
    }
}
