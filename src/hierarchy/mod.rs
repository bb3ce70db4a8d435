//! Hierarchy-node model and the read-only node-cache interface.
//!
//! The cache stores previously materialized nodes and their ancestry; query
//! building only ever reads from it. A node's `instance_query` is a bound
//! query returning exactly the instance keys that node represents, which is
//! how parent-instance bindings and ancestor filter references reach SQL.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::query_ast::sql_expr::{BoundQuery, ParamValue};
use crate::schema_catalog::ClassId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a hierarchy node stands for. Grouping keys carry enough state to
/// both resume the grouping state machine and restrict child queries to the
/// group's members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NodeKey {
    Instances {
        classes: Vec<ClassId>,
    },
    ClassGroup {
        class: ClassId,
        polymorphic: bool,
    },
    PropertyGroup {
        class: ClassId,
        property: String,
        /// Concrete grouping values of the group; several collapse into one
        /// IN-clause when filtering children.
        values: Vec<ParamValue>,
        /// Set when the group is a declared range ( `-1` = the synthesized
        /// "other" bucket).
        range_index: Option<i32>,
    },
    LabelGroup {
        label: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedNode {
    pub id: NodeId,
    pub key: NodeKey,
    /// Bound query returning the instance keys this node represents; absent
    /// for nodes that are not instance-bearing.
    pub instance_query: Option<BoundQuery>,
    pub parent: Option<NodeId>,
}

impl CachedNode {
    pub fn is_instance_bearing(&self) -> bool {
        matches!(self.key, NodeKey::Instances { .. }) && self.instance_query.is_some()
    }
}

/// Read-only lookup into the persistent hierarchy-node cache.
pub trait NodeCache {
    fn node(&self, id: &NodeId) -> Option<CachedNode>;

    /// Parent chain of a node, nearest ancestor first, up to `max` entries.
    fn ancestors(&self, id: &NodeId, max: usize) -> Vec<CachedNode> {
        let mut chain = Vec::new();
        let mut current = self.node(id).and_then(|n| n.parent);
        while let Some(parent_id) = current {
            if chain.len() >= max {
                break;
            }
            match self.node(&parent_id) {
                Some(parent) => {
                    current = parent.parent.clone();
                    chain.push(parent);
                }
                None => break,
            }
        }
        chain
    }

    /// Identifier of the currently active node produced by the given
    /// specification at the given tree position; used to resume multi-level
    /// grouping state.
    fn active_node(&self, specification_hash: &str, position: usize) -> Option<NodeId>;
}

/// HashMap-backed cache for embedders and tests.
#[derive(Debug, Default)]
pub struct MemoryNodeCache {
    nodes: HashMap<NodeId, CachedNode>,
    active: HashMap<(String, usize), NodeId>,
}

impl MemoryNodeCache {
    pub fn new() -> Self {
        MemoryNodeCache::default()
    }

    pub fn insert(&mut self, node: CachedNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn set_active(&mut self, specification_hash: &str, position: usize, id: NodeId) {
        self.active
            .insert((specification_hash.to_string(), position), id);
    }
}

impl NodeCache for MemoryNodeCache {
    fn node(&self, id: &NodeId) -> Option<CachedNode> {
        self.nodes.get(id).cloned()
    }

    fn active_node(&self, specification_hash: &str, position: usize) -> Option<NodeId> {
        self.active
            .get(&(specification_hash.to_string(), position))
            .cloned()
    }
}
