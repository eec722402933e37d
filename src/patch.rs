use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Node, NodeId};

/// One atomic, path-addressed change to a flow document, in the shape the
/// collaborative-editing transport expects. A single mutation may emit
/// several ops; they apply left-to-right, with children's deletions ordered
/// before their parent's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    ObjectInsert {
        path: Vec<String>,
        value: Value,
    },
    ObjectDelete {
        path: Vec<String>,
        value: Value,
    },
    ListInsert {
        path: Vec<String>,
        index: usize,
        value: Value,
    },
    ListDelete {
        path: Vec<String>,
        index: usize,
        value: Value,
    },
}

impl PatchOp {
    /// Insert the whole node object at `[id]`.
    pub fn insert_node(id: &NodeId, node: &Node) -> Self {
        PatchOp::ObjectInsert {
            path: vec![id.to_string()],
            value: serde_json::to_value(node).expect("node serialization cannot fail"),
        }
    }

    /// Delete the whole node object at `[id]`, carrying the removed value so
    /// the transport can invert the op.
    pub fn delete_node(id: &NodeId, node: &Node) -> Self {
        PatchOp::ObjectDelete {
            path: vec![id.to_string()],
            value: serde_json::to_value(node).expect("node serialization cannot fail"),
        }
    }

    /// Insert `child` into `[parent, "edges"]` at `index`.
    pub fn insert_edge(parent: &NodeId, index: usize, child: &NodeId) -> Self {
        PatchOp::ListInsert {
            path: vec![parent.to_string(), "edges".to_string()],
            index,
            value: Value::String(child.to_string()),
        }
    }

    /// Delete the edge at `index` of `[parent, "edges"]`.
    pub fn delete_edge(parent: &NodeId, index: usize, child: &NodeId) -> Self {
        PatchOp::ListDelete {
            path: vec![parent.to_string(), "edges".to_string()],
            index,
            value: Value::String(child.to_string()),
        }
    }

    pub fn path(&self) -> &[String] {
        match self {
            PatchOp::ObjectInsert { path, .. }
            | PatchOp::ObjectDelete { path, .. }
            | PatchOp::ListInsert { path, .. }
            | PatchOp::ListDelete { path, .. } => path,
        }
    }
}
