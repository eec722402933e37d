use std::collections::BTreeMap;

use anyhow::anyhow;
use serde_json::{Map, Value};

use crate::copy::Copied;
use crate::error::{EngineError, Result};
use crate::models::{Graph, Node, NodeId, NodeKind};
use crate::patch::PatchOp;
use crate::sanitize;

/// Result of one committed mutation: the new graph value plus the ordered
/// patch list describing it for the collaboration transport. The input graph
/// is never touched; an error means no new value exists at all.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub graph: Graph,
    pub ops: Vec<PatchOp>,
}

/// Append an edge `parent -> child` between two existing nodes.
///
/// Fails `NotFound` when the child is absent, `ParentNotFound` when the
/// parent is, and `AlreadyConnected` when the edge already exists. `index`
/// positions the edge within the parent's ordered children (clamped; default
/// append).
pub fn connect(
    graph: &Graph,
    child: &NodeId,
    parent: &NodeId,
    index: Option<usize>,
) -> Result<MutationOutcome> {
    if !graph.contains(child) {
        return Err(EngineError::not_found(
            "Node to connect was not found",
            anyhow!("connect: missing child {child}"),
        ));
    }
    let parent_node = graph.get(parent).ok_or_else(|| {
        EngineError::parent_not_found(
            "Parent node was not found",
            anyhow!("connect: missing parent {parent}"),
        )
    })?;
    if parent_node.edges.contains(child) {
        return Err(EngineError::already_connected(
            "Nodes are already connected",
            anyhow!("connect: edge {parent} -> {child} already exists"),
        ));
    }

    let index = index
        .unwrap_or(parent_node.edges.len())
        .min(parent_node.edges.len());

    let mut nodes = graph.nodes().clone();
    nodes
        .get_mut(parent)
        .expect("parent presence checked above")
        .edges
        .insert(index, child.clone());

    Ok(MutationOutcome {
        graph: Graph::from_nodes_unchecked(nodes),
        ops: vec![PatchOp::insert_edge(parent, index, child)],
    })
}

/// Remove the edge `parent -> id`, deleting the node itself when that was
/// its last incoming edge.
///
/// A node with other parents survives as a shared node and only the targeted
/// edge goes. A node losing its last reference is fully deleted, first
/// cascading depth-first into each child that becomes unreferenced; the
/// emitted patch list orders children's deletions before their parent's,
/// with the unlinking `ListDelete` last. `_root` is never deleted as an
/// object, only shrunk.
pub fn remove(graph: &Graph, id: &NodeId, parent: &NodeId) -> Result<MutationOutcome> {
    let parent_node = graph.get(parent).ok_or_else(|| {
        EngineError::parent_not_found(
            "Parent node was not found",
            anyhow!("remove: missing parent {parent}"),
        )
    })?;
    if !graph.contains(id) {
        return Err(EngineError::not_found(
            "Node to remove was not found",
            anyhow!("remove: missing node {id}"),
        ));
    }
    let index = parent_node
        .edges
        .iter()
        .position(|child| child == id)
        .ok_or_else(|| {
            EngineError::not_found(
                "Edge to remove was not found",
                anyhow!("remove: no edge {parent} -> {id}"),
            )
        })?;

    let mut nodes = graph.nodes().clone();
    nodes
        .get_mut(parent)
        .expect("parent presence checked above")
        .edges
        .remove(index);

    let mut ops = Vec::new();
    if !id.is_root() && incoming(&nodes, id) == 0 {
        cascade_delete(&mut nodes, id, &mut ops);
    }
    ops.push(PatchOp::delete_edge(parent, index, id));

    Ok(MutationOutcome {
        graph: Graph::from_nodes_unchecked(nodes),
        ops,
    })
}

/// Create a node with a freshly minted id under `parent`. The payload is
/// sanitized before commit. Returns the new id alongside the outcome.
pub fn add_node(
    graph: &Graph,
    kind: NodeKind,
    data: Option<Map<String, Value>>,
    parent: &NodeId,
    index: Option<usize>,
) -> Result<(NodeId, MutationOutcome)> {
    let parent_node = graph.get(parent).ok_or_else(|| {
        EngineError::parent_not_found(
            "Parent node was not found",
            anyhow!("add_node: missing parent {parent}"),
        )
    })?;

    let mut id = NodeId::mint();
    while graph.contains(&id) {
        id = NodeId::mint();
    }
    let node = Node::new(kind, sanitize::sanitize_data(data));
    let index = index
        .unwrap_or(parent_node.edges.len())
        .min(parent_node.edges.len());

    let mut nodes = graph.nodes().clone();
    nodes.insert(id.clone(), node.clone());
    nodes
        .get_mut(parent)
        .expect("parent presence checked above")
        .edges
        .insert(index, id.clone());

    let ops = vec![
        PatchOp::insert_node(&id, &node),
        PatchOp::insert_edge(parent, index, &id),
    ];

    Ok((
        id.clone(),
        MutationOutcome {
            graph: Graph::from_nodes_unchecked(nodes),
            ops,
        },
    ))
}

/// Replace a node's payload in place, keeping kind and edges. The payload is
/// sanitized first; a no-op update emits no ops.
pub fn update_node(
    graph: &Graph,
    id: &NodeId,
    data: Option<Map<String, Value>>,
) -> Result<MutationOutcome> {
    if id.is_root() {
        return Err(EngineError::invalid(
            "The _root entry cannot carry a payload",
            anyhow!("update_node: attempted payload write to _root"),
        ));
    }
    let old = graph.get(id).ok_or_else(|| {
        EngineError::not_found(
            "Node to update was not found",
            anyhow!("update_node: missing node {id}"),
        )
    })?;

    let mut updated = old.clone();
    updated.data = sanitize::sanitize_data(data);
    if updated == *old {
        return Ok(MutationOutcome {
            graph: graph.clone(),
            ops: Vec::new(),
        });
    }

    let ops = vec![PatchOp::delete_node(id, old), PatchOp::insert_node(id, &updated)];
    let mut nodes = graph.nodes().clone();
    nodes.insert(id.clone(), updated);

    Ok(MutationOutcome {
        graph: Graph::from_nodes_unchecked(nodes),
        ops,
    })
}

/// Splice a copied subgraph under `parent`. Node inserts come first, then
/// the single edge linking the copied root.
pub fn paste(
    graph: &Graph,
    copied: &Copied,
    parent: &NodeId,
    index: Option<usize>,
) -> Result<MutationOutcome> {
    let parent_node = graph.get(parent).ok_or_else(|| {
        EngineError::parent_not_found(
            "Parent node was not found",
            anyhow!("paste: missing parent {parent}"),
        )
    })?;
    for id in copied.nodes.keys() {
        if graph.contains(id) {
            return Err(EngineError::invalid(
                "Copied node id collides with the destination",
                anyhow!("paste: id {id} already present in destination"),
            ));
        }
    }

    let index = index
        .unwrap_or(parent_node.edges.len())
        .min(parent_node.edges.len());

    let mut nodes = graph.nodes().clone();
    let mut ops = Vec::with_capacity(copied.nodes.len() + 1);
    for (id, node) in &copied.nodes {
        nodes.insert(id.clone(), node.clone());
        ops.push(PatchOp::insert_node(id, node));
    }
    nodes
        .get_mut(parent)
        .expect("parent presence checked above")
        .edges
        .insert(index, copied.root.clone());
    ops.push(PatchOp::insert_edge(parent, index, &copied.root));

    Ok(MutationOutcome {
        graph: Graph::from_nodes_unchecked(nodes),
        ops,
    })
}

fn incoming(nodes: &BTreeMap<NodeId, Node>, id: &NodeId) -> usize {
    nodes
        .values()
        .map(|node| node.edges.iter().filter(|child| *child == id).count())
        .sum()
}

/// Depth-first deletion of `id` and every child left unreferenced by it.
/// Ops accumulate deepest-first so children's deletions precede the parent's.
fn cascade_delete(nodes: &mut BTreeMap<NodeId, Node>, id: &NodeId, ops: &mut Vec<PatchOp>) {
    let Some(node) = nodes.remove(id) else {
        return;
    };
    let mut child_ops = Vec::new();
    for child in &node.edges {
        if !child.is_root() && nodes.contains_key(child) && incoming(nodes, child) == 0 {
            cascade_delete(nodes, child, &mut child_ops);
        }
    }
    ops.extend(child_ops);
    ops.push(PatchOp::delete_node(id, &node));
}
