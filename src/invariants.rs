use std::collections::{BTreeMap, HashMap, VecDeque};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::models::{Node, NodeId, ROOT_NODE_ID};

/// Structural rules every committed graph must satisfy. A violation found on
/// load is a `MalformedGraph` error; mutations are expected to keep these
/// true by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphInvariantViolation {
    MissingRoot,
    RootHasData,
    DanglingEdge {
        from_node_id: NodeId,
        missing_node_id: NodeId,
    },
    DuplicateEdge {
        from_node_id: NodeId,
        to_node_id: NodeId,
    },
    CycleDetected,
}

impl GraphInvariantViolation {
    pub const fn error_code(&self) -> &'static str {
        match self {
            GraphInvariantViolation::MissingRoot => "graph_missing_root",
            GraphInvariantViolation::RootHasData => "graph_root_has_data",
            GraphInvariantViolation::DanglingEdge { .. } => "graph_dangling_edge",
            GraphInvariantViolation::DuplicateEdge { .. } => "graph_duplicate_edge",
            GraphInvariantViolation::CycleDetected => "graph_cycle",
        }
    }

    pub const fn public_message(&self) -> &'static str {
        match self {
            GraphInvariantViolation::MissingRoot => "Graph is missing its _root entry",
            GraphInvariantViolation::RootHasData => "The _root entry cannot carry a payload",
            GraphInvariantViolation::DanglingEdge { .. } => {
                "Edge references a node that does not exist"
            }
            GraphInvariantViolation::DuplicateEdge { .. } => {
                "A parent lists the same child more than once"
            }
            GraphInvariantViolation::CycleDetected => "Flow graphs must be acyclic",
        }
    }
}

/// Scan a node map and report every violation. Never short-circuits: callers
/// deciding how to surface problems get the full picture.
pub fn graph_invariant_violations(nodes: &BTreeMap<NodeId, Node>) -> Vec<GraphInvariantViolation> {
    let mut violations = Vec::new();

    match nodes.get(ROOT_NODE_ID) {
        None => violations.push(GraphInvariantViolation::MissingRoot),
        Some(root) => {
            if root.data.as_ref().is_some_and(|data| !data.is_empty()) {
                violations.push(GraphInvariantViolation::RootHasData);
            }
        }
    }

    for (id, node) in nodes {
        let mut seen = std::collections::HashSet::with_capacity(node.edges.len());
        for child in &node.edges {
            if !nodes.contains_key(child) {
                violations.push(GraphInvariantViolation::DanglingEdge {
                    from_node_id: id.clone(),
                    missing_node_id: child.clone(),
                });
            }
            if !seen.insert(child) {
                violations.push(GraphInvariantViolation::DuplicateEdge {
                    from_node_id: id.clone(),
                    to_node_id: child.clone(),
                });
            }
        }
    }

    if has_cycle(nodes) {
        violations.push(GraphInvariantViolation::CycleDetected);
    }

    violations
}

pub fn ensure_graph_invariants(nodes: &BTreeMap<NodeId, Node>) -> Result<()> {
    let violations = graph_invariant_violations(nodes);
    if let Some(first) = violations.first() {
        return Err(EngineError::malformed(
            first.error_code(),
            first.public_message(),
            anyhow!("graph invariant validation failed: {:?}", violations),
        ));
    }

    Ok(())
}

/// Kahn's algorithm over the adjacency map; dangling edges are skipped so a
/// dangling-edge violation does not also masquerade as a cycle.
pub fn has_cycle(nodes: &BTreeMap<NodeId, Node>) -> bool {
    let mut indegree: HashMap<&NodeId, usize> = HashMap::with_capacity(nodes.len());
    for id in nodes.keys() {
        indegree.insert(id, 0);
    }
    for node in nodes.values() {
        for child in &node.edges {
            if let Some(degree) = indegree.get_mut(child) {
                *degree += 1;
            }
        }
    }

    let mut queue: VecDeque<&NodeId> = indegree
        .iter()
        .filter_map(|(id, degree)| if *degree == 0 { Some(*id) } else { None })
        .collect();

    let mut visited_count = 0usize;
    while let Some(id) = queue.pop_front() {
        visited_count += 1;
        if let Some(node) = nodes.get(id) {
            for child in &node.edges {
                if let Some(child_degree) = indegree.get_mut(child) {
                    *child_degree -= 1;
                    if *child_degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }
    }

    visited_count != nodes.len()
}
