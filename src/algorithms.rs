use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{Graph, NodeId};

/// Incoming-reference count per node, computed by scanning every edge list.
/// No live back-reference cache is maintained; graphs are at most a few
/// thousand nodes and an on-demand scan avoids dual-bookkeeping bugs.
pub fn incoming_counts(graph: &Graph) -> HashMap<&NodeId, usize> {
    let mut counts: HashMap<&NodeId, usize> = HashMap::with_capacity(graph.len());
    for id in graph.node_ids() {
        counts.insert(id, 0);
    }
    for (_, node) in graph.iter() {
        for child in &node.edges {
            if let Some(count) = counts.get_mut(child) {
                *count += 1;
            }
        }
    }
    counts
}

/// Number of edges pointing at `id` across the whole graph.
pub fn incoming_count(graph: &Graph, id: &NodeId) -> usize {
    graph
        .iter()
        .map(|(_, node)| node.edges.iter().filter(|child| *child == id).count())
        .sum()
}

/// Parents of `id` with the edge position in each parent's list.
pub fn parents_of<'a>(graph: &'a Graph, id: &NodeId) -> Vec<(&'a NodeId, usize)> {
    graph
        .iter()
        .filter_map(|(parent_id, node)| {
            node.edges
                .iter()
                .position(|child| child == id)
                .map(|index| (parent_id, index))
        })
        .collect()
}

/// Every node reachable from `start` (inclusive), breadth-first. Dangling
/// edges are skipped; the traversal is best-effort over whatever exists.
pub fn reachable_from(graph: &Graph, start: &NodeId) -> HashSet<NodeId> {
    let mut reachable = HashSet::new();
    if !graph.contains(start) {
        return reachable;
    }

    let mut queue = VecDeque::new();
    queue.push_back(start.clone());
    reachable.insert(start.clone());

    while let Some(id) = queue.pop_front() {
        if let Some(node) = graph.get(&id) {
            for child in &node.edges {
                if graph.contains(child) && reachable.insert(child.clone()) {
                    queue.push_back(child.clone());
                }
            }
        }
    }

    reachable
}
