use std::collections::BTreeMap;

use anyhow::anyhow;

use crate::copy;
use crate::error::{EngineError, Result};
use crate::models::{FlowId, Graph, Node, NodeId, NodeKind, PORTAL_FLOW_KEY, ROOT_NODE_ID};

/// Supplies graph snapshots for portal resolution. Every `FlowStore`
/// implements this; the flattener itself never talks to storage directly.
pub trait FlowResolver {
    fn load_draft(&self, flow_id: FlowId) -> Result<Graph>;
    fn load_published(&self, flow_id: FlowId) -> Result<Graph>;
}

/// Recursively resolve every external portal reference in `flow_id` into one
/// self-contained graph.
///
/// In draft mode portals resolve to each referenced flow's current draft; in
/// published mode they resolve to its last-published snapshot, so editing a
/// nested service cannot change a parent's behavior before the nested
/// service is republished. A portal chain that re-enters a flow already on
/// the active resolution path fails `CircularReference` instead of
/// recursing. The output contains zero unresolved portal references; a graph
/// with none comes back unchanged.
pub fn flatten(resolver: &impl FlowResolver, flow_id: FlowId, draft: bool) -> Result<Graph> {
    let mut path = Vec::new();
    flatten_into(resolver, flow_id, draft, &mut path)
}

fn flatten_into(
    resolver: &impl FlowResolver,
    flow_id: FlowId,
    draft: bool,
    path: &mut Vec<FlowId>,
) -> Result<Graph> {
    if path.contains(&flow_id) {
        return Err(EngineError::circular_reference(
            "Flows cannot reference themselves through a portal chain",
            anyhow!("flatten: portal cycle through flow {flow_id}, active path {path:?}"),
        ));
    }
    path.push(flow_id);

    let graph = if draft {
        resolver.load_draft(flow_id)?
    } else {
        resolver.load_published(flow_id)?
    };

    let mut flat: BTreeMap<NodeId, Node> = BTreeMap::new();
    for (id, node) in graph.iter() {
        if node.kind != NodeKind::ExternalPortal {
            flat.entry(id.clone()).or_insert_with(|| node.clone());
            continue;
        }

        let target = node.portal_flow().ok_or_else(|| {
            EngineError::malformed(
                "graph_unresolvable_portal",
                "A portal does not name the flow it references",
                anyhow!("flatten: portal {id} in flow {flow_id} has no usable {PORTAL_FLOW_KEY}"),
            )
        })?;

        let resolved = flatten_into(resolver, target, draft, path)?;

        // Splice: the portal keeps its id but its edges are rewired to the
        // resolved graph's entry points, and the resolved nodes (minus their
        // own root) merge in. When a shared sub-journey is reached twice the
        // first spliced copy wins. The spliced node is demoted to an internal
        // portal so the output carries no unresolved cross-flow references.
        let mut spliced = node.clone();
        spliced.edges = resolved.root().edges.clone();
        copy::detach_portal(&mut spliced);
        flat.insert(id.clone(), spliced);
        for (inner_id, inner_node) in resolved.iter() {
            if inner_id.as_str() == ROOT_NODE_ID {
                continue;
            }
            flat.entry(inner_id.clone()).or_insert_with(|| inner_node.clone());
        }
    }

    path.pop();
    Ok(Graph::from_nodes_unchecked(flat))
}
