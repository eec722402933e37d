use std::collections::BTreeMap;

use anyhow::anyhow;

use crate::algorithms;
use crate::error::{EngineError, Result};
use crate::id;
use crate::models::{Graph, Node, NodeId, NodeKind, PORTAL_FLOW_KEY};

/// How a copy treats external portal references inside the copied subtree.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    /// Detach portals instead of preserving the cross-flow reference. Used
    /// by the archival flow, where portals orphaned by the deletion must not
    /// keep pointing at live flows.
    pub detach_portals: bool,
}

/// A deep, id-remapped duplicate of a reachable subgraph. Fully value-copied:
/// later mutation of the source is never observable here.
#[derive(Debug, Clone)]
pub struct Copied {
    pub nodes: BTreeMap<NodeId, Node>,
    pub root: NodeId,
    pub suffix: String,
}

/// Deep-copy the subgraph reachable from `source`.
///
/// One fresh random suffix is minted per call and appended to every copied
/// id and every internal edge reference. Appending keeps distinct ids
/// distinct, and the suffix is redrawn until no copied id collides with the
/// source; destination collisions are the paste site's concern. Copying
/// `_root` duplicates the whole flow and leaves `_root` itself unmapped.
pub fn copy_subtree(graph: &Graph, source: &NodeId, options: CopyOptions) -> Result<Copied> {
    if !graph.contains(source) {
        return Err(EngineError::not_found(
            "Node to copy was not found",
            anyhow!("copy: missing source {source}"),
        ));
    }

    let reachable = algorithms::reachable_from(graph, source);
    let suffix = fresh_suffix(graph);
    let remap = |old: &NodeId| -> NodeId {
        if old.is_root() {
            old.clone()
        } else {
            NodeId(id::remap_id(old.as_str(), &suffix))
        }
    };

    let mut nodes = BTreeMap::new();
    for old_id in &reachable {
        let node = graph.get(old_id).expect("reachable set is drawn from the graph");
        let mut copied = node.clone();
        copied.edges = node.edges.iter().map(&remap).collect();
        if options.detach_portals {
            detach_portal(&mut copied);
        }
        nodes.insert(remap(old_id), copied);
    }

    Ok(Copied {
        root: remap(source),
        nodes,
        suffix,
    })
}

/// Redraw the suffix until no remapped id collides with a source id. One
/// draw almost always suffices; the loop is for correctness, not speed.
fn fresh_suffix(graph: &Graph) -> String {
    loop {
        let suffix = id::new_copy_suffix();
        let collides = graph
            .node_ids()
            .any(|old| graph.contains(&NodeId(id::remap_id(old.as_str(), &suffix))));
        if !collides {
            return suffix;
        }
    }
}

/// Demote an external portal to an internal one, dropping the cross-flow
/// reference from its payload. Also used by the flattener once a portal has
/// been resolved and spliced.
pub(crate) fn detach_portal(node: &mut Node) {
    if node.kind != NodeKind::ExternalPortal {
        return;
    }
    node.kind = NodeKind::InternalPortal;
    if let Some(data) = node.data.as_mut() {
        data.remove(PORTAL_FLOW_KEY);
        if data.is_empty() {
            node.data = None;
        }
    }
}
