use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::copy::{self, CopyOptions};
use crate::error::{EngineError, Result};
use crate::find_replace::{self, TextMatch};
use crate::flatten;
use crate::models::{Flow, FlowId, Graph, NodeId, NodeKind, UserId};
use crate::mutations;
use crate::permissions::{
    AccessPolicy, FLOW_ROLE_ARCHIVE, FLOW_ROLE_COPY, FLOW_ROLE_EDIT, FLOW_ROLE_PUBLISH,
    FLOW_ROLE_READ,
};
use crate::store::{FlattenCache, FlowStore};
use crate::validate::{self, CheckRegistry, FlowDiagnosis};

/// High-level flow actions in one dispatchable shape.
///
/// Callers must provide a trusted `actor` sourced from validated auth/session
/// state, not from request payloads.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum FlowOperation {
    Connect {
        flow_id: FlowId,
        child: NodeId,
        parent: NodeId,
        index: Option<usize>,
    },
    Remove {
        flow_id: FlowId,
        id: NodeId,
        parent: NodeId,
    },
    AddNode {
        flow_id: FlowId,
        kind: NodeKind,
        data: Option<Map<String, Value>>,
        parent: NodeId,
        index: Option<usize>,
    },
    UpdateNode {
        flow_id: FlowId,
        id: NodeId,
        data: Option<Map<String, Value>>,
    },
    CopyInto {
        source_flow: FlowId,
        source_node: NodeId,
        destination_flow: FlowId,
        parent: NodeId,
        index: Option<usize>,
    },
    FindReplace {
        flow_id: FlowId,
        find: String,
        replace: Option<String>,
    },
    Flatten {
        flow_id: FlowId,
        draft: bool,
    },
    ValidateAndDiff {
        flow_id: FlowId,
    },
    Publish {
        flow_id: FlowId,
    },
    Archive {
        flow_id: FlowId,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FlowOperationResult {
    Flow {
        flow: Flow,
    },
    NodeAdded {
        node_id: NodeId,
        flow: Flow,
    },
    Matches {
        matches: Vec<TextMatch>,
        message: String,
    },
    Flattened {
        graph: Graph,
    },
    Diagnosis {
        diagnosis: FlowDiagnosis,
    },
    Published,
    Archived,
}

/// Orchestration facade: load -> pure mutation -> save with the op log, with
/// policy checks and cache invalidation around the edges. The pure algorithms
/// never see storage; this layer never rewrites graphs itself.
pub struct FlowOperations<S, P> {
    store: S,
    policy: P,
    registry: CheckRegistry,
    cache: FlattenCache,
}

impl<S, P> FlowOperations<S, P>
where
    S: FlowStore,
    P: AccessPolicy,
{
    pub fn new(store: S, policy: P) -> Self {
        Self {
            store,
            policy,
            registry: CheckRegistry::with_defaults(),
            cache: FlattenCache::new(),
        }
    }

    pub fn with_registry(store: S, policy: P, registry: CheckRegistry) -> Self {
        Self {
            store,
            policy,
            registry,
            cache: FlattenCache::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn execute(&self, actor: UserId, operation: FlowOperation) -> Result<FlowOperationResult> {
        match operation {
            FlowOperation::Connect {
                flow_id,
                child,
                parent,
                index,
            } => {
                let flow = self.connect(actor, flow_id, &child, &parent, index)?;
                Ok(FlowOperationResult::Flow { flow })
            }
            FlowOperation::Remove {
                flow_id,
                id,
                parent,
            } => {
                let flow = self.remove(actor, flow_id, &id, &parent)?;
                Ok(FlowOperationResult::Flow { flow })
            }
            FlowOperation::AddNode {
                flow_id,
                kind,
                data,
                parent,
                index,
            } => {
                let (node_id, flow) = self.add_node(actor, flow_id, kind, data, &parent, index)?;
                Ok(FlowOperationResult::NodeAdded { node_id, flow })
            }
            FlowOperation::UpdateNode { flow_id, id, data } => {
                let flow = self.update_node(actor, flow_id, &id, data)?;
                Ok(FlowOperationResult::Flow { flow })
            }
            FlowOperation::CopyInto {
                source_flow,
                source_node,
                destination_flow,
                parent,
                index,
            } => {
                let flow = self.copy_into(
                    actor,
                    source_flow,
                    &source_node,
                    destination_flow,
                    &parent,
                    index,
                )?;
                Ok(FlowOperationResult::Flow { flow })
            }
            FlowOperation::FindReplace {
                flow_id,
                find,
                replace,
            } => {
                let (matches, message) =
                    self.find_replace(actor, flow_id, &find, replace.as_deref())?;
                Ok(FlowOperationResult::Matches { matches, message })
            }
            FlowOperation::Flatten { flow_id, draft } => {
                let graph = self.flatten_flow(actor, flow_id, draft)?;
                Ok(FlowOperationResult::Flattened { graph })
            }
            FlowOperation::ValidateAndDiff { flow_id } => {
                let diagnosis = self.validate_and_diff(actor, flow_id)?;
                Ok(FlowOperationResult::Diagnosis { diagnosis })
            }
            FlowOperation::Publish { flow_id } => {
                self.publish_flow(actor, flow_id)?;
                Ok(FlowOperationResult::Published)
            }
            FlowOperation::Archive { flow_id } => {
                self.archive_flow(actor, flow_id)?;
                Ok(FlowOperationResult::Archived)
            }
        }
    }

    pub fn create_flow(&self, actor: UserId, flow: Flow) -> Result<Flow> {
        self.ensure_allowed(actor, flow.id, FLOW_ROLE_EDIT)?;
        tracing::info!(flow_id = %flow.id, name = %flow.name, "creating flow");
        self.store.create(flow.clone())?;
        Ok(flow)
    }

    pub fn connect(
        &self,
        actor: UserId,
        flow_id: FlowId,
        child: &NodeId,
        parent: &NodeId,
        index: Option<usize>,
    ) -> Result<Flow> {
        let graph = self.editable_graph(actor, flow_id)?;
        let outcome = mutations::connect(&graph, child, parent, index)?;
        self.commit(flow_id, outcome)
    }

    pub fn remove(
        &self,
        actor: UserId,
        flow_id: FlowId,
        id: &NodeId,
        parent: &NodeId,
    ) -> Result<Flow> {
        let graph = self.editable_graph(actor, flow_id)?;
        let outcome = mutations::remove(&graph, id, parent)?;
        self.commit(flow_id, outcome)
    }

    pub fn add_node(
        &self,
        actor: UserId,
        flow_id: FlowId,
        kind: NodeKind,
        data: Option<Map<String, Value>>,
        parent: &NodeId,
        index: Option<usize>,
    ) -> Result<(NodeId, Flow)> {
        let graph = self.editable_graph(actor, flow_id)?;
        let (node_id, outcome) = mutations::add_node(&graph, kind, data, parent, index)?;
        let flow = self.commit(flow_id, outcome)?;
        Ok((node_id, flow))
    }

    pub fn update_node(
        &self,
        actor: UserId,
        flow_id: FlowId,
        id: &NodeId,
        data: Option<Map<String, Value>>,
    ) -> Result<Flow> {
        let graph = self.editable_graph(actor, flow_id)?;
        let outcome = mutations::update_node(&graph, id, data)?;
        self.commit(flow_id, outcome)
    }

    /// Deep-copy a subtree of `source_flow` and splice it into
    /// `destination_flow` under `parent`. Destination policy decides whether
    /// the copy is allowed at all.
    pub fn copy_into(
        &self,
        actor: UserId,
        source_flow: FlowId,
        source_node: &NodeId,
        destination_flow: FlowId,
        parent: &NodeId,
        index: Option<usize>,
    ) -> Result<Flow> {
        self.ensure_allowed(actor, source_flow, FLOW_ROLE_READ)?;
        self.ensure_allowed(actor, destination_flow, FLOW_ROLE_COPY)?;

        let source = self.store.load(source_flow)?;
        let destination = self.editable_graph(actor, destination_flow)?;

        // Redraw the copy suffix until no copied id collides with the
        // destination either. `_root` is excluded: it is never remapped, so
        // pasting a whole flow under a parent still fails cleanly downstream.
        let mut copied = copy::copy_subtree(&source.graph, source_node, CopyOptions::default())?;
        while copied
            .nodes
            .keys()
            .any(|id| !id.is_root() && destination.contains(id))
        {
            copied = copy::copy_subtree(&source.graph, source_node, CopyOptions::default())?;
        }
        let outcome = mutations::paste(&destination, &copied, parent, index)?;
        tracing::debug!(
            source = %source_flow,
            destination = %destination_flow,
            nodes = copied.nodes.len(),
            "copied subtree between flows"
        );
        self.commit(destination_flow, outcome)
    }

    /// Search every payload of the flow, substituting when `replace` is
    /// supplied. The dry run writes nothing.
    pub fn find_replace(
        &self,
        actor: UserId,
        flow_id: FlowId,
        find: &str,
        replace: Option<&str>,
    ) -> Result<(Vec<TextMatch>, String)> {
        if replace.is_some() {
            self.ensure_allowed(actor, flow_id, FLOW_ROLE_EDIT)?;
        } else {
            self.ensure_allowed(actor, flow_id, FLOW_ROLE_READ)?;
        }

        let flow = self.store.load(flow_id)?;
        let result = find_replace::find_and_replace(&flow.graph, find, replace)?;
        if let Some(outcome) = result.outcome {
            self.commit(flow_id, outcome)?;
        }
        Ok((result.matches, result.message))
    }

    /// Flatten with an explicit memo: draft flattens are cached per
    /// `(flow, draft version)` and invalidated by every commit.
    pub fn flatten_flow(&self, actor: UserId, flow_id: FlowId, draft: bool) -> Result<Graph> {
        self.ensure_allowed(actor, flow_id, FLOW_ROLE_READ)?;
        if !draft {
            return flatten::flatten(&self.store, flow_id, false);
        }

        let version = self.store.load(flow_id)?.version;
        if let Some(cached) = self.cache.get(flow_id, version) {
            return Ok(cached);
        }
        let flat = flatten::flatten(&self.store, flow_id, true)?;
        self.cache.insert(flow_id, version, flat.clone());
        Ok(flat)
    }

    pub fn validate_and_diff(&self, actor: UserId, flow_id: FlowId) -> Result<FlowDiagnosis> {
        self.ensure_allowed(actor, flow_id, FLOW_ROLE_READ)?;
        validate::validate_and_diff_flow(&self.store, &self.registry, flow_id)
    }

    /// Store the flattened draft as the new published baseline.
    pub fn publish_flow(&self, actor: UserId, flow_id: FlowId) -> Result<()> {
        self.ensure_allowed(actor, flow_id, FLOW_ROLE_PUBLISH)?;
        let snapshot = flatten::flatten(&self.store, flow_id, true)?;
        tracing::info!(flow_id = %flow_id, nodes = snapshot.len(), "publishing flow");
        self.store.publish(flow_id, snapshot)
    }

    /// Soft-delete: the stored draft becomes a detached archival copy with
    /// every external portal reference dropped, so the archive cannot keep
    /// pointing at live flows.
    pub fn archive_flow(&self, actor: UserId, flow_id: FlowId) -> Result<()> {
        self.ensure_allowed(actor, flow_id, FLOW_ROLE_ARCHIVE)?;
        let flow = self.store.load(flow_id)?;
        let copied = copy::copy_subtree(
            &flow.graph,
            &NodeId::root(),
            CopyOptions {
                detach_portals: true,
            },
        )?;
        tracing::info!(flow_id = %flow_id, "archiving flow");
        self.store
            .archive(flow_id, Graph::from_nodes_unchecked(copied.nodes))?;
        self.cache.invalidate(flow_id);
        Ok(())
    }

    fn editable_graph(&self, actor: UserId, flow_id: FlowId) -> Result<Graph> {
        self.ensure_allowed(actor, flow_id, FLOW_ROLE_EDIT)?;
        let flow = self.store.load(flow_id)?;
        if flow.archived {
            return Err(EngineError::invalid(
                "Archived flows cannot be edited",
                anyhow!("edit attempted on archived flow {flow_id}"),
            ));
        }
        Ok(flow.graph)
    }

    /// Persist one committed mutation with its patch log and invalidate the
    /// flatten memo. An error anywhere earlier means nothing was written.
    fn commit(&self, flow_id: FlowId, outcome: mutations::MutationOutcome) -> Result<Flow> {
        tracing::debug!(flow_id = %flow_id, ops = outcome.ops.len(), "committing mutation");
        let flow = self.store.save(flow_id, outcome.graph, &outcome.ops)?;
        self.cache.invalidate(flow_id);
        Ok(flow)
    }

    fn ensure_allowed(&self, actor: UserId, flow_id: FlowId, role: &str) -> Result<()> {
        if self.policy.allows(actor, flow_id, role) {
            return Ok(());
        }
        tracing::warn!(actor = %actor, flow_id = %flow_id, role, "permission refused");
        Err(EngineError::forbidden(
            "You do not have permission to perform this operation on this flow",
            anyhow!("policy refused role {role} for actor {actor} on flow {flow_id}"),
        ))
    }
}
