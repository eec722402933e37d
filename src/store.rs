use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use chrono::Utc;

use crate::error::{EngineError, Result};
use crate::flatten::FlowResolver;
use crate::models::{Flow, FlowId, Graph};
use crate::patch::PatchOp;

/// Persistence collaborator. The engine never manages transactions itself;
/// each call is expected to be atomic on the store's side.
pub trait FlowStore {
    fn create(&self, flow: Flow) -> Result<()>;
    fn load(&self, flow_id: FlowId) -> Result<Flow>;
    /// Persist a committed mutation together with its patch log, bumping the
    /// draft version.
    fn save(&self, flow_id: FlowId, graph: Graph, ops: &[PatchOp]) -> Result<Flow>;
    fn load_published(&self, flow_id: FlowId) -> Result<Graph>;
    /// Store `snapshot` as the new published baseline.
    fn publish(&self, flow_id: FlowId, snapshot: Graph) -> Result<()>;
    /// Soft-delete: the flow is flagged and its draft replaced by the
    /// detached archival copy. Nothing is ever hard-deleted.
    fn archive(&self, flow_id: FlowId, archival_copy: Graph) -> Result<()>;
}

impl<S: FlowStore> FlowResolver for S {
    fn load_draft(&self, flow_id: FlowId) -> Result<Graph> {
        Ok(self.load(flow_id)?.graph)
    }

    fn load_published(&self, flow_id: FlowId) -> Result<Graph> {
        FlowStore::load_published(self, flow_id)
    }
}

#[derive(Debug, Clone)]
struct StoredFlow {
    flow: Flow,
    published: Option<Graph>,
    op_log: Vec<Vec<PatchOp>>,
}

/// In-memory store for tests and single-process embedding. Interior
/// mutability keeps the trait surface identical to a durable implementation.
#[derive(Debug, Default)]
pub struct InMemoryFlowStore {
    flows: Mutex<HashMap<FlowId, StoredFlow>>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every patch list saved for `flow_id`, oldest first.
    pub fn op_log(&self, flow_id: FlowId) -> Vec<Vec<PatchOp>> {
        self.flows
            .lock()
            .expect("flow store lock poisoned")
            .get(&flow_id)
            .map(|stored| stored.op_log.clone())
            .unwrap_or_default()
    }
}

impl FlowStore for InMemoryFlowStore {
    fn create(&self, flow: Flow) -> Result<()> {
        let mut flows = self.flows.lock().expect("flow store lock poisoned");
        if flows.contains_key(&flow.id) {
            return Err(EngineError::invalid(
                "A flow with this id already exists",
                anyhow!("create: duplicate flow {}", flow.id),
            ));
        }
        flows.insert(
            flow.id,
            StoredFlow {
                flow,
                published: None,
                op_log: Vec::new(),
            },
        );
        Ok(())
    }

    fn load(&self, flow_id: FlowId) -> Result<Flow> {
        self.flows
            .lock()
            .expect("flow store lock poisoned")
            .get(&flow_id)
            .map(|stored| stored.flow.clone())
            .ok_or_else(|| {
                EngineError::not_found("Flow was not found", anyhow!("load: missing {flow_id}"))
            })
    }

    fn save(&self, flow_id: FlowId, graph: Graph, ops: &[PatchOp]) -> Result<Flow> {
        let mut flows = self.flows.lock().expect("flow store lock poisoned");
        let stored = flows.get_mut(&flow_id).ok_or_else(|| {
            EngineError::not_found("Flow was not found", anyhow!("save: missing {flow_id}"))
        })?;

        stored.flow.graph = graph;
        stored.flow.version += 1;
        stored.flow.updated_at = Utc::now().naive_utc();
        stored.op_log.push(ops.to_vec());
        Ok(stored.flow.clone())
    }

    fn load_published(&self, flow_id: FlowId) -> Result<Graph> {
        self.flows
            .lock()
            .expect("flow store lock poisoned")
            .get(&flow_id)
            .and_then(|stored| stored.published.clone())
            .ok_or_else(|| {
                EngineError::not_found(
                    "Flow has no published snapshot",
                    anyhow!("load_published: missing snapshot for {flow_id}"),
                )
            })
    }

    fn publish(&self, flow_id: FlowId, snapshot: Graph) -> Result<()> {
        let mut flows = self.flows.lock().expect("flow store lock poisoned");
        let stored = flows.get_mut(&flow_id).ok_or_else(|| {
            EngineError::not_found("Flow was not found", anyhow!("publish: missing {flow_id}"))
        })?;
        stored.published = Some(snapshot);
        Ok(())
    }

    fn archive(&self, flow_id: FlowId, archival_copy: Graph) -> Result<()> {
        let mut flows = self.flows.lock().expect("flow store lock poisoned");
        let stored = flows.get_mut(&flow_id).ok_or_else(|| {
            EngineError::not_found("Flow was not found", anyhow!("archive: missing {flow_id}"))
        })?;
        stored.flow.archived = true;
        stored.flow.graph = archival_copy;
        stored.flow.updated_at = Utc::now().naive_utc();
        Ok(())
    }
}

/// Explicit memo for flattened snapshots, keyed by `(flow, draft version)`
/// and invalidated on write. Threaded through calls rather than held as
/// ambient global state.
#[derive(Debug, Default)]
pub struct FlattenCache {
    entries: Mutex<HashMap<(FlowId, u64), Graph>>,
}

impl FlattenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, flow_id: FlowId, version: u64) -> Option<Graph> {
        self.entries
            .lock()
            .expect("flatten cache lock poisoned")
            .get(&(flow_id, version))
            .cloned()
    }

    pub fn insert(&self, flow_id: FlowId, version: u64, graph: Graph) {
        self.entries
            .lock()
            .expect("flatten cache lock poisoned")
            .insert((flow_id, version), graph);
    }

    /// Drop every cached snapshot of `flow_id`, whatever the version.
    pub fn invalidate(&self, flow_id: FlowId) {
        self.entries
            .lock()
            .expect("flatten cache lock poisoned")
            .retain(|(cached, _), _| *cached != flow_id);
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::NodeId;
    use crate::patch::PatchOp;

    fn new_flow() -> Flow {
        Flow::new(FlowId(Uuid::new_v4()), "Test flow", Utc::now().naive_utc())
    }

    #[test]
    fn save_bumps_version_and_appends_the_op_log() {
        let store = InMemoryFlowStore::new();
        let flow = new_flow();
        let flow_id = flow.id;
        store.create(flow).expect("create succeeds");

        let ops = vec![PatchOp::insert_edge(&NodeId::root(), 0, &NodeId::from("a"))];
        let saved = store
            .save(flow_id, Graph::new(), &ops)
            .expect("save succeeds");
        assert_eq!(saved.version, 1);
        assert_eq!(store.op_log(flow_id), vec![ops]);
    }

    #[test]
    fn unpublished_flows_have_no_published_snapshot() {
        let store = InMemoryFlowStore::new();
        let flow = new_flow();
        let flow_id = flow.id;
        store.create(flow).expect("create succeeds");

        let err = FlowStore::load_published(&store, flow_id).expect_err("no snapshot yet");
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);

        store
            .publish(flow_id, Graph::new())
            .expect("publish succeeds");
        FlowStore::load_published(&store, flow_id).expect("snapshot now exists");
    }

    #[test]
    fn archive_flags_without_deleting() {
        let store = InMemoryFlowStore::new();
        let flow = new_flow();
        let flow_id = flow.id;
        store.create(flow).expect("create succeeds");

        store
            .archive(flow_id, Graph::new())
            .expect("archive succeeds");
        let loaded = store.load(flow_id).expect("archived flows still load");
        assert!(loaded.archived);
    }

    #[test]
    fn flatten_cache_is_keyed_by_version_and_invalidated_per_flow() {
        let cache = FlattenCache::new();
        let flow_id = FlowId(Uuid::new_v4());
        cache.insert(flow_id, 3, Graph::new());

        assert!(cache.get(flow_id, 3).is_some());
        assert!(cache.get(flow_id, 4).is_none());

        cache.invalidate(flow_id);
        assert!(cache.get(flow_id, 3).is_none());
    }
}
