use std::collections::BTreeMap;
use std::hint::black_box;

use anyhow::anyhow;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use uuid::Uuid;

use flowgraph::error::{EngineError, Result};
use flowgraph::flatten::{FlowResolver, flatten};
use flowgraph::models::{FlowId, Graph, Node, NodeId, NodeKind, PORTAL_FLOW_KEY};
use flowgraph::mutations::remove;

fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

fn node_id(prefix: &str, idx: usize) -> NodeId {
    NodeId::from(format!("{prefix}_n{idx:04}"))
}

fn question(text: &str) -> Node {
    let mut data = serde_json::Map::new();
    data.insert("text".to_string(), json!(text));
    Node::new(NodeKind::Question, Some(data))
}

/// A flow shaped like the deep decision trees this library is built for:
/// `fanout` branches under the root, each a chain `depth` nodes long.
fn synthetic_flow(prefix: &str, fanout: usize, depth: usize) -> Graph {
    let mut nodes = BTreeMap::new();
    let mut root = Node::new(NodeKind::Unknown, None);
    for branch in 0..fanout {
        let mut prev: Option<NodeId> = None;
        for level in (0..depth).rev() {
            let id = node_id(prefix, branch * depth + level);
            let mut node = question(&format!("branch {branch} level {level}"));
            if let Some(child) = prev.take() {
                node.edges.push(child);
            }
            prev = Some(id.clone());
            nodes.insert(id, node);
        }
        if let Some(head) = prev {
            root.edges.push(head);
        }
    }
    nodes.insert(NodeId::root(), root);
    Graph::from_nodes(nodes).unwrap()
}

fn bench_cascade_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("cascade_remove");
    for (fanout, depth) in [(10usize, 100usize), (50usize, 100usize)] {
        let graph = synthetic_flow("host", fanout, depth);
        let branch_heads = graph.root().edges.clone();

        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(
            BenchmarkId::new("remove_branch", format!("{fanout}x{depth}")),
            &(graph, branch_heads),
            |b, (graph, branch_heads)| {
                let mut state = 42u64;
                b.iter(|| {
                    let head =
                        &branch_heads[(lcg_next(&mut state) as usize) % branch_heads.len()];
                    black_box(remove(graph, head, &NodeId::root()).unwrap());
                });
            },
        );
    }
    group.finish();
}

struct BenchResolver {
    flows: BTreeMap<FlowId, Graph>,
}

impl FlowResolver for BenchResolver {
    fn load_draft(&self, flow_id: FlowId) -> Result<Graph> {
        self.flows
            .get(&flow_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("flow", anyhow!("unknown bench flow")))
    }

    fn load_published(&self, flow_id: FlowId) -> Result<Graph> {
        self.load_draft(flow_id)
    }
}

/// One host flow whose branches each end in a portal into a shared leaf flow.
fn portal_fixture(fanout: usize, depth: usize) -> (BenchResolver, FlowId) {
    let leaf_id = FlowId(Uuid::new_v4());
    let host_id = FlowId(Uuid::new_v4());

    let leaf = synthetic_flow("leaf", 4, 10);

    let mut nodes = BTreeMap::new();
    let mut root = Node::new(NodeKind::Unknown, None);
    for branch in 0..fanout {
        let portal_id = NodeId::from(format!("portal_{branch:02}"));
        let mut data = serde_json::Map::new();
        data.insert(PORTAL_FLOW_KEY.to_string(), json!(leaf_id.to_string()));
        nodes.insert(
            portal_id.clone(),
            Node::new(NodeKind::ExternalPortal, Some(data)),
        );

        let mut prev = portal_id;
        for level in 0..depth {
            let id = node_id("host", branch * depth + level);
            let mut node = question(&format!("branch {branch} level {level}"));
            node.edges.push(prev);
            prev = id.clone();
            nodes.insert(id, node);
        }
        root.edges.push(prev);
    }
    nodes.insert(NodeId::root(), root);
    let host = Graph::from_nodes(nodes).unwrap();

    let mut flows = BTreeMap::new();
    flows.insert(leaf_id, leaf);
    flows.insert(host_id, host);
    (BenchResolver { flows }, host_id)
}

fn bench_flatten(c: &mut Criterion) {
    let mut group = c.benchmark_group("flatten");
    for (fanout, depth) in [(10usize, 50usize), (50usize, 50usize)] {
        let (resolver, host_id) = portal_fixture(fanout, depth);
        let node_count = resolver.flows[&host_id].len();

        group.throughput(Throughput::Elements(node_count as u64));
        group.bench_with_input(
            BenchmarkId::new("flatten_portals", format!("{fanout}x{depth}")),
            &(resolver, host_id),
            |b, (resolver, host_id)| {
                b.iter(|| {
                    black_box(flatten(resolver, *host_id, true).unwrap());
                });
            },
        );
    }
    group.finish();
}

criterion_group!(flow_mutations, bench_cascade_remove, bench_flatten);
criterion_main!(flow_mutations);
