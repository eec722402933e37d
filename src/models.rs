use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::id;
use crate::invariants;

/// Id of the distinguished root entry every graph carries. It may be emptied
/// to `edges: []` but is never deleted as an object.
pub const ROOT_NODE_ID: &str = "_root";

/// Payload key an external portal uses to name the flow it references.
pub const PORTAL_FLOW_KEY: &str = "flowId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct FlowId(pub Uuid);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FlowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for FlowId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct UserId(pub Uuid);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Short URL-safe node identifier, unique within one graph instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn mint() -> Self {
        Self(id::new_node_id())
    }

    pub fn root() -> Self {
        Self(ROOT_NODE_ID.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_NODE_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Closed set of known node kinds plus a forward-compatible fallback. Most
/// graph algorithms only need `edges`; the kind matters to the flattener
/// (portals) and to the rule checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    #[default]
    Question,
    Checklist,
    Answer,
    Statement,
    Content,
    Filter,
    InternalPortal,
    ExternalPortal,
    Pay,
    SetFee,
    PlanningConstraints,
    FindProperty,
    FileUpload,
    Send,
    Result,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<NodeId>,
}

impl Node {
    pub fn new(kind: NodeKind, data: Option<Map<String, Value>>) -> Self {
        Self {
            kind,
            data,
            edges: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.edges.is_empty()
    }

    /// Flow referenced by an external portal, if this node is one and its
    /// payload carries a parseable reference.
    pub fn portal_flow(&self) -> Option<FlowId> {
        if self.kind != NodeKind::ExternalPortal {
            return None;
        }
        self.data
            .as_ref()
            .and_then(|data| data.get(PORTAL_FLOW_KEY))
            .and_then(Value::as_str)
            .and_then(|raw| FlowId::from_str(raw).ok())
    }

    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get(key))
    }
}

/// Adjacency-map representation of one flow graph. Always contains `_root`.
/// Mutations never touch a graph in place; they clone, transform and return a
/// new value (see `mutations`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
}

impl Graph {
    /// Empty graph: `{_root: {edges: []}}`.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodeId::root(), Node::new(NodeKind::Unknown, None));
        Self { nodes }
    }

    /// Build from an existing node map, rejecting invariant violations with
    /// `MalformedGraph`. This is the load-time entry point.
    pub fn from_nodes(nodes: BTreeMap<NodeId, Node>) -> Result<Self> {
        invariants::ensure_graph_invariants(&nodes)?;
        Ok(Self { nodes })
    }

    /// Wrap a node map without invariant checks. Internal constructor for
    /// transforms whose output is correct by construction.
    pub(crate) fn from_nodes_unchecked(nodes: BTreeMap<NodeId, Node>) -> Self {
        Self { nodes }
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn root(&self) -> &Node {
        self.nodes
            .get(ROOT_NODE_ID)
            .expect("graph invariant: _root always exists")
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when only `_root` remains.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub(crate) fn nodes(&self) -> &BTreeMap<NodeId, Node> {
        &self.nodes
    }

    pub(crate) fn into_nodes(self) -> BTreeMap<NodeId, Node> {
        self.nodes
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// Draft record a store persists: the graph plus its authoring envelope.
/// Flows are archived, never hard-deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub version: u64,
    pub archived: bool,
    pub graph: Graph,
}

impl Flow {
    pub fn new(id: FlowId, name: impl Into<String>, now: NaiveDateTime) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            created_at: now,
            updated_at: now,
            version: 0,
            archived: false,
            graph: Graph::new(),
        }
    }
}
