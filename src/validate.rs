use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::error::{ErrorKind, Result};
use crate::flatten::{self, FlowResolver};
use crate::models::{FlowId, Graph, NodeId, NodeKind};

/// Verdict of one structural rule check. Failures are reported as data,
/// never raised as errors; every registered check always runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    #[serde(rename = "Not applicable")]
    NotApplicable,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationCheck {
    pub title: &'static str,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

/// One node that differs between the draft and published flattened graphs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlteredNode {
    pub id: NodeId,
    pub change: ChangeKind,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDiagnosis {
    pub altered_nodes: Vec<AlteredNode>,
    pub validation_checks: Vec<ValidationCheck>,
    pub message: String,
}

/// Pluggable list of rule checks run against a flattened draft. Extensible
/// without touching the diff orchestration.
pub struct CheckRegistry {
    checks: Vec<Box<dyn Fn(&Graph) -> ValidationCheck + Send + Sync>>,
}

impl CheckRegistry {
    pub fn empty() -> Self {
        Self { checks: Vec::new() }
    }

    /// The built-in battery: fees, planning constraints, application types,
    /// invite to pay.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(check_fees);
        registry.register(check_planning_constraints);
        registry.register(check_application_types);
        registry.register(check_invite_to_pay);
        registry
    }

    pub fn register<F>(&mut self, check: F)
    where
        F: Fn(&Graph) -> ValidationCheck + Send + Sync + 'static,
    {
        self.checks.push(Box::new(check));
    }

    /// Run every check, order-insensitive and independent: one Fail never
    /// suppresses the others.
    pub fn run(&self, graph: &Graph) -> Vec<ValidationCheck> {
        self.checks.iter().map(|check| check(graph)).collect()
    }
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Ordered list of nodes that differ by deep equality between two flattened
/// graphs.
pub fn diff_flattened(published: &Graph, draft: &Graph) -> Vec<AlteredNode> {
    let mut altered = Vec::new();
    let ids: std::collections::BTreeSet<&NodeId> =
        published.node_ids().chain(draft.node_ids()).collect();

    for id in ids {
        match (published.get(id), draft.get(id)) {
            (None, Some(node)) => altered.push(AlteredNode {
                id: id.clone(),
                change: ChangeKind::Added,
                kind: node.kind,
            }),
            (Some(node), None) => altered.push(AlteredNode {
                id: id.clone(),
                change: ChangeKind::Removed,
                kind: node.kind,
            }),
            (Some(old), Some(new)) if old != new => altered.push(AlteredNode {
                id: id.clone(),
                change: ChangeKind::Changed,
                kind: new.kind,
            }),
            _ => {}
        }
    }

    altered
}

/// Pre-publish validation: flatten the draft, diff it against the
/// last-published flattened snapshot, and run the rule-check battery.
///
/// A flow that was never published diffs against the empty graph. The only
/// fatal failure path is a flattening error (for example a portal cycle),
/// which aborts the whole call.
pub fn validate_and_diff_flow(
    resolver: &impl FlowResolver,
    registry: &CheckRegistry,
    flow_id: FlowId,
) -> Result<FlowDiagnosis> {
    let draft = flatten::flatten(resolver, flow_id, true)?;
    let published = match flatten::flatten(resolver, flow_id, false) {
        Ok(graph) => graph,
        Err(err) if err.kind == ErrorKind::NotFound => Graph::new(),
        Err(err) => return Err(err),
    };

    let altered_nodes = diff_flattened(&published, &draft);
    let validation_checks = registry.run(&draft);
    let message = if altered_nodes.is_empty() {
        "No new changes to publish".to_string()
    } else {
        format!("Changes queued to publish: {} nodes", altered_nodes.len())
    };

    Ok(FlowDiagnosis {
        altered_nodes,
        validation_checks,
        message,
    })
}

fn count_kind(graph: &Graph, kind: NodeKind) -> usize {
    graph.iter().filter(|(_, node)| node.kind == kind).count()
}

/// A flow that takes payment must set its fee in exactly one place.
fn check_fees(graph: &Graph) -> ValidationCheck {
    let title = "Fees";
    if count_kind(graph, NodeKind::Pay) == 0 {
        return ValidationCheck {
            title,
            status: CheckStatus::NotApplicable,
            message: "Your flow is not using Pay".to_string(),
        };
    }
    match count_kind(graph, NodeKind::SetFee) {
        1 => ValidationCheck {
            title,
            status: CheckStatus::Pass,
            message: "Your flow has valid fees".to_string(),
        },
        0 => ValidationCheck {
            title,
            status: CheckStatus::Fail,
            message: "When using Pay, your flow must include a Set fee component".to_string(),
        },
        many => ValidationCheck {
            title,
            status: CheckStatus::Fail,
            message: format!(
                "When using Pay, your flow must set its fee in exactly one place (found {many})"
            ),
        },
    }
}

/// Planning-constraint lookups must happen in exactly one step.
fn check_planning_constraints(graph: &Graph) -> ValidationCheck {
    let title = "Planning constraints";
    match count_kind(graph, NodeKind::PlanningConstraints) {
        0 => ValidationCheck {
            title,
            status: CheckStatus::NotApplicable,
            message: "Your flow is not using Planning constraints".to_string(),
        },
        1 => ValidationCheck {
            title,
            status: CheckStatus::Pass,
            message: "Your flow has valid Planning constraints".to_string(),
        },
        many => ValidationCheck {
            title,
            status: CheckStatus::Fail,
            message: format!(
                "Your flow must check Planning constraints in exactly one place (found {many})"
            ),
        },
    }
}

/// Payload key a question binds answers to.
const BINDING_KEY: &str = "fn";
/// Payload key an answer option stores its value under.
const VALUE_KEY: &str = "val";
/// Binding statutory flows set their application type through.
const APPLICATION_TYPE_BINDING: &str = "application.type";

/// Application-type values the downstream statutory submission service
/// recognizes. Extending this list is a deliberate act, not a data change.
static RECOGNIZED_APPLICATION_TYPES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "ldc.existing",
        "ldc.proposed",
        "listedBuildingConsent",
        "pa.part1.classA",
        "pa.part3.classMA",
        "pp.full.householder",
        "pp.full.householder.retro",
        "pp.full.minor",
        "pp.full.major",
        "wtt.consent",
        "hedgerowRemovalNotice",
    ]
    .into_iter()
    .collect()
});

/// Statutory flows (those that submit via Send) must set a recognized
/// application type.
fn check_application_types(graph: &Graph) -> ValidationCheck {
    let title = "Application types";
    if count_kind(graph, NodeKind::Send) == 0 {
        return ValidationCheck {
            title,
            status: CheckStatus::NotApplicable,
            message: "Your flow is not using Send".to_string(),
        };
    }

    let setters: Vec<&NodeId> = graph
        .iter()
        .filter(|(_, node)| {
            node.data_field(BINDING_KEY).and_then(|v| v.as_str())
                == Some(APPLICATION_TYPE_BINDING)
        })
        .map(|(id, _)| id)
        .collect();

    if setters.is_empty() {
        return ValidationCheck {
            title,
            status: CheckStatus::Fail,
            message: format!(
                "Statutory flows must set \"{APPLICATION_TYPE_BINDING}\" before Send"
            ),
        };
    }

    let mut unrecognized = Vec::new();
    for setter in setters {
        let node = graph.get(setter).expect("setter ids come from this graph");
        for child in &node.edges {
            let Some(option) = graph.get(child) else {
                continue;
            };
            if let Some(value) = option.data_field(VALUE_KEY).and_then(|v| v.as_str()) {
                if !RECOGNIZED_APPLICATION_TYPES.contains(value) {
                    unrecognized.push(value.to_string());
                }
            }
        }
    }

    if unrecognized.is_empty() {
        ValidationCheck {
            title,
            status: CheckStatus::Pass,
            message: "Your flow has valid application types".to_string(),
        }
    } else {
        unrecognized.sort();
        unrecognized.dedup();
        ValidationCheck {
            title,
            status: CheckStatus::Fail,
            message: format!(
                "Unrecognized application type values: {}",
                unrecognized.join(", ")
            ),
        }
    }
}

/// Payment without a submission step strands the applicant after paying.
fn check_invite_to_pay(graph: &Graph) -> ValidationCheck {
    let title = "Invite to pay";
    if count_kind(graph, NodeKind::Pay) == 0 {
        return ValidationCheck {
            title,
            status: CheckStatus::NotApplicable,
            message: "Your flow is not using Pay".to_string(),
        };
    }
    if count_kind(graph, NodeKind::Send) == 0 {
        ValidationCheck {
            title,
            status: CheckStatus::Warn,
            message: "Pay without a Send step leaves paid applications unsubmitted".to_string(),
        }
    } else {
        ValidationCheck {
            title,
            status: CheckStatus::Pass,
            message: "Pay is followed up by Send".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use anyhow::anyhow;
    use serde_json::{json, Map, Value};
    use uuid::Uuid;

    use super::*;
    use crate::error::EngineError;
    use crate::models::{Node, PORTAL_FLOW_KEY, ROOT_NODE_ID};

    struct FixtureResolver {
        drafts: HashMap<FlowId, Graph>,
        published: HashMap<FlowId, Graph>,
    }

    impl FlowResolver for FixtureResolver {
        fn load_draft(&self, flow_id: FlowId) -> Result<Graph> {
            self.drafts.get(&flow_id).cloned().ok_or_else(|| {
                EngineError::not_found("Flow was not found", anyhow!("missing {flow_id}"))
            })
        }

        fn load_published(&self, flow_id: FlowId) -> Result<Graph> {
            self.published.get(&flow_id).cloned().ok_or_else(|| {
                EngineError::not_found(
                    "Flow has no published snapshot",
                    anyhow!("missing published {flow_id}"),
                )
            })
        }
    }

    fn data(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn graph_of(entries: Vec<(&str, Node)>) -> Graph {
        let mut root = Node::new(NodeKind::Unknown, None);
        root.edges = entries.iter().map(|(id, _)| NodeId::from(*id)).collect();
        let mut nodes: BTreeMap<NodeId, Node> = entries
            .into_iter()
            .map(|(id, node)| (NodeId::from(id), node))
            .collect();
        nodes.insert(NodeId::root(), root);
        Graph::from_nodes(nodes).expect("test graph should satisfy invariants")
    }

    #[test]
    fn fees_check_fails_without_a_set_fee_and_goes_dormant_without_pay() {
        let with_pay = graph_of(vec![("paynode", Node::new(NodeKind::Pay, None))]);
        let check = check_fees(&with_pay);
        assert_eq!(check.status, CheckStatus::Fail);
        assert!(check.message.contains("Set fee"));

        let without_pay = graph_of(vec![("q", Node::new(NodeKind::Question, None))]);
        assert_eq!(check_fees(&without_pay).status, CheckStatus::NotApplicable);

        let valid = graph_of(vec![
            ("paynode", Node::new(NodeKind::Pay, None)),
            ("feenode", Node::new(NodeKind::SetFee, None)),
        ]);
        assert_eq!(check_fees(&valid).status, CheckStatus::Pass);

        let doubled = graph_of(vec![
            ("paynode", Node::new(NodeKind::Pay, None)),
            ("feenode1", Node::new(NodeKind::SetFee, None)),
            ("feenode2", Node::new(NodeKind::SetFee, None)),
        ]);
        assert_eq!(check_fees(&doubled).status, CheckStatus::Fail);
    }

    #[test]
    fn planning_constraints_must_appear_exactly_once_when_used() {
        let single = graph_of(vec![(
            "constraints",
            Node::new(NodeKind::PlanningConstraints, None),
        )]);
        assert_eq!(check_planning_constraints(&single).status, CheckStatus::Pass);

        let doubled = graph_of(vec![
            ("c1", Node::new(NodeKind::PlanningConstraints, None)),
            ("c2", Node::new(NodeKind::PlanningConstraints, None)),
        ]);
        assert_eq!(check_planning_constraints(&doubled).status, CheckStatus::Fail);

        let none = graph_of(vec![("q", Node::new(NodeKind::Question, None))]);
        assert_eq!(
            check_planning_constraints(&none).status,
            CheckStatus::NotApplicable
        );
    }

    #[test]
    fn application_types_are_checked_against_the_recognized_set() {
        let mut setter = Node::new(
            NodeKind::Question,
            Some(data(&[(BINDING_KEY, json!(APPLICATION_TYPE_BINDING))])),
        );
        setter.edges = vec![NodeId::from("optionaaaa")];
        let option = Node::new(
            NodeKind::Answer,
            Some(data(&[(VALUE_KEY, json!("pp.full.householder"))])),
        );

        let valid = graph_of(vec![
            ("typesetter", setter.clone()),
            ("optionaaaa", option),
            ("sendnode00", Node::new(NodeKind::Send, None)),
        ]);
        assert_eq!(check_application_types(&valid).status, CheckStatus::Pass);

        let bad_option = Node::new(
            NodeKind::Answer,
            Some(data(&[(VALUE_KEY, json!("pp.imaginary"))])),
        );
        let invalid = graph_of(vec![
            ("typesetter", setter),
            ("optionaaaa", bad_option),
            ("sendnode00", Node::new(NodeKind::Send, None)),
        ]);
        let check = check_application_types(&invalid);
        assert_eq!(check.status, CheckStatus::Fail);
        assert!(check.message.contains("pp.imaginary"));

        let nonstatutory = graph_of(vec![("q", Node::new(NodeKind::Question, None))]);
        assert_eq!(
            check_application_types(&nonstatutory).status,
            CheckStatus::NotApplicable
        );

        let missing_setter = graph_of(vec![("sendnode00", Node::new(NodeKind::Send, None))]);
        assert_eq!(
            check_application_types(&missing_setter).status,
            CheckStatus::Fail
        );
    }

    #[test]
    fn diff_reports_added_removed_and_changed_nodes() {
        let published = graph_of(vec![
            ("keptnode00", Node::new(NodeKind::Question, None)),
            ("oldnode000", Node::new(NodeKind::Statement, None)),
            ("editednode", Node::new(NodeKind::Question, None)),
        ]);
        let mut edited = Node::new(NodeKind::Question, None);
        edited.data = Some(data(&[("title", json!("Now with a title"))]));
        let draft = graph_of(vec![
            ("keptnode00", Node::new(NodeKind::Question, None)),
            ("editednode", edited),
            ("newnode000", Node::new(NodeKind::Checklist, None)),
        ]);

        let altered = diff_flattened(&published, &draft);
        // _root changed too: its ordered children differ.
        let by_id: HashMap<&str, ChangeKind> = altered
            .iter()
            .map(|node| (node.id.as_str(), node.change))
            .collect();
        assert_eq!(by_id["newnode000"], ChangeKind::Added);
        assert_eq!(by_id["oldnode000"], ChangeKind::Removed);
        assert_eq!(by_id["editednode"], ChangeKind::Changed);
        assert!(!by_id.contains_key("keptnode00"));
    }

    #[test]
    fn identical_graphs_diff_to_nothing() {
        let graph = graph_of(vec![("a", Node::new(NodeKind::Question, None))]);
        assert!(diff_flattened(&graph, &graph).is_empty());
    }

    #[test]
    fn validate_and_diff_runs_every_check_and_diffs_against_empty_when_unpublished() {
        let flow = FlowId(Uuid::new_v4());
        let draft = graph_of(vec![("paynode", Node::new(NodeKind::Pay, None))]);
        let resolver = FixtureResolver {
            drafts: [(flow, draft)].into_iter().collect(),
            published: HashMap::new(),
        };

        let diagnosis = validate_and_diff_flow(&resolver, &CheckRegistry::with_defaults(), flow)
            .expect("validation should succeed");

        // Never published: the pay node and the changed root are both new.
        assert!(diagnosis
            .altered_nodes
            .iter()
            .any(|node| node.id.as_str() == "paynode" && node.change == ChangeKind::Added));

        // All four built-ins ran; the failing Fees check suppressed nothing.
        assert_eq!(diagnosis.validation_checks.len(), 4);
        let fees = diagnosis
            .validation_checks
            .iter()
            .find(|check| check.title == "Fees")
            .expect("fees check present");
        assert_eq!(fees.status, CheckStatus::Fail);
        assert!(diagnosis
            .validation_checks
            .iter()
            .any(|check| check.title == "Planning constraints"
                && check.status == CheckStatus::NotApplicable));
    }

    #[test]
    fn removing_the_payment_step_turns_fees_not_applicable() {
        let flow = FlowId(Uuid::new_v4());
        let draft = graph_of(vec![("q", Node::new(NodeKind::Question, None))]);
        let resolver = FixtureResolver {
            drafts: [(flow, draft)].into_iter().collect(),
            published: HashMap::new(),
        };

        let diagnosis = validate_and_diff_flow(&resolver, &CheckRegistry::with_defaults(), flow)
            .expect("validation should succeed");
        let fees = diagnosis
            .validation_checks
            .iter()
            .find(|check| check.title == "Fees")
            .expect("fees check present");
        assert_eq!(fees.status, CheckStatus::NotApplicable);
    }

    #[test]
    fn a_portal_cycle_aborts_the_whole_validation() {
        let a = FlowId(Uuid::new_v4());
        let mut portal = Node::new(NodeKind::ExternalPortal, None);
        portal.data = Some(data(&[(PORTAL_FLOW_KEY, json!(a.to_string()))]));
        let mut root = Node::new(NodeKind::Unknown, None);
        root.edges = vec![NodeId::from("selfportal")];
        let graph = Graph::from_nodes(
            [(NodeId::root(), root), (NodeId::from("selfportal"), portal)]
                .into_iter()
                .collect(),
        )
        .expect("valid graph");

        let resolver = FixtureResolver {
            drafts: [(a, graph)].into_iter().collect(),
            published: HashMap::new(),
        };

        let err = validate_and_diff_flow(&resolver, &CheckRegistry::with_defaults(), a)
            .expect_err("cycle must abort");
        assert_eq!(err.kind, crate::error::ErrorKind::CircularReference);
    }

    #[test]
    fn custom_checks_can_be_registered() {
        let mut registry = CheckRegistry::empty();
        registry.register(|graph: &Graph| ValidationCheck {
            title: "Node count",
            status: if graph.len() > 3 {
                CheckStatus::Warn
            } else {
                CheckStatus::Pass
            },
            message: format!("{} nodes", graph.len()),
        });

        let graph = graph_of(vec![("a", Node::new(NodeKind::Question, None))]);
        let checks = registry.run(&graph);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].title, "Node count");
        assert_eq!(checks[0].status, CheckStatus::Pass);
    }

    #[test]
    fn root_node_id_is_reported_when_top_level_order_changes() {
        let published = graph_of(vec![("a", Node::new(NodeKind::Question, None))]);
        let draft = graph_of(vec![
            ("a", Node::new(NodeKind::Question, None)),
            ("b", Node::new(NodeKind::Question, None)),
        ]);
        let altered = diff_flattened(&published, &draft);
        assert!(altered
            .iter()
            .any(|node| node.id.as_str() == ROOT_NODE_ID && node.change == ChangeKind::Changed));
    }
}
