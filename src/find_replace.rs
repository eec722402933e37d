use serde_json::Value;

use crate::error::Result;
use crate::models::{Graph, NodeId};
use crate::mutations::MutationOutcome;
use crate::patch::PatchOp;

/// One payload field containing the search term, recorded before any
/// substitution so callers get an audit trail of what was touched.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMatch {
    pub node_id: NodeId,
    /// Dotted path of the field inside the node payload, list positions as
    /// numbers (`options.1.text`).
    pub field: String,
    /// Field value before substitution.
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct FindReplaceOutcome {
    /// Present only when a replacement was supplied and at least one field
    /// changed; a dry run never produces a graph.
    pub outcome: Option<MutationOutcome>,
    pub matches: Vec<TextMatch>,
    pub message: String,
}

/// Exact, case-sensitive search across every string-valued payload field.
/// Pure; calling it twice with identical arguments returns identical matches.
pub fn find_in_flow(graph: &Graph, needle: &str) -> Vec<TextMatch> {
    let mut matches = Vec::new();
    if needle.is_empty() {
        return matches;
    }
    for (id, node) in graph.iter() {
        if let Some(data) = &node.data {
            for (key, value) in data {
                collect_matches(id, key, value, needle, &mut matches);
            }
        }
    }
    matches
}

/// Search and, when `replacement` is supplied, substitute every occurrence in
/// every matching field. The dry run (no replacement) never mutates. Returned
/// matches carry pre-substitution values either way.
pub fn find_and_replace(
    graph: &Graph,
    needle: &str,
    replacement: Option<&str>,
) -> Result<FindReplaceOutcome> {
    let matches = find_in_flow(graph, needle);

    let Some(replacement) = replacement else {
        return Ok(FindReplaceOutcome {
            outcome: None,
            message: format!("Found {} matches of \"{needle}\"", matches.len()),
            matches,
        });
    };

    if matches.is_empty() {
        return Ok(FindReplaceOutcome {
            outcome: None,
            message: format!("Didn't find \"{needle}\" in this flow, nothing to replace"),
            matches,
        });
    }

    let mut nodes = graph.nodes().clone();
    let mut ops = Vec::new();
    let touched: std::collections::BTreeSet<&NodeId> =
        matches.iter().map(|m| &m.node_id).collect();
    for id in touched {
        let node = nodes.get_mut(id).expect("matches come from this graph");
        let old = node.clone();
        if let Some(data) = node.data.as_mut() {
            for value in data.values_mut() {
                substitute(value, needle, replacement);
            }
        }
        if *node != old {
            ops.push(PatchOp::delete_node(id, &old));
            ops.push(PatchOp::insert_node(id, node));
        }
    }

    let message = format!(
        "Found {} matches of \"{needle}\" and replaced with \"{replacement}\"",
        matches.len()
    );
    Ok(FindReplaceOutcome {
        outcome: Some(MutationOutcome {
            graph: Graph::from_nodes_unchecked(nodes),
            ops,
        }),
        matches,
        message,
    })
}

fn collect_matches(
    node_id: &NodeId,
    path: &str,
    value: &Value,
    needle: &str,
    matches: &mut Vec<TextMatch>,
) {
    match value {
        Value::String(s) => {
            if s.contains(needle) {
                matches.push(TextMatch {
                    node_id: node_id.clone(),
                    field: path.to_string(),
                    value: s.clone(),
                });
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_matches(node_id, &format!("{path}.{index}"), item, needle, matches);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                collect_matches(node_id, &format!("{path}.{key}"), item, needle, matches);
            }
        }
        _ => {}
    }
}

fn substitute(value: &mut Value, needle: &str, replacement: &str) {
    match value {
        Value::String(s) => {
            if s.contains(needle) {
                *s = s.replace(needle, replacement);
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute(item, needle, replacement);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute(item, needle, replacement);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::models::{Node, NodeKind};

    fn graph_with_payloads(entries: &[(&str, Value)]) -> Graph {
        let mut nodes = BTreeMap::new();
        let mut root = Node::new(NodeKind::Unknown, None);
        root.edges = entries.iter().map(|(id, _)| NodeId::from(*id)).collect();
        nodes.insert(NodeId::root(), root);
        for (id, payload) in entries {
            let mut node = Node::new(NodeKind::Question, None);
            node.data = Some(
                payload
                    .as_object()
                    .expect("test payload must be an object")
                    .clone(),
            );
            nodes.insert(NodeId::from(*id), node);
        }
        Graph::from_nodes(nodes).expect("test graph should satisfy invariants")
    }

    #[test]
    fn find_is_case_sensitive_and_recursive() {
        let graph = graph_with_payloads(&[
            ("q1", json!({"title": "Is the garage attached?"})),
            ("q2", json!({"options": [{"text": "No garage"}, {"text": "Garage"}]})),
        ]);

        let matches = find_in_flow(&graph, "garage");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].node_id, NodeId::from("q1"));
        assert_eq!(matches[0].field, "title");
        assert_eq!(matches[1].field, "options.0.text");
        assert_eq!(matches[1].value, "No garage");
    }

    #[test]
    fn dry_run_is_pure_and_stable() {
        let graph = graph_with_payloads(&[("q1", json!({"title": "old name"}))]);

        let first = find_and_replace(&graph, "old", None).expect("dry run succeeds");
        let second = find_and_replace(&graph, "old", None).expect("dry run succeeds");
        assert!(first.outcome.is_none());
        assert_eq!(first.matches, second.matches);
        assert_eq!(
            graph,
            graph_with_payloads(&[("q1", json!({"title": "old name"}))])
        );
    }

    #[test]
    fn replace_substitutes_every_occurrence_and_reports_old_values() {
        let graph = graph_with_payloads(&[
            ("q1", json!({"title": "old old thing"})),
            ("q2", json!({"description": "nothing here"})),
        ]);

        let result = find_and_replace(&graph, "old", Some("new")).expect("replace succeeds");
        let outcome = result.outcome.expect("a graph was produced");

        assert_eq!(
            outcome
                .graph
                .get(&NodeId::from("q1"))
                .and_then(|node| node.data_field("title")),
            Some(&json!("new new thing"))
        );
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].value, "old old thing");
        // One touched node, replaced as a delete/insert pair.
        assert_eq!(outcome.ops.len(), 2);

        // A follow-up find for the same term comes back empty.
        assert!(find_in_flow(&outcome.graph, "old").is_empty());
    }

    #[test]
    fn replace_with_no_matches_produces_no_graph() {
        let graph = graph_with_payloads(&[("q1", json!({"title": "hello"}))]);
        let result = find_and_replace(&graph, "absent", Some("x")).expect("succeeds");
        assert!(result.outcome.is_none());
        assert!(result.matches.is_empty());
    }
}
