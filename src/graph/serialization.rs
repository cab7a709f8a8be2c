//! Graph serialization for saving and loading.
//!
//! A document lists node configs in order and refers to them from edges by
//! index. Loading is lenient: unknown kinds and bad edges are skipped and
//! reported, the rest of the document still loads.

use crate::core::error::{GraphError, LoadError, NodeId};
use crate::core::port::Port;
use crate::graph::context::Context;
use crate::graph::structure::{NodeGraph, Position};
use crate::nodes::registry::NodeRegistry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Serializable representation of a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerializedNode {
    /// Kind-tagged configuration (`{"kind": "...", ...}`).
    pub config: serde_json::Value,
    /// Position in the editor.
    #[serde(default)]
    pub position: Position,
}

/// One end of a serialized edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EdgeEnd {
    /// Index into [`SerializedGraph::nodes`].
    pub node: usize,
    /// Channel name.
    pub channel: String,
}

/// Serializable representation of an edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SerializedEdge {
    pub from: EdgeEnd,
    pub to: EdgeEnd,
}

/// Serializable representation of a complete graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerializedGraph {
    /// Graph format version
    pub version: String,
    /// All nodes
    pub nodes: Vec<SerializedNode>,
    /// All edges
    #[serde(default)]
    pub edges: Vec<SerializedEdge>,
}

impl SerializedGraph {
    /// Current format version.
    pub const VERSION: &'static str = "1";

    /// Create an empty document.
    pub fn new() -> Self {
        Self {
            version: Self::VERSION.to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Snapshot the registry. Node indices follow insertion order.
    pub fn from_graph(graph: &NodeGraph) -> Self {
        let index: IndexMap<NodeId, usize> = graph
            .node_ids()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();

        let nodes = graph
            .nodes()
            .map(|(_, slot)| SerializedNode {
                config: slot.kind().config(),
                position: slot.position(),
            })
            .collect();

        let edges = graph
            .edges()
            .filter_map(|edge| {
                Some(SerializedEdge {
                    from: EdgeEnd {
                        node: *index.get(&edge.from.node)?,
                        channel: edge.from.channel.clone(),
                    },
                    to: EdgeEnd {
                        node: *index.get(&edge.to.node)?,
                        channel: edge.to.channel.clone(),
                    },
                })
            })
            .collect();

        Self {
            version: Self::VERSION.to_string(),
            nodes,
            edges,
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for SerializedGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// What a load created and what it skipped.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Created node per document index (`None` when skipped).
    pub nodes: Vec<Option<NodeId>>,
    /// Document nodes that could not be built.
    pub skipped_nodes: Vec<(usize, LoadError)>,
    /// Edges whose endpoint node was skipped or out of range.
    pub skipped_edges: Vec<usize>,
    /// Edges the graph refused.
    pub rejected_edges: Vec<(usize, GraphError)>,
}

impl LoadReport {
    /// IDs of the nodes that were created.
    pub fn created(&self) -> Vec<NodeId> {
        self.nodes.iter().flatten().copied().collect()
    }

    /// Whether the whole document loaded.
    pub fn is_complete(&self) -> bool {
        self.skipped_nodes.is_empty() && self.skipped_edges.is_empty() && self.rejected_edges.is_empty()
    }
}

/// Add the document's nodes and edges to `ctx`.
///
/// Waits for evaluation to drain and holds the edit phase throughout.
pub async fn load(ctx: &Context, registry: &NodeRegistry, doc: &SerializedGraph) -> LoadReport {
    let _edit = ctx.edit_section().await;
    let mut report = LoadReport::default();

    if doc.version != SerializedGraph::VERSION {
        log::warn!(
            "loading graph version '{}', expected '{}'",
            doc.version,
            SerializedGraph::VERSION
        );
    }

    for (index, node) in doc.nodes.iter().enumerate() {
        match registry.deserialize(&node.config) {
            Ok(kind) => report.nodes.push(Some(ctx.add_node_at(kind, node.position))),
            Err(err) => {
                log::warn!("skipping node {index}: {err}");
                report.nodes.push(None);
                report.skipped_nodes.push((index, err));
            }
        }
    }

    for (index, edge) in doc.edges.iter().enumerate() {
        let ends = (
            report.nodes.get(edge.from.node).copied().flatten(),
            report.nodes.get(edge.to.node).copied().flatten(),
        );
        let (Some(from), Some(to)) = ends else {
            log::warn!("skipping edge {index}: endpoint was not loaded");
            report.skipped_edges.push(index);
            continue;
        };
        let result = ctx.connect(
            Port::output(from, &edge.from.channel),
            Port::input(to, &edge.to.channel),
        );
        if let Err(err) = result {
            report.rejected_edges.push((index, err));
        }
    }

    log::info!(
        "loaded {} node(s), skipped {} node(s) and {} edge(s)",
        report.created().len(),
        report.skipped_nodes.len(),
        report.skipped_edges.len() + report.rejected_edges.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::builtin::{BinOpNode, ConstNode};

    const DOC: &str = r#"{
        "version": "1",
        "nodes": [
            { "config": { "kind": "const", "value": 2.0, "dims": [3] }, "position": { "x": 0.0, "y": 0.0 } },
            { "config": { "kind": "frobnicate" } },
            { "config": { "kind": "binop", "op": "*" }, "position": { "x": 200.0, "y": 0.0 } }
        ],
        "edges": [
            { "from": { "node": 0, "channel": "o" }, "to": { "node": 2, "channel": "a" } },
            { "from": { "node": 0, "channel": "o" }, "to": { "node": 2, "channel": "b" } },
            { "from": { "node": 1, "channel": "o" }, "to": { "node": 2, "channel": "a" } },
            { "from": { "node": 0, "channel": "o" }, "to": { "node": 2, "channel": "nope" } }
        ]
    }"#;

    #[test]
    fn test_load_skips_unknown_kind() {
        let ctx = Context::new();
        let registry = NodeRegistry::with_builtins();
        let doc = SerializedGraph::from_json(DOC).unwrap();

        let report = pollster::block_on(load(&ctx, &registry, &doc));
        assert_eq!(report.created().len(), 2);
        assert_eq!(report.skipped_nodes.len(), 1);
        assert!(matches!(report.skipped_nodes[0], (1, LoadError::UnknownKind(_))));
        assert_eq!(report.skipped_edges, vec![2]);
        assert_eq!(report.rejected_edges.len(), 1);
        assert!(!report.is_complete());

        let product = report.nodes[2].unwrap();
        let out = pollster::block_on(ctx.get(product, "c")).unwrap();
        assert_eq!(out.to_vec(), vec![4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_save_then_load_rebuilds_graph() {
        let ctx = Context::new();
        let src = ctx.add_node_at(
            Box::new(ConstNode::new(1.5, vec![2, 2])),
            Position::new(10.0, 20.0),
        );
        let add = ctx.add_node(Box::new(BinOpNode::default()));
        ctx.link(src, "o", add, "a").unwrap();
        ctx.link(src, "o", add, "b").unwrap();

        let json = ctx.save().to_json().unwrap();
        let doc = SerializedGraph::from_json(&json).unwrap();
        assert_eq!(doc.nodes[0].position, Position::new(10.0, 20.0));

        let copy = Context::new();
        let report = pollster::block_on(copy.load(&NodeRegistry::with_builtins(), &doc));
        assert!(report.is_complete());
        assert_eq!(copy.edge_count(), 2);
        assert_eq!(copy.save(), doc);
    }
}
