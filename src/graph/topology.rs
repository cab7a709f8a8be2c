//! Topological analysis of the node registry.
//!
//! Provides algorithms for:
//! - Topological sorting (Kahn's algorithm)
//! - Source and sink discovery
//! - Dependency depth
//! - Disconnected subgraphs

use crate::core::error::{GraphError, GraphResult, NodeId, ValidationError};
use crate::graph::structure::NodeGraph;
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;

/// Shape of a registry: entry and exit nodes, depth and components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySummary {
    pub sources: Vec<NodeId>,
    pub sinks: Vec<NodeId>,
    /// Longest source-to-sink path; `None` when the graph has a cycle.
    pub depth: Option<usize>,
    pub subgraphs: usize,
}

impl std::fmt::Display for TopologySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} source(s), {} sink(s), ",
            self.sources.len(),
            self.sinks.len()
        )?;
        match self.depth {
            Some(depth) => write!(f, "depth {depth}, ")?,
            None => write!(f, "cyclic, ")?,
        }
        write!(f, "{} subgraph(s)", self.subgraphs)
    }
}

/// Analyzer for graph topology.
pub struct TopologyAnalyzer<'a> {
    graph: &'a NodeGraph,
}

impl<'a> TopologyAnalyzer<'a> {
    /// Create a new analyzer for the given graph.
    pub fn new(graph: &'a NodeGraph) -> Self {
        Self { graph }
    }

    /// Nodes ordered so that every edge points forward (Kahn's algorithm).
    pub fn topological_sort(&self) -> Result<Vec<NodeId>, ValidationError> {
        let mut in_degree: IndexMap<NodeId, usize> =
            self.graph.node_ids().map(|id| (id, 0)).collect();

        for edge in self.graph.edges() {
            if let Some(degree) = in_degree.get_mut(&edge.to.node) {
                *degree += 1;
            }
        }

        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut result = Vec::with_capacity(self.graph.node_count());
        while let Some(node) = queue.pop_front() {
            result.push(node);
            for edge in self.graph.outputs(node, None) {
                if let Some(degree) = in_degree.get_mut(&edge.to.node) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(edge.to.node);
                    }
                }
            }
        }

        if result.len() != self.graph.node_count() {
            return Err(ValidationError::CycleDetected);
        }
        Ok(result)
    }

    /// Check if the graph has any cycles.
    pub fn has_cycle(&self) -> bool {
        self.topological_sort().is_err()
    }

    /// Nodes with no incoming edges.
    pub fn sources(&self) -> Vec<NodeId> {
        self.graph
            .node_ids()
            .filter(|&id| self.graph.predecessors(id).is_empty())
            .collect()
    }

    /// Nodes with no outgoing edges.
    pub fn sinks(&self) -> Vec<NodeId> {
        self.graph
            .node_ids()
            .filter(|&id| self.graph.successors(id).is_empty())
            .collect()
    }

    /// Length of the longest path from any source to `node_id`.
    ///
    /// Depth 0 = source nodes.
    pub fn node_depth(&self, node_id: NodeId) -> GraphResult<usize> {
        if !self.graph.has_node(node_id) {
            return Err(GraphError::NodeNotFound(node_id));
        }
        let order = self
            .topological_sort()
            .map_err(|_| GraphError::NodeNotFound(node_id))?;

        let mut depth: IndexMap<NodeId, usize> = IndexMap::new();
        for id in order {
            let d = self
                .graph
                .predecessors(id)
                .iter()
                .filter_map(|p| depth.get(p))
                .max()
                .map_or(0, |d| d + 1);
            depth.insert(id, d);
            if id == node_id {
                return Ok(d);
            }
        }
        Ok(0)
    }

    /// Sources, sinks, depth and component count in one pass.
    pub fn summary(&self) -> TopologySummary {
        let sinks = self.sinks();
        let depth = if self.has_cycle() {
            None
        } else {
            Some(
                sinks
                    .iter()
                    .filter_map(|&node| self.node_depth(node).ok())
                    .max()
                    .unwrap_or(0),
            )
        };
        TopologySummary {
            sources: self.sources(),
            sinks,
            depth,
            subgraphs: self.find_subgraphs().len(),
        }
    }

    /// Find all disconnected subgraphs.
    pub fn find_subgraphs(&self) -> Vec<IndexSet<NodeId>> {
        let mut visited: IndexSet<NodeId> = IndexSet::new();
        let mut subgraphs = Vec::new();

        for node_id in self.graph.node_ids() {
            if !visited.contains(&node_id) {
                let subgraph = self.flood_fill(node_id);
                visited.extend(subgraph.iter().copied());
                subgraphs.push(subgraph);
            }
        }

        subgraphs
    }

    /// Flood fill ignoring edge direction.
    fn flood_fill(&self, start: NodeId) -> IndexSet<NodeId> {
        let mut visited = IndexSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            if visited.insert(current) {
                queue.extend(self.graph.successors(current));
                queue.extend(self.graph.predecessors(current));
            }
        }

        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::port::Port;
    use crate::graph::structure::Position;
    use crate::nodes::builtin::{BinOpNode, ConstNode};

    fn binop(graph: &mut NodeGraph) -> NodeId {
        graph.add_node(Box::new(BinOpNode::default()), Position::default())
    }

    fn link(graph: &mut NodeGraph, from: NodeId, to: NodeId, channel: &str) {
        graph
            .connect(Port::output(from, "c"), Port::input(to, channel))
            .unwrap();
    }

    #[test]
    fn test_topological_sort() {
        let mut graph = NodeGraph::new();
        let n1 = binop(&mut graph);
        let n2 = binop(&mut graph);
        let n3 = binop(&mut graph);
        link(&mut graph, n2, n3, "a");
        link(&mut graph, n1, n2, "a");

        let sorted = TopologyAnalyzer::new(&graph).topological_sort().unwrap();
        let pos = |n| sorted.iter().position(|&x| x == n).unwrap();
        assert!(pos(n1) < pos(n2));
        assert!(pos(n2) < pos(n3));
        assert!(!TopologyAnalyzer::new(&graph).has_cycle());
    }

    #[test]
    fn test_sources_sinks_and_depth() {
        let mut graph = NodeGraph::new();
        let src = graph.add_node(Box::new(ConstNode::new(1.0, vec![1])), Position::default());
        let a = binop(&mut graph);
        let b = binop(&mut graph);
        graph.connect(Port::output(src, "o"), Port::input(a, "a")).unwrap();
        graph.connect(Port::output(src, "o"), Port::input(b, "a")).unwrap();
        link(&mut graph, a, b, "b");

        let analyzer = TopologyAnalyzer::new(&graph);
        assert_eq!(analyzer.sources(), vec![src]);
        assert_eq!(analyzer.sinks(), vec![b]);
        assert_eq!(analyzer.node_depth(src).unwrap(), 0);
        assert_eq!(analyzer.node_depth(b).unwrap(), 2);
    }

    #[test]
    fn test_summary_of_two_chains() {
        let mut graph = NodeGraph::new();
        let src = graph.add_node(Box::new(ConstNode::new(1.0, vec![1])), Position::default());
        let a = binop(&mut graph);
        let b = binop(&mut graph);
        graph.connect(Port::output(src, "o"), Port::input(a, "a")).unwrap();
        link(&mut graph, a, b, "a");
        let lone = binop(&mut graph);

        let summary = TopologyAnalyzer::new(&graph).summary();
        assert_eq!(summary.sources, vec![src, lone]);
        assert_eq!(summary.sinks, vec![b, lone]);
        assert_eq!(summary.depth, Some(2));
        assert_eq!(summary.subgraphs, 2);
        assert_eq!(
            summary.to_string(),
            "2 source(s), 2 sink(s), depth 2, 2 subgraph(s)"
        );
    }

    #[test]
    fn test_summary_of_empty_graph() {
        let graph = NodeGraph::new();
        let summary = TopologyAnalyzer::new(&graph).summary();
        assert!(summary.sources.is_empty());
        assert_eq!(summary.depth, Some(0));
        assert_eq!(summary.subgraphs, 0);
    }

    #[test]
    fn test_find_subgraphs() {
        let mut graph = NodeGraph::new();
        let a1 = binop(&mut graph);
        let a2 = binop(&mut graph);
        let b1 = binop(&mut graph);
        let b2 = binop(&mut graph);
        link(&mut graph, a1, a2, "a");
        link(&mut graph, b1, b2, "a");

        let subgraphs = TopologyAnalyzer::new(&graph).find_subgraphs();
        assert_eq!(subgraphs.len(), 2);
        assert!(subgraphs[0].contains(&a2));
    }
}
