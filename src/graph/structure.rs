//! Node registry and adjacency.
//!
//! The NodeGraph is an arena of node slots plus index-based edge records.
//! Each slot keeps its node's incoming and outgoing edge ids per channel and
//! its memoized evaluation state. Nothing here is phase-aware: the
//! [`Context`](crate::graph::context::Context) wraps every call in the right
//! phase.

use crate::core::error::{EdgeId, GraphError, GraphResult, NodeId, ValidationError};
use crate::core::node::{LinkCounts, NodeKind, NodeMetadata};
use crate::core::port::{Direction, Port};
use crate::execution::memo::{EvalState, MemoStats};
use crate::graph::connection::Edge;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Position of a node in an editor (for serialization).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A live node: its implementation, adjacency and memo.
pub struct NodeSlot {
    pub(crate) kind: Box<dyn NodeKind>,
    pub(crate) metadata: NodeMetadata,
    pub(crate) ins: IndexMap<String, IndexSet<EdgeId>>,
    pub(crate) outs: IndexMap<String, IndexSet<EdgeId>>,
    pub(crate) state: EvalState,
    pub(crate) epoch: u64,
    pub(crate) position: Position,
}

impl std::fmt::Debug for NodeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSlot")
            .field("kind", &self.metadata.kind)
            .field("ins", &self.ins)
            .field("outs", &self.outs)
            .field("state", &self.state.status())
            .field("epoch", &self.epoch)
            .field("position", &self.position)
            .finish()
    }
}

impl NodeSlot {
    fn new(kind: Box<dyn NodeKind>, position: Position) -> Self {
        let metadata = kind.metadata();
        let ins = metadata
            .inputs
            .iter()
            .map(|c| (c.name.clone(), IndexSet::new()))
            .collect();
        let outs = metadata
            .outputs
            .iter()
            .map(|c| (c.name.clone(), IndexSet::new()))
            .collect();
        Self {
            kind,
            metadata,
            ins,
            outs,
            state: EvalState::Empty,
            epoch: 0,
            position,
        }
    }

    /// The node implementation.
    pub fn kind(&self) -> &dyn NodeKind {
        self.kind.as_ref()
    }

    /// Cached metadata.
    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    /// Editor position.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Memo state.
    pub fn state(&self) -> &EvalState {
        &self.state
    }
}

/// The node/edge registry.
///
/// Uses IndexMap to maintain insertion order for consistent iteration.
#[derive(Debug, Default)]
pub struct NodeGraph {
    nodes: IndexMap<NodeId, NodeSlot>,
    edges: IndexMap<EdgeId, Edge>,
    next_node: u64,
    next_edge: u64,
    pub(crate) stats: MemoStats,
}

impl NodeGraph {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Node Management
    // ========================================================================

    /// Register a node and assign it the next identity.
    pub fn add_node(&mut self, kind: Box<dyn NodeKind>, position: Position) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(id, NodeSlot::new(kind, position));
        id
    }

    /// Remove a node after severing all of its edges.
    ///
    /// Returns the implementation and the severed edges.
    pub fn remove_node(&mut self, id: NodeId) -> GraphResult<(Box<dyn NodeKind>, Vec<Edge>)> {
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::NodeNotFound(id));
        }

        let touching: Vec<EdgeId> = self
            .edges
            .values()
            .filter(|e| e.touches(id))
            .map(|e| e.id)
            .collect();
        let mut severed = Vec::with_capacity(touching.len());
        for edge in touching {
            severed.push(self.disconnect(edge)?);
        }

        let slot = self
            .nodes
            .shift_remove(&id)
            .ok_or(GraphError::NodeNotFound(id))?;
        Ok((slot.kind, severed))
    }

    /// Get a node slot.
    pub fn slot(&self, id: NodeId) -> Option<&NodeSlot> {
        self.nodes.get(&id)
    }

    pub(crate) fn slot_mut(&mut self, id: NodeId) -> Option<&mut NodeSlot> {
        self.nodes.get_mut(&id)
    }

    /// Check if a node exists.
    pub fn has_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Iterate over live nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &NodeSlot)> {
        self.nodes.iter().map(|(&id, slot)| (id, slot))
    }

    /// Get all node IDs.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ========================================================================
    // Edge Management
    // ========================================================================

    /// Register an edge from an output port to an input port.
    ///
    /// Fails without side effects on self-loops, wrong directions, unknown
    /// nodes or channels, and edges that would close a cycle.
    pub fn connect(&mut self, from: Port, to: Port) -> GraphResult<EdgeId> {
        if from.node == to.node {
            return Err(GraphError::SelfLoop(from.node));
        }
        if from.direction != Direction::Out || to.direction != Direction::In {
            return Err(GraphError::DirectionMismatch);
        }
        self.check_channel(&from)?;
        self.check_channel(&to)?;

        if self.reaches(to.node, from.node) {
            return Err(GraphError::CycleDetected {
                from: from.node,
                to: to.node,
            });
        }

        let id = EdgeId(self.next_edge);
        self.next_edge += 1;

        if let Some(slot) = self.nodes.get_mut(&from.node) {
            slot.outs.entry(from.channel.clone()).or_default().insert(id);
        }
        if let Some(slot) = self.nodes.get_mut(&to.node) {
            slot.ins.entry(to.channel.clone()).or_default().insert(id);
        }
        self.edges.insert(id, Edge { id, from, to });
        Ok(id)
    }

    /// Remove an edge from both adjacency maps.
    pub fn disconnect(&mut self, id: EdgeId) -> GraphResult<Edge> {
        let edge = self
            .edges
            .shift_remove(&id)
            .ok_or(GraphError::EdgeNotFound(id))?;

        if let Some(set) = self
            .nodes
            .get_mut(&edge.from.node)
            .and_then(|slot| slot.outs.get_mut(&edge.from.channel))
        {
            set.shift_remove(&id);
        }
        if let Some(set) = self
            .nodes
            .get_mut(&edge.to.node)
            .and_then(|slot| slot.ins.get_mut(&edge.to.channel))
        {
            set.shift_remove(&id);
        }
        Ok(edge)
    }

    /// Get an edge by ID.
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    /// Iterate over all edges in creation order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Get the number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Incoming edges of `node`, optionally restricted to one channel.
    pub fn inputs(&self, node: NodeId, channel: Option<&str>) -> Vec<Edge> {
        self.adjacent(node, channel, |slot| &slot.ins)
    }

    /// Outgoing edges of `node`, optionally restricted to one channel.
    pub fn outputs(&self, node: NodeId, channel: Option<&str>) -> Vec<Edge> {
        self.adjacent(node, channel, |slot| &slot.outs)
    }

    /// Incoming edges of `node` grouped by declared input channel.
    pub fn input_snapshot(&self, node: NodeId) -> IndexMap<String, Vec<Edge>> {
        let Some(slot) = self.nodes.get(&node) else {
            return IndexMap::new();
        };
        slot.ins
            .iter()
            .map(|(channel, ids)| {
                let edges = ids.iter().filter_map(|id| self.edges.get(id)).cloned().collect();
                (channel.clone(), edges)
            })
            .collect()
    }

    /// Distinct nodes directly downstream of `node`.
    pub fn successors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = IndexSet::new();
        if let Some(slot) = self.nodes.get(&node) {
            for id in slot.outs.values().flatten() {
                if let Some(edge) = self.edges.get(id) {
                    out.insert(edge.to.node);
                }
            }
        }
        out.into_iter().collect()
    }

    /// Distinct nodes directly upstream of `node`.
    pub fn predecessors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = IndexSet::new();
        if let Some(slot) = self.nodes.get(&node) {
            for id in slot.ins.values().flatten() {
                if let Some(edge) = self.edges.get(id) {
                    out.insert(edge.from.node);
                }
            }
        }
        out.into_iter().collect()
    }

    // ========================================================================
    // Reachability
    // ========================================================================

    /// Every node reachable from `roots` along outgoing edges, roots included.
    ///
    /// Iterative depth-first walk; the result is in visit order.
    pub fn forward_closure(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut visited = IndexSet::new();
        let mut stack: Vec<NodeId> = roots.iter().rev().copied().collect();

        while let Some(current) = stack.pop() {
            if !self.nodes.contains_key(&current) || !visited.insert(current) {
                continue;
            }
            let mut next = self.successors(current);
            next.reverse();
            stack.extend(next.into_iter().filter(|n| !visited.contains(n)));
        }

        visited.into_iter().collect()
    }

    /// Whether `target` is reachable from `start` along outgoing edges.
    pub fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let mut visited = IndexSet::new();
        let mut stack = vec![start];

        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if visited.insert(current) {
                stack.extend(self.successors(current));
            }
        }
        false
    }

    /// Reset the memo of every node in the forward closure of `roots`.
    ///
    /// Each visited node's epoch is bumped so that an evaluation already in
    /// flight cannot store its now-stale result. Returns the visited nodes.
    pub fn invalidate_closure(&mut self, roots: &[NodeId]) -> Vec<NodeId> {
        let closure = self.forward_closure(roots);
        for id in &closure {
            if let Some(slot) = self.nodes.get_mut(id) {
                slot.epoch += 1;
                slot.state = EvalState::Empty;
            }
        }
        self.stats.invalidations += closure.len() as u64;
        closure
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Edge counts per channel of `node`.
    pub fn link_counts(&self, node: NodeId) -> Option<LinkCounts> {
        let slot = self.nodes.get(&node)?;
        Some(LinkCounts {
            node,
            inputs: slot.ins.iter().map(|(c, ids)| (c.clone(), ids.len())).collect(),
            outputs: slot.outs.iter().map(|(c, ids)| (c.clone(), ids.len())).collect(),
        })
    }

    /// Run the node's own validation hook against its current edges.
    pub fn validate_node(&self, node: NodeId) -> Result<(), ValidationError> {
        match (self.nodes.get(&node), self.link_counts(node)) {
            (Some(slot), Some(links)) => slot.kind.validate(&links),
            _ => Ok(()),
        }
    }

    fn check_channel(&self, port: &Port) -> GraphResult<()> {
        let slot = self
            .nodes
            .get(&port.node)
            .ok_or(GraphError::NodeNotFound(port.node))?;
        let declared = match port.direction {
            Direction::In => slot.ins.contains_key(&port.channel),
            Direction::Out => slot.outs.contains_key(&port.channel),
        };
        if !declared {
            return Err(GraphError::ChannelNotFound {
                node: port.node,
                channel: port.channel.clone(),
                direction: port.direction.as_str(),
            });
        }
        Ok(())
    }

    fn adjacent<F>(&self, node: NodeId, channel: Option<&str>, side: F) -> Vec<Edge>
    where
        F: Fn(&NodeSlot) -> &IndexMap<String, IndexSet<EdgeId>>,
    {
        let Some(slot) = self.nodes.get(&node) else {
            return Vec::new();
        };
        side(slot)
            .iter()
            .filter(|(name, _)| channel.map_or(true, |c| c == name.as_str()))
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| self.edges.get(id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::builtin::{BinOpNode, ConstNode, ProbeNode};

    fn constant() -> Box<dyn NodeKind> {
        Box::new(ConstNode::new(1.0, vec![2]))
    }

    fn binop() -> Box<dyn NodeKind> {
        Box::new(BinOpNode::default())
    }

    fn chain(graph: &mut NodeGraph) -> (NodeId, NodeId, NodeId) {
        let a = graph.add_node(constant(), Position::default());
        let b = graph.add_node(binop(), Position::default());
        let c = graph.add_node(binop(), Position::default());
        graph.connect(Port::output(a, "o"), Port::input(b, "a")).unwrap();
        graph.connect(Port::output(b, "c"), Port::input(c, "a")).unwrap();
        (a, b, c)
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut graph = NodeGraph::new();
        let a = graph.add_node(constant(), Position::default());
        graph.remove_node(a).unwrap();
        let b = graph.add_node(constant(), Position::default());

        assert_eq!(a, NodeId(0));
        assert_eq!(b, NodeId(1));
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_connect_registers_both_sides() {
        let mut graph = NodeGraph::new();
        let (a, b, _) = chain(&mut graph);

        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.outputs(a, None).len(), 1);
        assert_eq!(graph.inputs(b, Some("a")).len(), 1);
        assert!(graph.inputs(b, Some("b")).is_empty());
        assert_eq!(graph.successors(a), vec![b]);
        assert_eq!(graph.predecessors(b), vec![a]);
    }

    #[test]
    fn test_connect_rejections_leave_graph_unchanged() {
        let mut graph = NodeGraph::new();
        let (a, b, c) = chain(&mut graph);

        assert!(matches!(
            graph.connect(Port::output(b, "c"), Port::input(b, "b")),
            Err(GraphError::SelfLoop(_))
        ));
        assert!(matches!(
            graph.connect(Port::input(a, "o"), Port::input(b, "b")),
            Err(GraphError::DirectionMismatch)
        ));
        assert!(matches!(
            graph.connect(Port::output(a, "nope"), Port::input(b, "b")),
            Err(GraphError::ChannelNotFound { .. })
        ));
        assert!(matches!(
            graph.connect(Port::output(c, "c"), Port::input(b, "b")),
            Err(GraphError::CycleDetected { .. })
        ));
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_disconnect_and_remove() {
        let mut graph = NodeGraph::new();
        let (a, b, c) = chain(&mut graph);

        let edge = graph.inputs(c, None)[0].id;
        let removed = graph.disconnect(edge).unwrap();
        assert_eq!(removed.from.node, b);
        assert!(graph.inputs(c, None).is_empty());
        assert!(matches!(graph.disconnect(edge), Err(GraphError::EdgeNotFound(_))));

        let (_, severed) = graph.remove_node(b).unwrap();
        assert_eq!(severed.len(), 1);
        assert!(graph.outputs(a, None).is_empty());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_forward_closure_skips_siblings() {
        let mut graph = NodeGraph::new();
        let (a, b, c) = chain(&mut graph);
        let d = graph.add_node(constant(), Position::default());

        let closure = graph.forward_closure(&[a]);
        assert_eq!(closure, vec![a, b, c]);
        assert!(!closure.contains(&d));
        assert!(graph.reaches(a, c));
        assert!(!graph.reaches(c, a));
    }

    #[test]
    fn test_validate_node_uses_hook() {
        let mut graph = NodeGraph::new();
        let a = graph.add_node(constant(), Position::default());
        let probe = graph.add_node(Box::new(ProbeNode::new()), Position::default());

        graph.connect(Port::output(a, "o"), Port::input(probe, "o")).unwrap();
        assert!(graph.validate_node(probe).is_ok());

        graph.connect(Port::output(a, "o"), Port::input(probe, "o")).unwrap();
        assert!(matches!(
            graph.validate_node(probe),
            Err(ValidationError::TooManyInputs { count: 2, .. })
        ));
    }
}
