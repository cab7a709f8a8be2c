//! The Context: registry plus phase gate.
//!
//! A [`Context`] is a cheap, cloneable handle to one running graph. All
//! structural edits pass through the structural-edit phase and all node
//! evaluation through the evaluate phase; the two never overlap.
//!
//! Synchronous edit methods ([`Context::connect`] and friends) take the edit
//! phase without waiting and panic if evaluation is in progress. Code that may
//! race with evaluation should first hold [`Context::edit_section`], which
//! waits for evaluation to drain, and make its edits inside it.

use crate::core::device::{ComputeDevice, HostDevice};
use crate::core::error::{
    EdgeId, EvalError, EvalErrorKind, EvalResult, GraphError, GraphResult, NodeId, ValidationReport,
};
use crate::core::node::{NodeKind, NodeMetadata};
use crate::core::phase::{Phase, PhaseGate, PhaseGuard};
use crate::core::port::{Arity, ChannelDef, Port};
use crate::core::tensor::Tensor;
use crate::execution::engine::{self, EngineOptions, PropagationReport};
use crate::execution::memo::{self, EvalOutcome, MemoStats, MemoStatus};
use crate::graph::connection::Edge;
use crate::graph::serialization::{self, LoadReport, SerializedGraph};
use crate::graph::structure::{NodeGraph, Position};
use crate::nodes::registry::NodeRegistry;
use crate::validation::ValidationPipeline;
use indexmap::IndexSet;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

struct ContextInner {
    graph: Mutex<NodeGraph>,
    gate: PhaseGate,
    device: Arc<dyn ComputeDevice>,
    scheduled: Mutex<IndexSet<NodeId>>,
    options: ContextOptions,
}

/// Behavior switches for a [`Context`].
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Options used by [`Context::propagate`] and [`Context::run_scheduled`].
    pub engine: EngineOptions,
    /// Whether edits add the affected nodes to the scheduled set.
    pub schedule_edits: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            engine: EngineOptions::default(),
            schedule_edits: true,
        }
    }
}

/// Handle to a registry of nodes and edges with its phase gate.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

/// Non-owning [`Context`] handle.
///
/// Evaluation futures parked in a memo slot hold one of these, so an
/// abandoned in-flight evaluation does not keep its own registry alive.
#[derive(Clone)]
pub(crate) struct WeakContext {
    inner: Weak<ContextInner>,
}

impl WeakContext {
    pub(crate) fn upgrade(&self) -> Option<Context> {
        self.inner.upgrade().map(|inner| Context { inner })
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let graph = self.inner.graph.lock();
        f.debug_struct("Context")
            .field("nodes", &graph.node_count())
            .field("edges", &graph.edge_count())
            .field("phase", &self.inner.gate.active())
            .field("device", &self.inner.device.name())
            .finish()
    }
}

/// Builder for [`Context`].
pub struct ContextBuilder {
    device: Option<Arc<dyn ComputeDevice>>,
    options: ContextOptions,
}

impl ContextBuilder {
    /// Start from defaults: a [`HostDevice`] and default engine options.
    pub fn new() -> Self {
        Self {
            device: None,
            options: ContextOptions::default(),
        }
    }

    /// Use `device` for every node evaluation.
    pub fn with_device(mut self, device: impl ComputeDevice + 'static) -> Self {
        self.device = Some(Arc::new(device));
        self
    }

    /// Share an existing device.
    pub fn with_shared_device(mut self, device: Arc<dyn ComputeDevice>) -> Self {
        self.device = Some(device);
        self
    }

    /// Replace all options.
    pub fn with_options(mut self, options: ContextOptions) -> Self {
        self.options = options;
        self
    }

    /// Options used by [`Context::propagate`] and [`Context::run_scheduled`].
    pub fn with_engine_options(mut self, engine: EngineOptions) -> Self {
        self.options.engine = engine;
        self
    }

    /// Build the context.
    pub fn build(self) -> Context {
        let device = self
            .device
            .unwrap_or_else(|| Arc::new(HostDevice::default()));
        Context {
            inner: Arc::new(ContextInner {
                graph: Mutex::new(NodeGraph::new()),
                gate: PhaseGate::new(),
                device,
                scheduled: Mutex::new(IndexSet::new()),
                options: self.options,
            }),
        }
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create a context with a host device and default options.
    pub fn new() -> Self {
        ContextBuilder::new().build()
    }

    /// Create a context builder.
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        WeakContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn gate(&self) -> &PhaseGate {
        &self.inner.gate
    }

    pub(crate) fn graph(&self) -> &Mutex<NodeGraph> {
        &self.inner.graph
    }

    /// The compute device shared by all nodes.
    pub fn device(&self) -> Arc<dyn ComputeDevice> {
        Arc::clone(&self.inner.device)
    }

    /// The phase currently held, if any.
    pub fn phase(&self) -> Option<Phase> {
        self.inner.gate.active()
    }

    /// The options this context was built with.
    pub fn options(&self) -> &ContextOptions {
        &self.inner.options
    }

    /// Read-only access to the registry.
    pub fn inspect<R>(&self, f: impl FnOnce(&NodeGraph) -> R) -> R {
        f(&self.inner.graph.lock())
    }

    // ========================================================================
    // Phases
    // ========================================================================

    /// Wait for evaluation to drain, then hold the structural-edit phase.
    pub async fn edit_section(&self) -> PhaseGuard {
        self.inner.gate.enter(Phase::Edit, "edit_section").await
    }

    /// Wait for structural edits to drain, then hold the evaluate phase.
    pub async fn eval_section(&self) -> PhaseGuard {
        self.inner.gate.enter(Phase::Eval, "eval_section").await
    }

    // ========================================================================
    // Structural Edits
    // ========================================================================

    /// Add a node at the origin.
    pub fn add_node(&self, kind: Box<dyn NodeKind>) -> NodeId {
        self.add_node_at(kind, Position::default())
    }

    /// Add a node at `position`. The new node is scheduled for evaluation.
    pub fn add_node_at(&self, kind: Box<dyn NodeKind>, position: Position) -> NodeId {
        let _edit = self.inner.gate.enter_now(Phase::Edit, "add_node");
        let id = self.inner.graph.lock().add_node(kind, position);
        self.schedule_edit(id);
        log::debug!("added node {id}");
        id
    }

    /// Connect an output port to an input port.
    ///
    /// On success the destination's forward closure is invalidated and the
    /// destination is scheduled; nothing is evaluated. A structural rejection
    /// or a failed validation hook leaves the graph unchanged.
    pub fn connect(&self, from: Port, to: Port) -> GraphResult<EdgeId> {
        let _edit = self.inner.gate.enter_now(Phase::Edit, "connect");
        let mut graph = self.inner.graph.lock();

        let (source, target) = (from.node, to.node);
        let id = match graph.connect(from, to) {
            Ok(id) => id,
            Err(err) => {
                log::warn!("connect rejected: {err}");
                return Err(err);
            }
        };

        for node in [source, target] {
            if let Err(source_err) = graph.validate_node(node) {
                graph.disconnect(id)?;
                log::warn!("connect rolled back: node {node}: {source_err}");
                return Err(GraphError::ValidationRejected {
                    node,
                    source: source_err,
                });
            }
        }

        graph.invalidate_closure(&[target]);
        drop(graph);
        self.schedule_edit(target);
        Ok(id)
    }

    /// Shorthand for `connect(Port::output(..), Port::input(..))`.
    pub fn link(
        &self,
        from: NodeId,
        from_channel: &str,
        to: NodeId,
        to_channel: &str,
    ) -> GraphResult<EdgeId> {
        self.connect(Port::output(from, from_channel), Port::input(to, to_channel))
    }

    /// Remove an edge, invalidating and scheduling its former destination.
    ///
    /// A validation failure on either end is logged only; a now-missing
    /// input surfaces when the destination is evaluated.
    pub fn disconnect(&self, edge: EdgeId) -> GraphResult<Edge> {
        let _edit = self.inner.gate.enter_now(Phase::Edit, "disconnect");
        let mut graph = self.inner.graph.lock();

        let removed = match graph.disconnect(edge) {
            Ok(removed) => removed,
            Err(err) => {
                log::warn!("disconnect rejected: {err}");
                return Err(err);
            }
        };
        for node in [removed.from.node, removed.to.node] {
            if let Err(err) = graph.validate_node(node) {
                log::warn!("node {node} invalid after disconnect: {err}");
            }
        }

        graph.invalidate_closure(&[removed.to.node]);
        drop(graph);
        self.schedule_edit(removed.to.node);
        Ok(removed)
    }

    /// Destroy a node, severing its edges first.
    ///
    /// Former downstream nodes are invalidated and scheduled.
    pub fn destroy(&self, node: NodeId) -> GraphResult<()> {
        let _edit = self.inner.gate.enter_now(Phase::Edit, "destroy");
        let mut graph = self.inner.graph.lock();
        if !graph.has_node(node) {
            return Err(GraphError::NodeNotFound(node));
        }

        let downstream = graph.successors(node);
        graph.invalidate_closure(&[node]);
        let (_, severed) = graph.remove_node(node)?;
        for &next in &downstream {
            if let Err(err) = graph.validate_node(next) {
                log::warn!("node {next} invalid after destroying {node}: {err}");
            }
        }
        drop(graph);

        self.inner.scheduled.lock().shift_remove(&node);
        for next in downstream {
            self.schedule_edit(next);
        }
        log::debug!("destroyed node {node} ({} edge(s) severed)", severed.len());
        Ok(())
    }

    /// Reconfigure a node of concrete kind `T`.
    ///
    /// `f` runs on a copy which replaces the node once it returns. The node's
    /// forward closure is invalidated and the node scheduled. Channels are
    /// fixed at construction: a copy that declares different channels is
    /// rejected with [`GraphError::ChannelsChanged`] and the node is kept.
    pub fn configure<T, R>(&self, node: NodeId, f: impl FnOnce(&mut T) -> R) -> GraphResult<R>
    where
        T: NodeKind + 'static,
    {
        let _edit = self.inner.gate.enter_now(Phase::Edit, "configure");
        let mut graph = self.inner.graph.lock();
        let slot = graph.slot_mut(node).ok_or(GraphError::NodeNotFound(node))?;

        let mut kind = slot.kind.clone_box();
        let typed = kind
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(GraphError::KindMismatch {
                node,
                expected: std::any::type_name::<T>(),
            })?;
        let out = f(typed);
        if !same_channels(&slot.metadata, &kind.metadata()) {
            log::warn!("configure rejected: node {node} changed its channels");
            return Err(GraphError::ChannelsChanged { node });
        }
        slot.kind = kind;

        graph.invalidate_closure(&[node]);
        drop(graph);
        self.schedule_edit(node);
        Ok(out)
    }

    /// Mark a node's external state as changed.
    pub fn touch(&self, node: NodeId) -> GraphResult<()> {
        let _edit = self.inner.gate.enter_now(Phase::Edit, "touch");
        let mut graph = self.inner.graph.lock();
        if !graph.has_node(node) {
            return Err(GraphError::NodeNotFound(node));
        }
        graph.invalidate_closure(&[node]);
        drop(graph);
        self.schedule_edit(node);
        Ok(())
    }

    /// Move a node in the editor. Does not affect evaluation.
    pub fn set_position(&self, node: NodeId, position: Position) -> GraphResult<()> {
        let _edit = self.inner.gate.enter_now(Phase::Edit, "set_position");
        let mut graph = self.inner.graph.lock();
        let slot = graph.slot_mut(node).ok_or(GraphError::NodeNotFound(node))?;
        slot.position = position;
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Incoming edges of `node`, optionally on one channel.
    pub fn inputs(&self, node: NodeId, channel: Option<&str>) -> Vec<Edge> {
        self.inner.graph.lock().inputs(node, channel)
    }

    /// Outgoing edges of `node`, optionally on one channel.
    pub fn outputs(&self, node: NodeId, channel: Option<&str>) -> Vec<Edge> {
        self.inner.graph.lock().outputs(node, channel)
    }

    /// Metadata of a live node.
    pub fn metadata(&self, node: NodeId) -> Option<NodeMetadata> {
        self.inner
            .graph
            .lock()
            .slot(node)
            .map(|slot| slot.metadata().clone())
    }

    /// Memo status of a live node.
    pub fn memo_status(&self, node: NodeId) -> Option<MemoStatus> {
        self.inner
            .graph
            .lock()
            .slot(node)
            .map(|slot| slot.state().status())
    }

    /// Memo statistics since the context was created.
    pub fn memo_stats(&self) -> MemoStats {
        self.inner.graph.lock().stats
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.inner.graph.lock().node_count()
    }

    /// Number of live edges.
    pub fn edge_count(&self) -> usize {
        self.inner.graph.lock().edge_count()
    }

    /// Run `pipeline` over the current registry.
    pub fn validate(&self, pipeline: &ValidationPipeline) -> ValidationReport {
        pipeline.validate(&self.inner.graph.lock())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Snapshot the graph as a document.
    pub fn save(&self) -> SerializedGraph {
        SerializedGraph::from_graph(&self.inner.graph.lock())
    }

    /// Add the nodes and edges of `doc`, skipping what cannot be built.
    pub async fn load(&self, registry: &NodeRegistry, doc: &SerializedGraph) -> LoadReport {
        serialization::load(self, registry, doc).await
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Reset the memo of `roots` and everything downstream of them.
    pub async fn invalidate(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let _edit = self.inner.gate.enter(Phase::Edit, "invalidate").await;
        self.inner.graph.lock().invalidate_closure(roots)
    }

    /// Evaluate `node`, pulling its ancestors on demand.
    pub async fn eval(&self, node: NodeId) -> EvalOutcome {
        memo::do_eval(self, node).await
    }

    /// Evaluate `node` and return the tensor on one of its output channels.
    pub async fn get(&self, node: NodeId, channel: &str) -> EvalResult<Tensor> {
        let pinout = self.eval(node).await?;
        pinout.get(channel).cloned().ok_or_else(|| {
            EvalError::new(node, EvalErrorKind::MissingOutput(channel.to_string()))
        })
    }

    /// Queue `node` for the next [`run_scheduled`](Context::run_scheduled).
    pub fn schedule(&self, node: NodeId) {
        self.inner.scheduled.lock().insert(node);
    }

    fn schedule_edit(&self, node: NodeId) {
        if self.inner.options.schedule_edits {
            self.schedule(node);
        }
    }

    /// Nodes waiting for the next scheduled pass.
    pub fn scheduled(&self) -> Vec<NodeId> {
        self.inner.scheduled.lock().iter().copied().collect()
    }

    /// Run one propagation pass over everything scheduled since the last one.
    pub async fn run_scheduled(&self) -> PropagationReport {
        let roots: Vec<NodeId> = std::mem::take(&mut *self.inner.scheduled.lock())
            .into_iter()
            .collect();
        let roots: Vec<NodeId> = self.inspect(|graph| {
            roots.into_iter().filter(|&n| graph.has_node(n)).collect()
        });
        self.propagate(&roots).await
    }

    /// Invalidate the forward closure of `roots` and re-evaluate it.
    pub async fn propagate(&self, roots: &[NodeId]) -> PropagationReport {
        engine::propagate(self, roots, &self.inner.options.engine).await
    }

    /// [`propagate`](Context::propagate) with explicit options.
    pub async fn propagate_with(&self, roots: &[NodeId], options: &EngineOptions) -> PropagationReport {
        engine::propagate(self, roots, options).await
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

fn same_channels(old: &NodeMetadata, new: &NodeMetadata) -> bool {
    fn shape(defs: &[ChannelDef]) -> Vec<(&str, Arity)> {
        defs.iter().map(|c| (c.name.as_str(), c.arity)).collect()
    }
    shape(&old.inputs) == shape(&new.inputs) && shape(&old.outputs) == shape(&new.outputs)
}
