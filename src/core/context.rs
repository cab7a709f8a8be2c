//! Evaluation context handed to nodes.
//!
//! An [`EvalContext`] is a node's view of its inputs while it evaluates: the
//! incoming edges per channel (snapshotted when the evaluation started), the
//! compute device, and edge reads that pull upstream results through their
//! memos.
//!
//! The context is held weakly: a node's future may outlive every requester
//! while it sits in the memo, and reads made after the registry is gone fail
//! with [`EvalErrorKind::NodeDestroyed`].

use crate::core::device::ComputeDevice;
use crate::core::error::{EvalError, EvalErrorKind, EvalResult, NodeId};
use crate::core::port::Arity;
use crate::core::tensor::Tensor;
use crate::execution::memo;
use crate::graph::connection::Edge;
use crate::graph::context::{Context, WeakContext};
use futures::future::try_join_all;
use indexmap::IndexMap;
use std::sync::Arc;

/// Context provided to a node's evaluation future.
#[derive(Clone)]
pub struct EvalContext {
    ctx: WeakContext,
    node: NodeId,
    inputs: IndexMap<String, Vec<Edge>>,
    device: Arc<dyn ComputeDevice>,
}

impl std::fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalContext")
            .field("node", &self.node)
            .field("inputs", &self.inputs)
            .field("device", &self.device.name())
            .finish()
    }
}

impl EvalContext {
    pub(crate) fn new(ctx: &Context, node: NodeId, inputs: IndexMap<String, Vec<Edge>>) -> Self {
        Self {
            ctx: ctx.downgrade(),
            node,
            inputs,
            device: ctx.device(),
        }
    }

    /// ID of the node being evaluated.
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// The compute device.
    pub fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.device
    }

    /// Incoming edges on `channel`.
    pub fn edges(&self, channel: &str) -> &[Edge] {
        self.inputs.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of incoming edges on `channel`.
    pub fn input_count(&self, channel: &str) -> usize {
        self.edges(channel).len()
    }

    /// Build a failure attributed to this node.
    pub fn fail(&self, kind: impl Into<EvalErrorKind>) -> EvalError {
        EvalError::new(self.node, kind)
    }

    /// The one edge on `channel`.
    pub fn single_edge(&self, channel: &str) -> EvalResult<&Edge> {
        match self.edges(channel) {
            [edge] => Ok(edge),
            [] => Err(self.fail(EvalErrorKind::MissingInput(channel.to_string()))),
            many => Err(self.fail(EvalErrorKind::Arity {
                channel: channel.to_string(),
                arity: Arity::One,
                count: many.len(),
            })),
        }
    }

    /// Read the tensor carried by `edge`, evaluating its source if needed.
    ///
    /// An upstream failure is returned with its origin intact.
    pub async fn read(&self, edge: &Edge) -> EvalResult<Tensor> {
        let upstream = match self.ctx.upgrade() {
            Some(ctx) => memo::pull(&ctx, edge.from.node),
            None => {
                return Err(
                    EvalError::new(edge.from.node, EvalErrorKind::NodeDestroyed).relayed(self.node),
                )
            }
        };
        let pinout = upstream
            .await
            .map_err(|err| err.relayed(self.node))?;

        pinout
            .get(&edge.from.channel)
            .cloned()
            .ok_or_else(|| {
                EvalError::new(
                    edge.from.node,
                    EvalErrorKind::MissingOutput(edge.from.channel.clone()),
                )
                .relayed(self.node)
            })
    }

    /// Read the single input on `channel`.
    pub async fn input(&self, channel: &str) -> EvalResult<Tensor> {
        let edge = self.single_edge(channel)?;
        self.read(edge).await
    }

    /// Read every input on `channel`, in connection order.
    ///
    /// Fails if the edge count does not satisfy `arity`.
    pub async fn inputs(&self, channel: &str, arity: Arity) -> EvalResult<Vec<Tensor>> {
        let edges = self.edges(channel);
        if !arity.satisfied_by(edges.len()) {
            return Err(if edges.is_empty() {
                self.fail(EvalErrorKind::MissingInput(channel.to_string()))
            } else {
                self.fail(EvalErrorKind::Arity {
                    channel: channel.to_string(),
                    arity,
                    count: edges.len(),
                })
            });
        }
        try_join_all(edges.iter().map(|edge| self.read(edge))).await
    }
}
