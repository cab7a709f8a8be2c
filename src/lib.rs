//! # Tensorweave - Interactive Tensor Pipelines
//!
//! Tensorweave evaluates a graph of tensor operations while it is being
//! edited. Nodes declare named input and output channels; edges carry
//! strided tensor views from one node to the next.
//!
//! ## Features
//!
//! - **Memoized Evaluation**: every node computes at most once until something
//!   upstream changes, and concurrent requests share one computation
//! - **Forward Invalidation**: an edit resets exactly the nodes downstream of it
//! - **Phase Gate**: structural edits and evaluation never overlap
//! - **Zero-copy Views**: slicing and permuting only rewrite strides
//! - **Extensible**: add node kinds through the [`NodeKind`](core::node::NodeKind) trait
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tensorweave::prelude::*;
//!
//! let ctx = Context::new();
//!
//! let src = ctx.add_node(Box::new(ConstNode::new(1.0, vec![4, 4])));
//! let add = ctx.add_node(Box::new(BinOpNode::new(BinaryOp::Add)));
//! ctx.link(src, "o", add, "a")?;
//! ctx.link(src, "o", add, "b")?;
//!
//! // Pull one value on demand...
//! let sum = pollster::block_on(ctx.get(add, "c"))?;
//!
//! // ...or push everything touched since the last pass.
//! let report = pollster::block_on(ctx.run_scheduled());
//! println!("{}", report.summary());
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: tensors, ports, node trait, phase gate, device and errors
//! - [`graph`]: node registry, context, topology and serialization
//! - [`execution`]: per-node memo and the propagation engine
//! - [`validation`]: whole-graph validation pipeline
//! - [`nodes`]: node registry and built-in kinds

#![warn(clippy::all)]

pub mod core;
pub mod execution;
pub mod graph;
pub mod nodes;
pub mod validation;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use tensorweave::prelude::*;
/// ```
pub mod prelude {
    // Tensors and devices
    pub use crate::core::device::{BinaryOp, ComputeDevice, HostDevice};
    pub use crate::core::tensor::{Size2d, Tensor};

    // Node traits and types
    pub use crate::core::context::EvalContext;
    pub use crate::core::node::{tagged_config, Category, LinkCounts, NodeKind, NodeMetadata, Pinout};
    pub use crate::core::phase::{Phase, PhaseGuard};
    pub use crate::core::port::{Arity, ChannelDef, Direction, Port};

    // Errors
    pub use crate::core::error::{
        EdgeId, EvalError, EvalErrorKind, EvalResult, GraphError, LoadError, NodeId, TensorError,
        TensorWeaveError, TensorWeaveResult, ValidationError, ValidationReport, ValidationWarning,
    };

    // Graph
    pub use crate::graph::connection::Edge;
    pub use crate::graph::context::{Context, ContextBuilder, ContextOptions};
    pub use crate::graph::serialization::{LoadReport, SerializedGraph};
    pub use crate::graph::structure::Position;
    pub use crate::graph::topology::{TopologyAnalyzer, TopologySummary};

    // Validation
    pub use crate::validation::{ValidationPipeline, ValidationStage};

    // Execution
    pub use crate::execution::engine::{EngineOptions, PropagationReport};
    pub use crate::execution::memo::{MemoStats, MemoStatus};
    pub use crate::execution::progress::ProgressUpdate;

    // Nodes
    pub use crate::nodes::builtin::{
        BinOpNode, ConstNode, ContiguousNode, Conv2dNode, ImageSinkNode, ImageSourceNode,
        LoopbackTransport, NoiseNode, PermuteNode, ProbeNode, RemoteNode, RemoteTransport,
        SliceNode,
    };
    pub use crate::nodes::registry::NodeRegistry;
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
