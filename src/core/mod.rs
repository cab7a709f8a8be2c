//! Core types and traits for the tensorweave pipeline engine.
//!
//! This module contains the foundational types that graphs are built from:
//! - Strided tensors and their views
//! - Ports, channels and arity
//! - Node traits and metadata
//! - The phase gate separating edits from evaluation
//! - Compute devices
//! - Error types

pub mod context;
pub mod device;
pub mod error;
pub mod node;
pub mod phase;
pub mod port;
pub mod tensor;

// Re-export commonly used types
pub use context::EvalContext;
pub use device::{BinaryOp, ComputeDevice, HostDevice};
pub use error::{EdgeId, EvalError, EvalErrorKind, GraphError, NodeId, TensorWeaveError, ValidationError};
pub use node::{Category, NodeKind, NodeMetadata, Pinout};
pub use phase::{Phase, PhaseGate, PhaseGuard};
pub use port::{Arity, ChannelDef, Direction, Port};
pub use tensor::Tensor;
