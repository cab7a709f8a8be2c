//! Error types for Tensorweave.
//!
//! Uses thiserror for structured errors with context. Errors are designed to:
//! - Name the node that caused them, so an editor can point at it
//! - Stay cheap to clone where they are cached (evaluation failures)
//! - Convert into the top-level [`TensorWeaveError`] with `?`

use crate::core::port::Arity;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable identifier for a node, assigned from a monotonic counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identifier for an edge, assigned from a monotonic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u64);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Top-level error type for Tensorweave.
///
/// This enum encompasses all error categories and enables automatic
/// conversion between specific error types.
#[derive(Error, Debug)]
pub enum TensorWeaveError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Structural rejections from graph editing.
///
/// A rejected edit leaves the graph exactly as it was.
#[derive(Error, Debug, Clone)]
pub enum GraphError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Edge {0} not found")]
    EdgeNotFound(EdgeId),

    #[error("Channel '{channel}' not declared as {direction} on node {node}")]
    ChannelNotFound {
        node: NodeId,
        channel: String,
        direction: &'static str,
    },

    #[error("Cannot connect node {0} to itself")]
    SelfLoop(NodeId),

    #[error("Connections must run from an output to an input")]
    DirectionMismatch,

    #[error("Connecting {from} -> {to} would create a cycle")]
    CycleDetected { from: NodeId, to: NodeId },

    #[error("Node {node} rejected the connection: {source}")]
    ValidationRejected {
        node: NodeId,
        #[source]
        source: ValidationError,
    },

    #[error("Node {node} is not a '{expected}' node")]
    KindMismatch { node: NodeId, expected: &'static str },

    #[error("Reconfiguring node {node} would change its channels")]
    ChannelsChanged { node: NodeId },
}

/// Errors from structural validation of a node or the whole graph.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Input '{channel}' on node {node} accepts {arity} connection(s), found {count}")]
    TooManyInputs {
        node: NodeId,
        channel: String,
        arity: Arity,
        count: usize,
    },

    #[error("Missing required input '{channel}' on node {node}")]
    MissingInput { node: NodeId, channel: String },

    #[error("Edge {edge} references a missing node or channel")]
    DanglingEdge { edge: EdgeId },

    #[error("Graph contains a cycle")]
    CycleDetected,

    #[error("Node {node}: {message}")]
    Custom { node: NodeId, message: String },
}

/// Errors raised by the strided tensor engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    #[error("Expected {expected} elements for dims {dims:?}, got {got}")]
    DataLength {
        dims: Vec<usize>,
        expected: usize,
        got: usize,
    },

    #[error("Dimension {dim} out of range for rank {rank}")]
    DimOutOfRange { dim: usize, rank: usize },

    #[error("Index {index} out of range for dimension {dim} of extent {extent}")]
    IndexOutOfRange {
        dim: usize,
        index: usize,
        extent: usize,
    },

    #[error("{order:?} is not a permutation of 0..{rank}")]
    InvalidPermutation { order: Vec<usize>, rank: usize },

    #[error("Selection does not cover every dimension exactly once")]
    InvalidSelection,

    #[error("Byte length {0} is not a multiple of the element size")]
    ByteLength(usize),

    #[error("Element count overflows for dims {0:?}")]
    Overflow(Vec<usize>),
}

/// Errors from the compute device.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch { left: Vec<usize>, right: Vec<usize> },

    #[error("Kernel '{kernel}' needs rank {expected}, got {got}")]
    Rank {
        kernel: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Kernel of {kernel:?} does not fit input of {input:?}")]
    KernelTooLarge { kernel: Vec<usize>, input: Vec<usize> },

    #[error("Device dropped the dispatch before completing it")]
    Dropped,

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// What went wrong while evaluating a node.
#[derive(Error, Debug, Clone)]
pub enum EvalErrorKind {
    #[error("missing input '{0}'")]
    MissingInput(String),

    #[error("input '{channel}' accepts {arity} connection(s), found {count}")]
    Arity {
        channel: String,
        arity: Arity,
        count: usize,
    },

    #[error("upstream produced no output on channel '{0}'")]
    MissingOutput(String),

    #[error("dimension mismatch: {left:?} vs {right:?}")]
    DimensionMismatch { left: Vec<usize>, right: Vec<usize> },

    #[error("expected a 2-D tensor, got rank {0}")]
    NotTwoDimensional(usize),

    #[error("remote compute at '{endpoint}' failed: {message}")]
    Remote {
        endpoint: String,
        message: String,
        /// Path of remote-side node indices leading to the fault.
        remote_path: Vec<u32>,
    },

    #[error("node was destroyed")]
    NodeDestroyed,

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("{0}")]
    Other(String),
}

/// A cached evaluation failure.
///
/// `origin` always names the node whose evaluation routine failed; nodes that
/// merely read the failed value are appended to `relayed_by`.
#[derive(Error, Debug, Clone)]
#[error("node {origin}: {kind}")]
pub struct EvalError {
    origin: NodeId,
    kind: EvalErrorKind,
    relayed_by: Vec<NodeId>,
}

impl EvalError {
    /// Create a failure attributed to `origin`.
    pub fn new(origin: NodeId, kind: impl Into<EvalErrorKind>) -> Self {
        Self {
            origin,
            kind: kind.into(),
            relayed_by: Vec::new(),
        }
    }

    /// The node whose evaluation routine failed.
    pub fn origin(&self) -> NodeId {
        self.origin
    }

    /// What went wrong.
    pub fn kind(&self) -> &EvalErrorKind {
        &self.kind
    }

    /// Nodes the failure passed through on its way to the reader, nearest
    /// to the origin first.
    pub fn relayed_by(&self) -> &[NodeId] {
        &self.relayed_by
    }

    /// Record that `node` received this failure from one of its inputs.
    pub fn relayed(mut self, node: NodeId) -> Self {
        if self.origin != node && self.relayed_by.last() != Some(&node) {
            self.relayed_by.push(node);
        }
        self
    }

    /// Whether this failure is a missing-input failure.
    pub fn is_missing_input(&self) -> bool {
        matches!(self.kind, EvalErrorKind::MissingInput(_))
    }
}

/// Errors while rebuilding a graph from its persisted form.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Unknown node kind '{0}'")]
    UnknownKind(String),

    #[error("Node config has no 'kind' tag")]
    MissingKind,

    #[error("Invalid config for '{kind}': {message}")]
    InvalidConfig { kind: String, message: String },

    #[error("Malformed graph document: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Result Aliases
// ============================================================================

/// Result type alias for Tensorweave operations.
pub type TensorWeaveResult<T> = Result<T, TensorWeaveError>;

/// Result type alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for node evaluation.
pub type EvalResult<T> = Result<T, EvalError>;

/// Result type alias for tensor view operations.
pub type TensorResult<T> = Result<T, TensorError>;

// ============================================================================
// Validation Report
// ============================================================================

/// Comprehensive validation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether validation passed without errors.
    pub success: bool,
    /// List of errors found.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<ValidationWarning>,
    /// Time taken for validation in milliseconds.
    pub duration_ms: u64,
}

/// Non-fatal validation warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationWarning {
    /// Warning message.
    pub message: String,
    /// Node that triggered the warning, if applicable.
    pub node: Option<NodeId>,
}

impl ValidationError {
    /// Check if this is a fatal error that should stop validation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ValidationError::CycleDetected)
    }

    /// The node this error points at, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            ValidationError::TooManyInputs { node, .. }
            | ValidationError::MissingInput { node, .. }
            | ValidationError::Custom { node, .. } => Some(*node),
            _ => None,
        }
    }
}

impl ValidationReport {
    /// Create a new empty report (success).
    pub fn new() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Add an error to the report.
    pub fn add_error(&mut self, error: ValidationError) {
        self.success = false;
        self.errors.push(error);
    }

    /// Add a warning to the report.
    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        if self.success {
            if self.warnings.is_empty() {
                "Graph is valid".to_string()
            } else {
                format!("Graph is valid with {} warning(s)", self.warnings.len())
            }
        } else {
            format!("Validation failed with {} error(s)", self.errors.len())
        }
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}
