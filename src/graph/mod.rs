//! Graph module for managing node graphs.
//!
//! A node graph is a directed acyclic graph (DAG) where nodes are tensor
//! operations and edges carry tensors from an output channel to an input
//! channel. [`Context`] is the shared handle editors and evaluators use.

pub mod connection;
pub mod context;
pub mod serialization;
pub mod structure;
pub mod topology;

// Re-export commonly used types
pub use connection::Edge;
pub use context::{Context, ContextBuilder, ContextOptions};
pub use serialization::{LoadReport, SerializedGraph};
pub use structure::{NodeGraph, NodeSlot, Position};
pub use topology::{TopologyAnalyzer, TopologySummary};
