//! Edge records.
//!
//! Edges refer to nodes by index only; the registry owns both sides.

use crate::core::error::{EdgeId, NodeId};
use crate::core::port::Port;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A directed connection from one output channel to one input channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Unique identifier for this edge.
    pub id: EdgeId,
    /// Source port (direction `Out`).
    pub from: Port,
    /// Destination port (direction `In`).
    pub to: Port,
}

impl Edge {
    /// Source node.
    pub fn source(&self) -> NodeId {
        self.from.node
    }

    /// Destination node.
    pub fn target(&self) -> NodeId {
        self.to.node
    }

    /// Whether this edge touches `node` on either side.
    pub fn touches(&self, node: NodeId) -> bool {
        self.from.node == node || self.to.node == node
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{}",
            self.id, self.from.node, self.from.channel, self.to.node, self.to.channel
        )
    }
}
