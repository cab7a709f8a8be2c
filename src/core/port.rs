//! Ports and channel declarations.
//!
//! A node declares named input and output channels. A [`Port`] addresses one
//! of them on a live node; it is a handle, never stored as an entity of its own.

use crate::core::error::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a port (input or output).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Lowercase name, as used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many edges a channel accepts.
///
/// Serialized with the short notation used by remote I/O descriptions:
/// `"1"`, `"1+"` and `"*"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Arity {
    /// Exactly one edge.
    #[serde(rename = "1")]
    #[default]
    One,
    /// One or more edges.
    #[serde(rename = "1+")]
    AtLeastOne,
    /// Any number of edges, including none.
    #[serde(rename = "*")]
    Any,
}

impl Arity {
    /// Whether `count` edges may be attached while editing.
    ///
    /// Only the upper bound applies here; a missing edge is reported when the
    /// node is evaluated.
    pub fn admits_while_editing(&self, count: usize) -> bool {
        match self {
            Arity::One => count <= 1,
            Arity::AtLeastOne | Arity::Any => true,
        }
    }

    /// Whether `count` edges satisfy the channel at evaluation time.
    pub fn satisfied_by(&self, count: usize) -> bool {
        match self {
            Arity::One => count == 1,
            Arity::AtLeastOne => count >= 1,
            Arity::Any => true,
        }
    }

    /// Whether the channel needs at least one edge to evaluate.
    pub fn is_required(&self) -> bool {
        !matches!(self, Arity::Any)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::One => f.write_str("exactly 1"),
            Arity::AtLeastOne => f.write_str("1 or more"),
            Arity::Any => f.write_str("any number of"),
        }
    }
}

/// Declaration of one named channel on a node kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelDef {
    /// Channel name, unique per direction within the node.
    pub name: String,
    /// Accepted number of edges (meaningful for inputs).
    pub arity: Arity,
    /// Description for documentation.
    pub description: String,
}

impl ChannelDef {
    /// Create a channel that accepts exactly one edge.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arity: Arity::One,
            description: String::new(),
        }
    }

    /// Set the arity.
    pub fn with_arity(mut self, arity: Arity) -> Self {
        self.arity = arity;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Addressing handle for a channel on a live node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    /// The node.
    pub node: NodeId,
    /// Whether this is an input or an output.
    pub direction: Direction,
    /// Channel name on that node.
    pub channel: String,
}

impl Port {
    /// Address an output channel.
    pub fn output(node: NodeId, channel: impl Into<String>) -> Self {
        Self {
            node,
            direction: Direction::Out,
            channel: channel.into(),
        }
    }

    /// Address an input channel.
    pub fn input(node: NodeId, channel: impl Into<String>) -> Self {
        Self {
            node,
            direction: Direction::In,
            channel: channel.into(),
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.node, self.direction, self.channel)
    }
}
