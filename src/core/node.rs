//! NodeKind trait and node metadata.
//!
//! The NodeKind trait is the contract between a node implementation and the
//! engine. The engine only ever holds `Box<dyn NodeKind>` handles; it reads
//! channel declarations from [`NodeMetadata`], asks the node to validate its
//! connections after every structural edit touching it, and asks it for an
//! evaluation future when its memoized result is needed.

use crate::core::context::EvalContext;
use crate::core::error::{EvalResult, NodeId, ValidationError};
use crate::core::port::{Arity, ChannelDef};
use crate::core::tensor::Tensor;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Category for organizing node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Tensor sources (constants, noise, images)
    Input,
    /// Sinks (probes, image writers)
    Output,
    /// Zero-copy reshaping (slice, permute)
    View,
    /// Elementwise and reduction math
    Math,
    /// Convolutions and other filters
    Filter,
    /// Work offloaded to a remote service
    Remote,
    /// Custom/user-defined
    #[default]
    Custom,
}

impl Category {
    /// Get the display name for this category.
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Input => "Input",
            Category::Output => "Output",
            Category::View => "View",
            Category::Math => "Math",
            Category::Filter => "Filter",
            Category::Remote => "Remote",
            Category::Custom => "Custom",
        }
    }
}

/// Metadata describing a node kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Kind tag, also used as the serialization key (e.g., "binop")
    pub kind: String,
    /// Human-readable name (e.g., "Binary Op")
    pub name: String,
    /// Category for organization
    pub category: Category,
    /// Detailed description
    pub description: String,
    /// Input channels, in declaration order
    pub inputs: Vec<ChannelDef>,
    /// Output channels, in declaration order
    pub outputs: Vec<ChannelDef>,
}

impl NodeMetadata {
    /// Create a new metadata builder.
    pub fn builder(kind: impl Into<String>, name: impl Into<String>) -> NodeMetadataBuilder {
        NodeMetadataBuilder::new(kind, name)
    }

    /// Get all input channel names.
    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|c| c.name.as_str()).collect()
    }

    /// Get all output channel names.
    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|c| c.name.as_str()).collect()
    }

    /// Find an input channel by name.
    pub fn get_input(&self, name: &str) -> Option<&ChannelDef> {
        self.inputs.iter().find(|c| c.name == name)
    }

    /// Find an output channel by name.
    pub fn get_output(&self, name: &str) -> Option<&ChannelDef> {
        self.outputs.iter().find(|c| c.name == name)
    }
}

/// Builder for NodeMetadata.
pub struct NodeMetadataBuilder {
    kind: String,
    name: String,
    category: Category,
    description: String,
    inputs: Vec<ChannelDef>,
    outputs: Vec<ChannelDef>,
}

impl NodeMetadataBuilder {
    /// Create a new builder with required fields.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            category: Category::Custom,
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Set the category.
    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add an input channel.
    pub fn input(mut self, channel: ChannelDef) -> Self {
        self.inputs.push(channel);
        self
    }

    /// Add an output channel.
    pub fn output(mut self, channel: ChannelDef) -> Self {
        self.outputs.push(channel);
        self
    }

    /// Build the metadata.
    pub fn build(self) -> NodeMetadata {
        NodeMetadata {
            kind: self.kind,
            name: self.name,
            category: self.category,
            description: self.description,
            inputs: self.inputs,
            outputs: self.outputs,
        }
    }
}

/// Output bag of one successful evaluation: channel name to tensor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pinout(IndexMap<String, Tensor>);

impl Pinout {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, channel: impl Into<String>, tensor: Tensor) -> Self {
        self.0.insert(channel.into(), tensor);
        self
    }

    /// Set the tensor on `channel`.
    pub fn set(&mut self, channel: impl Into<String>, tensor: Tensor) {
        self.0.insert(channel.into(), tensor);
    }

    /// The tensor on `channel`, if produced.
    pub fn get(&self, channel: &str) -> Option<&Tensor> {
        self.0.get(channel)
    }

    /// Iterate over produced channels in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of produced channels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no channel was produced.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Edge counts per channel, handed to [`NodeKind::validate`].
#[derive(Debug, Clone, Default)]
pub struct LinkCounts {
    /// The node being validated.
    pub node: NodeId,
    /// Incoming edges per declared input channel.
    pub inputs: IndexMap<String, usize>,
    /// Outgoing edges per declared output channel.
    pub outputs: IndexMap<String, usize>,
}

impl LinkCounts {
    /// Incoming edge count on `channel` (zero if undeclared).
    pub fn input_count(&self, channel: &str) -> usize {
        self.inputs.get(channel).copied().unwrap_or(0)
    }

    /// Outgoing edge count on `channel` (zero if undeclared).
    pub fn output_count(&self, channel: &str) -> usize {
        self.outputs.get(channel).copied().unwrap_or(0)
    }
}

/// Check every declared input against the upper bound of its arity.
pub fn check_input_arity(metadata: &NodeMetadata, links: &LinkCounts) -> Result<(), ValidationError> {
    for channel in &metadata.inputs {
        let count = links.input_count(&channel.name);
        if !channel.arity.admits_while_editing(count) {
            return Err(ValidationError::TooManyInputs {
                node: links.node,
                channel: channel.name.clone(),
                arity: channel.arity,
                count,
            });
        }
    }
    Ok(())
}

/// Serialize a node's config, tagged with its kind.
pub fn tagged_config<T: Serialize>(kind: &str, config: &T) -> serde_json::Value {
    let mut value = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
    match value.as_object_mut() {
        Some(object) => {
            object.insert("kind".to_string(), serde_json::Value::from(kind));
            value
        }
        None => serde_json::json!({ "kind": kind }),
    }
}

/// The core trait for node implementations.
///
/// # Evaluation
///
/// [`eval`](NodeKind::eval) is called with the registry locked. It must only
/// capture what it needs and return a future; all edge reads and device work
/// happen inside that future, which the engine drives later. The future is
/// polled at most once to completion per memoized result.
///
/// # Thread Safety
///
/// `Send + Sync` bounds let evaluation futures run on any executor.
///
/// # Example Implementation
///
/// ```ignore
/// #[derive(Clone, Default, Serialize, Deserialize)]
/// struct Negate;
///
/// impl NodeKind for Negate {
///     fn metadata(&self) -> NodeMetadata {
///         NodeMetadata::builder("negate", "Negate")
///             .category(Category::Math)
///             .input(ChannelDef::new("o"))
///             .output(ChannelDef::new("o"))
///             .build()
///     }
///
///     fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>> {
///         async move {
///             let input = io.input("o").await?;
///             let zero = Tensor::filled(input.dims(), 0.0).map_err(|e| io.fail(e))?;
///             let out = io.device().binary(BinaryOp::Sub, zero, input).await
///                 .map_err(|e| io.fail(e))?;
///             Ok(Pinout::new().with("o", out))
///         }
///         .boxed()
///     }
///
///     fn config(&self) -> serde_json::Value {
///         tagged_config("negate", self)
///     }
///
///     fn clone_box(&self) -> Box<dyn NodeKind> {
///         Box::new(self.clone())
///     }
///
///     fn as_any(&self) -> &dyn Any { self }
///     fn as_any_mut(&mut self) -> &mut dyn Any { self }
/// }
/// ```
pub trait NodeKind: Send + Sync {
    /// Get the metadata for this node.
    ///
    /// Channel declarations must not change over the node's lifetime.
    fn metadata(&self) -> NodeMetadata;

    /// Build the evaluation future.
    fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>>;

    /// Check the node's connections after a structural edit.
    ///
    /// The default implementation enforces the declared arity upper bounds.
    fn validate(&self, links: &LinkCounts) -> Result<(), ValidationError> {
        check_input_arity(&self.metadata(), links)
    }

    /// Configuration, tagged with `"kind"`, for save/load.
    fn config(&self) -> serde_json::Value;

    /// Clone this node into a boxed trait object.
    ///
    /// Used for copy-on-write reconfiguration.
    fn clone_box(&self) -> Box<dyn NodeKind>;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// Allow cloning Box<dyn NodeKind>
impl Clone for Box<dyn NodeKind> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_builder() {
        let metadata = NodeMetadata::builder("test_node", "Test Node")
            .category(Category::Math)
            .description("A test node")
            .input(ChannelDef::new("a"))
            .input(ChannelDef::new("b").with_arity(Arity::Any))
            .output(ChannelDef::new("c"))
            .build();

        assert_eq!(metadata.kind, "test_node");
        assert_eq!(metadata.input_names(), vec!["a", "b"]);
        assert_eq!(metadata.output_names(), vec!["c"]);
        assert_eq!(metadata.get_input("b").unwrap().arity, Arity::Any);
        assert!(metadata.get_output("a").is_none());
    }

    #[test]
    fn test_input_arity_check() {
        let metadata = NodeMetadata::builder("t", "T")
            .input(ChannelDef::new("x"))
            .input(ChannelDef::new("many").with_arity(Arity::AtLeastOne))
            .build();

        let mut links = LinkCounts {
            node: NodeId(4),
            ..Default::default()
        };
        links.inputs.insert("x".into(), 1);
        links.inputs.insert("many".into(), 3);
        assert!(check_input_arity(&metadata, &links).is_ok());

        links.inputs.insert("x".into(), 2);
        let err = check_input_arity(&metadata, &links).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::TooManyInputs { node: NodeId(4), count: 2, .. }
        ));
    }

    #[test]
    fn test_tagged_config() {
        #[derive(Serialize)]
        struct Cfg {
            value: f32,
        }

        let json = tagged_config("const", &Cfg { value: 1.5 });
        assert_eq!(json["kind"], "const");
        assert_eq!(json["value"], 1.5);

        assert_eq!(tagged_config("unit", &()), serde_json::json!({ "kind": "unit" }));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(Category::View.display_name(), "View");
        assert_eq!(Category::default(), Category::Custom);
    }
}
