//! Inspection sink: probe

use crate::core::context::EvalContext;
use crate::core::error::EvalResult;
use crate::core::node::{Category, NodeKind, NodeMetadata, Pinout};
use crate::core::port::ChannelDef;
use crate::core::tensor::Tensor;
use crate::nodes::registry::NodeRegistry;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

/// Register probe kinds.
pub fn register(registry: &mut NodeRegistry) {
    registry.register_with(
        ProbeNode::new().metadata(),
        || Box::new(ProbeNode::new()),
        |_| Ok(Box::new(ProbeNode::new())),
    );
}

/// Shared view of the last tensor a probe received.
#[derive(Debug, Clone, Default)]
pub struct ProbeHandle(Arc<Mutex<Option<Tensor>>>);

impl ProbeHandle {
    /// Last tensor captured, if the probe has evaluated.
    pub fn latest(&self) -> Option<Tensor> {
        self.0.lock().clone()
    }
}

/// Captures its input for inspection from outside the graph.
///
/// Copies made by reconfiguration share the same slot.
#[derive(Debug, Clone, Default)]
pub struct ProbeNode {
    slot: ProbeHandle,
}

impl ProbeNode {
    pub const KIND: &'static str = "probe";

    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the captured tensor.
    pub fn handle(&self) -> ProbeHandle {
        self.slot.clone()
    }
}

impl NodeKind for ProbeNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder(Self::KIND, "Probe")
            .description("Capture a tensor for inspection")
            .category(Category::Output)
            .input(ChannelDef::new("o"))
            .build()
    }

    fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>> {
        let slot = self.slot.clone();
        async move {
            let input = io.input("o").await?;
            *slot.0.lock() = Some(input);
            Ok(Pinout::new())
        }
        .boxed()
    }

    fn config(&self) -> serde_json::Value {
        serde_json::json!({ "kind": Self::KIND })
    }

    fn clone_box(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::context::Context;
    use crate::nodes::builtin::ConstNode;

    #[test]
    fn test_probe_captures_input() {
        let ctx = Context::new();
        let src = ctx.add_node(Box::new(ConstNode::new(3.0, vec![2])));
        let probe = ProbeNode::new();
        let handle = probe.handle();
        let id = ctx.add_node(Box::new(probe));
        ctx.link(src, "o", id, "o").unwrap();

        assert!(handle.latest().is_none());
        pollster::block_on(ctx.eval(id)).unwrap();
        assert_eq!(handle.latest().unwrap().to_vec(), vec![3.0, 3.0]);
    }

    #[test]
    fn test_unconnected_probe_fails() {
        let ctx = Context::new();
        let id = ctx.add_node(Box::new(ProbeNode::new()));
        let err = pollster::block_on(ctx.eval(id)).unwrap_err();
        assert!(err.is_missing_input());
    }
}
