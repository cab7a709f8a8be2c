//! Elementwise math: binop

use crate::core::context::EvalContext;
use crate::core::device::BinaryOp;
use crate::core::error::{EvalErrorKind, EvalResult};
use crate::core::node::{tagged_config, Category, NodeKind, NodeMetadata, Pinout};
use crate::core::port::ChannelDef;
use crate::nodes::registry::NodeRegistry;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Register math kinds.
pub fn register(registry: &mut NodeRegistry) {
    registry.register_node::<BinOpNode>();
}

/// `c = a op b`, elementwise over tensors of equal dims.
///
/// Inputs may be arbitrary strided views; the result is canonical.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BinOpNode {
    #[serde(default)]
    pub op: BinaryOp,
}

impl BinOpNode {
    pub const KIND: &'static str = "binop";

    pub fn new(op: BinaryOp) -> Self {
        Self { op }
    }
}

impl NodeKind for BinOpNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder(Self::KIND, "Binary Op")
            .description("Elementwise +, -, * or / of two tensors with equal dims")
            .category(Category::Math)
            .input(ChannelDef::new("a").with_description("Left operand"))
            .input(ChannelDef::new("b").with_description("Right operand"))
            .output(ChannelDef::new("c"))
            .build()
    }

    fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>> {
        let op = self.op;
        async move {
            let (a, b) = futures::try_join!(io.input("a"), io.input("b"))?;
            if a.dims() != b.dims() {
                return Err(io.fail(EvalErrorKind::DimensionMismatch {
                    left: a.dims().to_vec(),
                    right: b.dims().to_vec(),
                }));
            }
            let c = io.device().binary(op, a, b).await.map_err(|e| io.fail(e))?;
            Ok(Pinout::new().with("c", c))
        }
        .boxed()
    }

    fn config(&self) -> serde_json::Value {
        tagged_config(Self::KIND, self)
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
    use crate::nodes::builtin::{ConstNode, PermuteNode};

    #[test]
    fn test_subtract_and_divide() {
        let ctx = Context::new();
        let a = ctx.add_node(Box::new(ConstNode::with_data(vec![2], vec![6.0, 8.0])));
        let b = ctx.add_node(Box::new(ConstNode::new(2.0, vec![2])));
        let sub = ctx.add_node(Box::new(BinOpNode::new(BinaryOp::Sub)));
        let div = ctx.add_node(Box::new(BinOpNode::new(BinaryOp::Div)));
        for node in [sub, div] {
            ctx.link(a, "o", node, "a").unwrap();
            ctx.link(b, "o", node, "b").unwrap();
        }

        assert_eq!(pollster::block_on(ctx.get(sub, "c")).unwrap().to_vec(), vec![4.0, 6.0]);
        assert_eq!(pollster::block_on(ctx.get(div, "c")).unwrap().to_vec(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let ctx = Context::new();
        let a = ctx.add_node(Box::new(ConstNode::new(1.0, vec![2, 3])));
        let b = ctx.add_node(Box::new(ConstNode::new(1.0, vec![3, 2])));
        let add = ctx.add_node(Box::new(BinOpNode::default()));
        ctx.link(a, "o", add, "a").unwrap();
        ctx.link(b, "o", add, "b").unwrap();

        let err = pollster::block_on(ctx.get(add, "c")).unwrap_err();
        assert_eq!(err.origin(), add);
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[test]
    fn test_strided_operand() {
        let ctx = Context::new();
        let a = ctx.add_node(Box::new(ConstNode::with_data(
            vec![2, 3],
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
        )));
        let t = ctx.add_node(Box::new(PermuteNode::new(vec![1, 0])));
        let zero = ctx.add_node(Box::new(ConstNode::new(0.0, vec![3, 2])));
        let add = ctx.add_node(Box::new(BinOpNode::default()));
        ctx.link(a, "o", t, "o").unwrap();
        ctx.link(t, "o", add, "a").unwrap();
        ctx.link(zero, "o", add, "b").unwrap();

        let out = pollster::block_on(ctx.get(add, "c")).unwrap();
        assert_eq!(out.dims(), &[3, 2]);
        assert_eq!(out.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }
}
