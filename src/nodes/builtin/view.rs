//! Zero-copy views and materialization: slice, permute, contiguous

use crate::core::context::EvalContext;
use crate::core::error::EvalResult;
use crate::core::node::{tagged_config, Category, NodeKind, NodeMetadata, Pinout};
use crate::core::port::ChannelDef;
use crate::nodes::registry::NodeRegistry;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Register view kinds.
pub fn register(registry: &mut NodeRegistry) {
    registry.register_node::<SliceNode>();
    registry.register_node::<PermuteNode>();
    registry.register_node::<ContiguousNode>();
}

macro_rules! node_boilerplate {
    () => {
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
    };
}

/// An input dimension pinned to one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedDim {
    pub dim: usize,
    pub val: usize,
}

/// An input dimension kept, placed at `out_dim` of the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeDim {
    pub in_dim: usize,
    pub out_dim: usize,
}

/// Pins some dimensions and reorders the rest, without copying.
///
/// With no dimensions listed at all the input passes through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SliceNode {
    #[serde(default)]
    pub fixed: Vec<FixedDim>,
    #[serde(default)]
    pub free: Vec<FreeDim>,
}

impl SliceNode {
    pub const KIND: &'static str = "slice";

    pub fn new(fixed: Vec<FixedDim>, free: Vec<FreeDim>) -> Self {
        Self { fixed, free }
    }

    /// Pin `dim` to `index`, keep every other dimension in order.
    pub fn fix(rank: usize, dim: usize, index: usize) -> Self {
        let free = (0..rank)
            .filter(|&d| d != dim)
            .enumerate()
            .map(|(out_dim, in_dim)| FreeDim { in_dim, out_dim })
            .collect();
        Self::new(vec![FixedDim { dim, val: index }], free)
    }
}

impl NodeKind for SliceNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder(Self::KIND, "Slice")
            .description("Select a sub-tensor by pinning dimensions")
            .category(Category::View)
            .input(ChannelDef::new("o"))
            .output(ChannelDef::new("o"))
            .build()
    }

    fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>> {
        let fixed: Vec<(usize, usize)> = self.fixed.iter().map(|f| (f.dim, f.val)).collect();
        let free: Vec<(usize, usize)> = self.free.iter().map(|f| (f.in_dim, f.out_dim)).collect();
        async move {
            let input = io.input("o").await?;
            if fixed.is_empty() && free.is_empty() {
                return Ok(Pinout::new().with("o", input));
            }
            let view = input.select(&fixed, &free).map_err(|e| io.fail(e))?;
            Ok(Pinout::new().with("o", view))
        }
        .boxed()
    }

    node_boilerplate!();
}

/// Reorders dimensions, without copying.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermuteNode {
    pub order: Vec<usize>,
}

impl PermuteNode {
    pub const KIND: &'static str = "permute";

    pub fn new(order: Vec<usize>) -> Self {
        Self { order }
    }
}

impl NodeKind for PermuteNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder(Self::KIND, "Permute")
            .description("Reorder tensor dimensions")
            .category(Category::View)
            .input(ChannelDef::new("o"))
            .output(ChannelDef::new("o"))
            .build()
    }

    fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>> {
        let order = self.order.clone();
        async move {
            let input = io.input("o").await?;
            let view = input.permute(&order).map_err(|e| io.fail(e))?;
            Ok(Pinout::new().with("o", view))
        }
        .boxed()
    }

    node_boilerplate!();
}

/// Copies a view into a fresh canonical buffer on the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContiguousNode {}

impl ContiguousNode {
    pub const KIND: &'static str = "contiguous";

    pub fn new() -> Self {
        Self {}
    }
}

impl NodeKind for ContiguousNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder(Self::KIND, "Contiguous")
            .description("Materialize a strided view into canonical layout")
            .category(Category::View)
            .input(ChannelDef::new("o"))
            .output(ChannelDef::new("o"))
            .build()
    }

    fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>> {
        async move {
            let input = io.input("o").await?;
            let out = io.device().materialize(input).await.map_err(|e| io.fail(e))?;
            Ok(Pinout::new().with("o", out))
        }
        .boxed()
    }

    node_boilerplate!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{EvalErrorKind, TensorError};
    use crate::graph::context::Context;
    use crate::nodes::builtin::ConstNode;

    fn ramp(ctx: &Context, dims: Vec<usize>) -> crate::core::error::NodeId {
        let count = dims.iter().product::<usize>();
        let data = (0..count).map(|v| v as f32).collect();
        ctx.add_node(Box::new(ConstNode::with_data(dims, data)))
    }

    #[test]
    fn test_slice_is_zero_copy() {
        let ctx = Context::new();
        let src = ramp(&ctx, vec![3, 4]);
        let row = ctx.add_node(Box::new(SliceNode::fix(2, 0, 1)));
        ctx.link(src, "o", row, "o").unwrap();

        let input = pollster::block_on(ctx.get(src, "o")).unwrap();
        let out = pollster::block_on(ctx.get(row, "o")).unwrap();
        assert_eq!(out.dims(), &[4]);
        assert_eq!(out.to_vec(), vec![4.0, 5.0, 6.0, 7.0]);
        assert!(out.shares_storage(&input));
    }

    #[test]
    fn test_slice_out_of_range_fails() {
        let ctx = Context::new();
        let src = ramp(&ctx, vec![2, 2]);
        let bad = ctx.add_node(Box::new(SliceNode::fix(2, 1, 5)));
        ctx.link(src, "o", bad, "o").unwrap();

        let err = pollster::block_on(ctx.get(bad, "o")).unwrap_err();
        assert!(matches!(
            err.kind(),
            EvalErrorKind::Tensor(TensorError::IndexOutOfRange { index: 5, .. })
        ));
    }

    #[test]
    fn test_permute_then_contiguous() {
        let ctx = Context::new();
        let src = ramp(&ctx, vec![2, 3]);
        let t = ctx.add_node(Box::new(PermuteNode::new(vec![1, 0])));
        let c = ctx.add_node(Box::new(ContiguousNode::new()));
        ctx.link(src, "o", t, "o").unwrap();
        ctx.link(t, "o", c, "o").unwrap();

        let view = pollster::block_on(ctx.get(t, "o")).unwrap();
        assert!(!view.is_contiguous());
        let out = pollster::block_on(ctx.get(c, "o")).unwrap();
        assert!(out.is_contiguous());
        assert!(!out.shares_storage(&view));
        assert_eq!(out.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_empty_slice_passes_through() {
        let config = SliceNode::default().config();
        assert_eq!(config, serde_json::json!({ "kind": "slice", "fixed": [], "free": [] }));
    }
}
