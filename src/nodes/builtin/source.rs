//! Tensor sources: const, noise

use crate::core::context::EvalContext;
use crate::core::error::EvalResult;
use crate::core::node::{tagged_config, Category, NodeKind, NodeMetadata, Pinout};
use crate::core::port::ChannelDef;
use crate::core::tensor::{element_count, Tensor};
use crate::nodes::registry::NodeRegistry;
use futures::future::{BoxFuture, FutureExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Register source kinds.
pub fn register(registry: &mut NodeRegistry) {
    registry.register_node::<ConstNode>();
    registry.register_node::<NoiseNode>();
}

/// Emits a constant tensor: `value` everywhere, or explicit `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstNode {
    #[serde(default)]
    pub value: f32,
    pub dims: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<f32>>,
}

impl ConstNode {
    pub const KIND: &'static str = "const";

    /// A tensor of shape `dims` filled with `value`.
    pub fn new(value: f32, dims: Vec<usize>) -> Self {
        Self {
            value,
            dims,
            data: None,
        }
    }

    /// A tensor of shape `dims` holding `data` in row-major order.
    pub fn with_data(dims: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            value: 0.0,
            dims,
            data: Some(data),
        }
    }

    /// Fill with `value`, dropping any explicit data.
    pub fn set_value(&mut self, value: f32) {
        self.value = value;
        self.data = None;
    }
}

impl Default for ConstNode {
    fn default() -> Self {
        Self::new(0.0, vec![1])
    }
}

impl NodeKind for ConstNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder(Self::KIND, "Constant")
            .description("A constant tensor")
            .category(Category::Input)
            .output(ChannelDef::new("o"))
            .build()
    }

    fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>> {
        let config = self.clone();
        async move {
            let tensor = match config.data {
                Some(data) => Tensor::from_dims(&config.dims, Some(data)),
                None => Tensor::filled(&config.dims, config.value),
            }
            .map_err(|e| io.fail(e))?;
            Ok(Pinout::new().with("o", tensor))
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

/// Uniform noise in `[0, 1)` from a seeded generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseNode {
    pub dims: Vec<usize>,
    #[serde(default)]
    pub seed: u64,
}

impl NoiseNode {
    pub const KIND: &'static str = "noise";

    pub fn new(dims: Vec<usize>, seed: u64) -> Self {
        Self { dims, seed }
    }
}

impl Default for NoiseNode {
    fn default() -> Self {
        Self::new(vec![16, 16], 0)
    }
}

impl NodeKind for NoiseNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder(Self::KIND, "Noise")
            .description("Uniform random values in [0, 1)")
            .category(Category::Input)
            .output(ChannelDef::new("o"))
            .build()
    }

    fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>> {
        let config = self.clone();
        async move {
            let count = element_count(&config.dims).map_err(|e| io.fail(e))?;
            let mut rng = StdRng::seed_from_u64(config.seed);
            let data: Vec<f32> = (0..count).map(|_| rng.gen::<f32>()).collect();
            let tensor = Tensor::from_dims(&config.dims, Some(data)).map_err(|e| io.fail(e))?;
            Ok(Pinout::new().with("o", tensor))
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
    use crate::core::error::{EvalErrorKind, TensorError};
    use crate::graph::context::Context;

    #[test]
    fn test_const_fill_and_data() {
        let ctx = Context::new();
        let filled = ctx.add_node(Box::new(ConstNode::new(0.5, vec![2, 2])));
        let explicit = ctx.add_node(Box::new(ConstNode::with_data(vec![3], vec![1.0, 2.0, 3.0])));

        let a = pollster::block_on(ctx.get(filled, "o")).unwrap();
        assert_eq!(a.dims(), &[2, 2]);
        assert_eq!(a.to_vec(), vec![0.5; 4]);

        let b = pollster::block_on(ctx.get(explicit, "o")).unwrap();
        assert_eq!(b.to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_const_data_length_mismatch() {
        let ctx = Context::new();
        let bad = ctx.add_node(Box::new(ConstNode::with_data(vec![2, 2], vec![1.0])));
        let err = pollster::block_on(ctx.get(bad, "o")).unwrap_err();
        assert!(matches!(
            err.kind(),
            EvalErrorKind::Tensor(TensorError::DataLength { expected: 4, got: 1, .. })
        ));
    }

    #[test]
    fn test_const_config_omits_missing_data() {
        let config = ConstNode::new(2.0, vec![3]).config();
        assert_eq!(config, serde_json::json!({ "kind": "const", "value": 2.0, "dims": [3] }));
    }

    #[test]
    fn test_noise_is_seeded() {
        let ctx = Context::new();
        let a = ctx.add_node(Box::new(NoiseNode::new(vec![4, 4], 7)));
        let b = ctx.add_node(Box::new(NoiseNode::new(vec![4, 4], 7)));
        let c = ctx.add_node(Box::new(NoiseNode::new(vec![4, 4], 8)));

        let (a, b, c) = pollster::block_on(async {
            futures::join!(ctx.get(a, "o"), ctx.get(b, "o"), ctx.get(c, "o"))
        });
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.to_vec().iter().all(|v| (0.0..1.0).contains(v)));
    }
}
