//! Spatial filters: conv2d

use crate::core::context::EvalContext;
use crate::core::error::{EvalErrorKind, EvalResult, TensorError, TensorResult};
use crate::core::node::{tagged_config, Category, NodeKind, NodeMetadata, Pinout};
use crate::core::port::ChannelDef;
use crate::core::tensor::Tensor;
use crate::nodes::registry::NodeRegistry;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Register filter kinds.
pub fn register(registry: &mut NodeRegistry) {
    registry.register_node::<Conv2dNode>();
}

/// Valid 2-D convolution with a fixed kernel.
///
/// The kernel is stored as `dim = [h, w]` plus its `f32` weights, base64
/// encoded in little-endian byte order. The output loses `kh / 2` rows and
/// `kw / 2` columns on each side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv2dNode {
    pub dim: [usize; 2],
    pub data: String,
}

impl Conv2dNode {
    pub const KIND: &'static str = "conv2d";

    /// Kernel of `height` x `width` weights in row-major order.
    pub fn new(height: usize, width: usize, weights: &[f32]) -> Self {
        let bytes: Vec<u8> = weights.iter().flat_map(|w| w.to_le_bytes()).collect();
        Self {
            dim: [height, width],
            data: STANDARD.encode(bytes),
        }
    }

    /// `size` x `size` box blur.
    pub fn box_blur(size: usize) -> Self {
        let weight = 1.0 / (size * size) as f32;
        Self::new(size, size, &vec![weight; size * size])
    }

    /// Decode the kernel tensor.
    pub fn kernel(&self) -> TensorResult<Tensor> {
        let bytes = STANDARD
            .decode(&self.data)
            .map_err(|_| TensorError::ByteLength(self.data.len()))?;
        if bytes.len() % 4 != 0 {
            return Err(TensorError::ByteLength(bytes.len()));
        }
        let weights: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Tensor::from_dims(&self.dim, Some(weights))
    }
}

impl Default for Conv2dNode {
    fn default() -> Self {
        Self::new(1, 1, &[1.0])
    }
}

impl NodeKind for Conv2dNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder(Self::KIND, "Conv 2D")
            .description("Valid 2-D convolution with a fixed kernel")
            .category(Category::Filter)
            .input(ChannelDef::new("o").with_description("2-D input"))
            .output(ChannelDef::new("o"))
            .build()
    }

    fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>> {
        let kernel = self.kernel();
        async move {
            let input = io.input("o").await?;
            if input.as_2d().is_none() {
                return Err(io.fail(EvalErrorKind::NotTwoDimensional(input.rank())));
            }
            let kernel = kernel.map_err(|e| io.fail(e))?;
            let out = io.device().conv2d(input, kernel).await.map_err(|e| io.fail(e))?;
            Ok(Pinout::new().with("o", out))
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
