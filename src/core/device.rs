//! Compute device abstraction.
//!
//! Nodes never run heavy numeric loops inline; they hand tensors to a
//! [`ComputeDevice`] and await the result. Every dispatch returns a future so
//! an accelerator backend can complete asynchronously. [`HostDevice`] runs
//! small jobs inline and large ones on the rayon pool, signalling completion
//! over a oneshot channel.

use crate::core::error::DeviceError;
use crate::core::tensor::{Tensor, PARALLEL_THRESHOLD};
use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for device dispatches.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Elementwise binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    #[default]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
}

impl BinaryOp {
    /// Apply the operator to one pair of elements.
    #[inline]
    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        }
    }

    /// Operator symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Narrow interface to whatever executes numeric kernels.
///
/// Inputs may be arbitrary strided views; outputs are always canonical.
pub trait ComputeDevice: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Gather a view into canonical layout.
    fn materialize(&self, input: Tensor) -> BoxFuture<'static, DeviceResult<Tensor>>;

    /// Elementwise `a op b` over equal-shaped views.
    fn binary(&self, op: BinaryOp, a: Tensor, b: Tensor) -> BoxFuture<'static, DeviceResult<Tensor>>;

    /// Valid 2-D convolution of `input` with `kernel`.
    fn conv2d(&self, input: Tensor, kernel: Tensor) -> BoxFuture<'static, DeviceResult<Tensor>>;

    /// Copy the addressed elements back to host memory, row-major.
    fn read_back(&self, input: Tensor) -> BoxFuture<'static, DeviceResult<Vec<f32>>>;
}

/// Host implementation of [`ComputeDevice`].
#[derive(Debug, Clone)]
pub struct HostDevice {
    parallel_threshold: usize,
}

impl HostDevice {
    /// Create a host device with the default parallel threshold.
    pub fn new() -> Self {
        Self {
            parallel_threshold: PARALLEL_THRESHOLD,
        }
    }

    /// Element count at or above which work moves to the rayon pool.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// The configured parallel threshold.
    pub fn parallel_threshold(&self) -> usize {
        self.parallel_threshold
    }

    fn dispatch<T, F>(&self, elems: usize, job: F) -> BoxFuture<'static, DeviceResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(bool) -> DeviceResult<T> + Send + 'static,
    {
        if elems < self.parallel_threshold {
            return future::ready(job(false)).boxed();
        }

        let (sender, receiver) = oneshot::channel();
        rayon::spawn(move || {
            let _ = sender.send(job(true));
        });
        async move { receiver.await.map_err(|_| DeviceError::Dropped)? }.boxed()
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeDevice for HostDevice {
    fn name(&self) -> &str {
        "host"
    }

    fn materialize(&self, input: Tensor) -> BoxFuture<'static, DeviceResult<Tensor>> {
        self.dispatch(input.elem_count(), move |parallel| {
            let threshold = if parallel { 0 } else { usize::MAX };
            Ok(input.materialize_with(threshold))
        })
    }

    fn binary(&self, op: BinaryOp, a: Tensor, b: Tensor) -> BoxFuture<'static, DeviceResult<Tensor>> {
        if a.dims() != b.dims() {
            return future::ready(Err(DeviceError::ShapeMismatch {
                left: a.dims().to_vec(),
                right: b.dims().to_vec(),
            }))
            .boxed();
        }

        self.dispatch(a.elem_count(), move |parallel| {
            let mut data = vec![0.0f32; a.elem_count()];
            let kernel = |(k, slot): (usize, &mut f32)| {
                *slot = op.apply(a.at_linear(k), b.at_linear(k));
            };
            if parallel {
                data.par_iter_mut().enumerate().for_each(kernel);
            } else {
                data.iter_mut().enumerate().for_each(kernel);
            }
            Ok(Tensor::from_dims(a.dims(), Some(data))?)
        })
    }

    fn conv2d(&self, input: Tensor, kernel: Tensor) -> BoxFuture<'static, DeviceResult<Tensor>> {
        let (size, ksize) = match (input.as_2d(), kernel.as_2d()) {
            (Some(size), Some(ksize)) => (size, ksize),
            (None, _) => {
                return future::ready(Err(DeviceError::Rank {
                    kernel: "conv2d",
                    expected: 2,
                    got: input.rank(),
                }))
                .boxed()
            }
            (_, None) => {
                return future::ready(Err(DeviceError::Rank {
                    kernel: "conv2d",
                    expected: 2,
                    got: kernel.rank(),
                }))
                .boxed()
            }
        };
        if ksize.height > size.height || ksize.width > size.width {
            return future::ready(Err(DeviceError::KernelTooLarge {
                kernel: kernel.dims().to_vec(),
                input: input.dims().to_vec(),
            }))
            .boxed();
        }

        let out_h = size.height - 2 * (ksize.height / 2);
        let out_w = size.width - 2 * (ksize.width / 2);

        self.dispatch(out_h * out_w, move |parallel| {
            let weights = kernel.to_vec();
            let mut data = vec![0.0f32; out_h * out_w];
            let row = |(y, out_row): (usize, &mut [f32])| {
                for (x, slot) in out_row.iter_mut().enumerate() {
                    let mut acc = 0.0f32;
                    for j in 0..ksize.height {
                        for i in 0..ksize.width {
                            acc += input.at_2d(y + j, x + i) * weights[j * ksize.width + i];
                        }
                    }
                    *slot = acc;
                }
            };
            if out_w > 0 {
                if parallel {
                    data.par_chunks_mut(out_w).enumerate().for_each(row);
                } else {
                    data.chunks_mut(out_w).enumerate().for_each(row);
                }
            }
            Ok(Tensor::from_dims(&[out_h, out_w], Some(data))?)
        })
    }

    fn read_back(&self, input: Tensor) -> BoxFuture<'static, DeviceResult<Vec<f32>>> {
        self.dispatch(input.elem_count(), move |_| Ok(input.to_vec()))
    }
}
