//! Built-in node kinds.

mod filter;
mod image;
mod math;
mod probe;
pub mod remote;
mod source;
mod view;

use crate::nodes::registry::NodeRegistry;

/// Register every built-in kind that needs no external service.
pub fn register_all(registry: &mut NodeRegistry) {
    source::register(registry);
    math::register(registry);
    view::register(registry);
    filter::register(registry);
    image::register(registry);
    probe::register(registry);
}

// Re-export for direct access
pub use filter::Conv2dNode;
pub use image::{ImageSinkNode, ImageSourceNode};
pub use math::BinOpNode;
pub use probe::{ProbeHandle, ProbeNode};
pub use remote::{IoDescription, IoPort, LoopbackTransport, RemoteFault, RemoteNode, RemoteRequest, RemoteTransport};
pub use source::{ConstNode, NoiseNode};
pub use view::{ContiguousNode, FixedDim, FreeDim, PermuteNode, SliceNode};
