//! Image I/O: image_source, image_sink

use crate::core::context::EvalContext;
use crate::core::error::{EvalErrorKind, EvalResult};
use crate::core::node::{tagged_config, Category, NodeKind, NodeMetadata, Pinout};
use crate::core::port::ChannelDef;
use crate::core::tensor::{Size2d, Tensor};
use crate::nodes::registry::NodeRegistry;
use futures::future::{BoxFuture, FutureExt};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::path::PathBuf;

/// Register image kinds.
pub fn register(registry: &mut NodeRegistry) {
    registry.register_node::<ImageSourceNode>();
    registry.register_node::<ImageSinkNode>();
}

const PLANES: [&str; 3] = ["R", "G", "B"];

/// Loads an image file as three `[height, width]` planes in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSourceNode {
    pub path: PathBuf,
}

impl ImageSourceNode {
    pub const KIND: &'static str = "image_source";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NodeKind for ImageSourceNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder(Self::KIND, "Image Source")
            .description("Load an image file as R, G and B planes")
            .category(Category::Input)
            .output(ChannelDef::new("R"))
            .output(ChannelDef::new("G"))
            .output(ChannelDef::new("B"))
            .build()
    }

    fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>> {
        let path = self.path.clone();
        async move {
            let img = image::open(&path)
                .map_err(|e| {
                    io.fail(EvalErrorKind::Other(format!(
                        "failed to load image '{}': {}",
                        path.display(),
                        e
                    )))
                })?
                .to_rgb8();

            let (width, height) = (img.width() as usize, img.height() as usize);
            let mut planes = vec![Vec::with_capacity(width * height); 3];
            for pixel in img.pixels() {
                for (plane, value) in planes.iter_mut().zip(pixel.0) {
                    plane.push(value as f32 / 255.0);
                }
            }

            let mut pinout = Pinout::new();
            for (name, plane) in PLANES.iter().zip(planes) {
                let tensor = Tensor::from_dims(&[height, width], Some(plane)).map_err(|e| io.fail(e))?;
                pinout.set(*name, tensor);
            }
            log::debug!("loaded {}x{} image from {}", width, height, path.display());
            Ok(pinout)
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

/// Writes three equally sized `[height, width]` planes as an RGB8 PNG.
///
/// Values are clamped to `[0, 1]` before quantizing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSinkNode {
    pub path: PathBuf,
}

impl ImageSinkNode {
    pub const KIND: &'static str = "image_sink";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl NodeKind for ImageSinkNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder(Self::KIND, "Image Sink")
            .description("Write R, G and B planes to a PNG file")
            .category(Category::Output)
            .input(ChannelDef::new("R"))
            .input(ChannelDef::new("G"))
            .input(ChannelDef::new("B"))
            .build()
    }

    fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>> {
        let path = self.path.clone();
        async move {
            let (r, g, b) = futures::try_join!(io.input("R"), io.input("G"), io.input("B"))?;

            let size = r
                .as_2d()
                .ok_or_else(|| io.fail(EvalErrorKind::NotTwoDimensional(r.rank())))?;
            for plane in [&g, &b] {
                if plane.as_2d() != Some(size) {
                    return Err(io.fail(EvalErrorKind::DimensionMismatch {
                        left: r.dims().to_vec(),
                        right: plane.dims().to_vec(),
                    }));
                }
            }

            let Size2d { width, height } = size;
            let (rv, gv, bv) = (r.to_vec(), g.to_vec(), b.to_vec());
            let img = RgbImage::from_fn(width as u32, height as u32, |x, y| {
                let k = y as usize * width + x as usize;
                image::Rgb([to_u8(rv[k]), to_u8(gv[k]), to_u8(bv[k])])
            });
            img.save_with_format(&path, ImageFormat::Png).map_err(|e| {
                io.fail(EvalErrorKind::Other(format!(
                    "failed to write image '{}': {}",
                    path.display(),
                    e
                )))
            })?;
            log::info!("wrote {}x{} image to {}", width, height, path.display());
            Ok(Pinout::new())
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
    use crate::nodes::builtin::ConstNode;

    #[test]
    fn test_write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");

        let ctx = Context::new();
        let r = ctx.add_node(Box::new(ConstNode::new(1.0, vec![2, 3])));
        let g = ctx.add_node(Box::new(ConstNode::new(0.0, vec![2, 3])));
        let b = ctx.add_node(Box::new(ConstNode::new(2.0, vec![2, 3])));
        let sink = ctx.add_node(Box::new(ImageSinkNode::new(&path)));
        for (src, ch) in [(r, "R"), (g, "G"), (b, "B")] {
            ctx.link(src, "o", sink, ch).unwrap();
        }
        pollster::block_on(ctx.eval(sink)).unwrap();

        let source = ctx.add_node(Box::new(ImageSourceNode::new(&path)));
        let red = pollster::block_on(ctx.get(source, "R")).unwrap();
        let green = pollster::block_on(ctx.get(source, "G")).unwrap();
        let blue = pollster::block_on(ctx.get(source, "B")).unwrap();
        assert_eq!(red.dims(), &[2, 3]);
        assert_eq!(red.to_vec(), vec![1.0; 6]);
        assert_eq!(green.to_vec(), vec![0.0; 6]);
        assert_eq!(blue.to_vec(), vec![1.0; 6]);
    }

    #[test]
    fn test_sink_rejects_mismatched_planes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new();
        let r = ctx.add_node(Box::new(ConstNode::new(1.0, vec![2, 3])));
        let g = ctx.add_node(Box::new(ConstNode::new(1.0, vec![3, 2])));
        let sink = ctx.add_node(Box::new(ImageSinkNode::new(dir.path().join("x.png"))));
        ctx.link(r, "o", sink, "R").unwrap();
        ctx.link(g, "o", sink, "G").unwrap();
        ctx.link(r, "o", sink, "B").unwrap();

        let err = pollster::block_on(ctx.eval(sink)).unwrap_err();
        assert!(matches!(err.kind(), EvalErrorKind::DimensionMismatch { .. }));
    }

    #[test]
    fn test_missing_file() {
        let ctx = Context::new();
        let source = ctx.add_node(Box::new(ImageSourceNode::new("/nonexistent/tensorweave.png")));
        let err = pollster::block_on(ctx.get(source, "R")).unwrap_err();
        assert!(err.to_string().contains("failed to load image"));
    }
}
