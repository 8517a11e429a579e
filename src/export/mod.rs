//! Conversion of a trained [Network] into a self-contained deployment artifact.
//!
//! The exported model is a flat list of [ops](Op) with the channel
//! normalization folded into the preceding convolution:
//!
//! `w' = w * γ / sqrt(var + ε)`, `b' = (b - mean) * γ / sqrt(var + ε) + β`
//!
//! Dropout is the identity in inference and is left out.

mod c_array;
mod graph;
mod verify;

pub use c_array::*;
pub use graph::Op;
pub use verify::*;

use std::fs;
use std::path::Path;

use burn::tensor::backend::Backend;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::config::Interpolation;
use crate::error::{Error, Result};
use crate::inference::Prediction;
use crate::model::{into_vec, ConvBlock, Network};
use crate::preprocess::Preprocessor;
use crate::shape::FeatureShape;

/// Leading bytes of every serialized artifact.
pub const MAGIC: [u8; 4] = *b"GNET";
/// Layout version written by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// Frozen inference graph of a [Network].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedModel {
    magic: [u8; 4],
    version: u32,
    pub in_channels: usize,
    pub input_size: usize,
    pub num_classes: usize,
    /// Resize method the inputs must be prepared with.
    pub interpolation: Interpolation,
    pub ops: Vec<Op>,
}

impl ExportedModel {
    /// Builds and checks a model from its parts.
    pub fn new(
        in_channels: usize,
        input_size: usize,
        num_classes: usize,
        interpolation: Interpolation,
        ops: Vec<Op>,
    ) -> Result<Self> {
        let model = Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            in_channels,
            input_size,
            num_classes,
            interpolation,
            ops,
        };
        model.check()?;

        Ok(model)
    }

    /// Number of input scalars of one sample.
    pub fn input_len(&self) -> usize {
        self.input_shape().numel()
    }

    fn input_shape(&self) -> FeatureShape {
        FeatureShape::new(self.in_channels, self.input_size, self.input_size)
    }

    /// Propagates shapes through every op, returning the shape seen by each.
    fn shapes(&self) -> Result<Vec<FeatureShape>> {
        let mut shapes = Vec::with_capacity(self.ops.len() + 1);
        let mut shape = self.input_shape();
        if shape.checked_numel().is_none() {
            return Err(Error::Artifact(format!("input shape {shape:?} overflows")));
        }
        shapes.push(shape);
        for op in &self.ops {
            shape = op.output_shape(shape)?;
            shapes.push(shape);
        }

        Ok(shapes)
    }

    /// Checks the header and the consistency of every op.
    pub fn check(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::Artifact(format!("unknown magic {:?}", self.magic)));
        }
        if self.version != FORMAT_VERSION {
            return Err(Error::Artifact(format!(
                "unsupported version {}, expected {FORMAT_VERSION}",
                self.version
            )));
        }
        if self.in_channels == 0 || self.input_size == 0 || self.num_classes == 0 {
            return Err(Error::Artifact(format!(
                "empty header: {} channels, input size {}, {} classes",
                self.in_channels, self.input_size, self.num_classes
            )));
        }

        let shapes = self.shapes()?;
        let output = shapes[shapes.len() - 1];
        if output != FeatureShape::new(self.num_classes, 1, 1) {
            return Err(Error::Artifact(format!(
                "graph produces {output:?}, expected {} logits",
                self.num_classes
            )));
        }

        Ok(())
    }

    /// Evaluates the graph on one sample laid out as `[channels, height, width]`.
    pub fn run(&self, input: &[f32]) -> Result<Vec<f32>> {
        let shapes = self.shapes()?;
        if input.len() != shapes[0].numel() {
            return Err(Error::ShapeMismatch {
                stage: "input",
                expected: vec![self.in_channels, self.input_size, self.input_size],
                actual: vec![input.len()],
            });
        }

        let mut values = input.to_vec();
        for (op, io) in self.ops.iter().zip(shapes.windows(2)) {
            values = op.run(&values, io[0], io[1]);
        }

        Ok(values)
    }

    /// Preprocessing matching the header of this artifact.
    pub fn preprocessor(&self) -> Preprocessor {
        Preprocessor::with_size(self.input_size, self.interpolation)
    }

    /// Classifies a decoded image with the frozen graph.
    pub fn predict(&self, image: &DynamicImage) -> Result<Prediction> {
        Prediction::new(self.run(&self.preprocessor().to_vec(image))?)
    }

    /// Serializes the artifact.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserializes and checks an artifact.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MAGIC.len() || bytes[..MAGIC.len()] != MAGIC {
            return Err(Error::Artifact("missing format magic".into()));
        }
        let model: Self = bincode::deserialize(bytes)?;
        model.check()?;

        Ok(model)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), self.to_bytes()?)?;
        log::info!("Exported model written to {}", path.as_ref().display());

        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_bytes(&fs::read(path)?)
    }
}

/// Freezes `network` into an [ExportedModel].
///
/// The running statistics are read as they are, so the graph matches
/// [Mode::Inference](crate::model::Mode::Inference) of the given network.
pub fn export<B: Backend>(
    network: &Network<B>,
    interpolation: Interpolation,
) -> Result<ExportedModel> {
    network.check_parameters()?;
    let trace = network.shape_trace();

    let mut ops = Vec::with_capacity(9);
    for (block, block_trace) in [&network.block1, &network.block2]
        .into_iter()
        .zip(trace.blocks.iter())
    {
        ops.push(fold_conv(
            block,
            block_trace.input.channels,
            block_trace.conv.channels,
            block_trace.kernel_size,
        )?);
        ops.push(Op::Relu);
        ops.push(Op::MaxPool2d {
            window: block_trace.window,
        });
    }
    ops.push(Op::Flatten);

    let [d_input, d_output] = network.fc.weight.dims();
    let weight = into_vec(network.fc.weight.val().transpose())?;
    let bias = match &network.fc.bias {
        Some(bias) => into_vec(bias.val())?,
        None => vec![0.0; d_output],
    };
    ops.push(Op::Linear {
        d_input,
        d_output,
        weight,
        bias,
    });

    ExportedModel::new(
        trace.input.channels,
        trace.input.height,
        trace.num_classes,
        interpolation,
        ops,
    )
}

fn fold_conv<B: Backend>(
    block: &ConvBlock<B>,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
) -> Result<Op> {
    let weight = into_vec(block.conv.weight.val())?;
    let bias = match &block.conv.bias {
        Some(bias) => into_vec(bias.val())?,
        None => vec![0.0; out_channels],
    };
    let gamma = into_vec(block.norm.gamma.val())?;
    let beta = into_vec(block.norm.beta.val())?;
    let mean = into_vec(block.norm.running_mean.value())?;
    let var = into_vec(block.norm.running_var.value())?;
    let epsilon = block.norm.epsilon();

    let kernel_len = in_channels * kernel_size * kernel_size;
    let mut folded_weight = Vec::with_capacity(weight.len());
    let mut folded_bias = Vec::with_capacity(out_channels);

    for (channel, kernel) in weight.chunks(kernel_len).enumerate() {
        let scale = gamma[channel] as f64 / (var[channel] as f64 + epsilon).sqrt();
        folded_weight.extend(kernel.iter().map(|w| (*w as f64 * scale) as f32));
        folded_bias.push(
            ((bias[channel] as f64 - mean[channel] as f64) * scale + beta[channel] as f64) as f32,
        );
    }

    Ok(Op::Conv2d {
        in_channels,
        out_channels,
        kernel_size,
        weight: folded_weight,
        bias: folded_bias,
    })
}
