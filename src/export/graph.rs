//! Frozen inference graph and its interpreter.
//!
//! The graph only holds plain `f32` buffers and is evaluated without burn, so
//! the same bytes can be read by any runtime that understands the layout.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::shape::{pool_output, valid_conv_output, FeatureShape};

/// One operation of the frozen graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Valid convolution with stride 1 and the channel normalization folded in.
    ///
    /// `weight` is `[out_channels, in_channels, kernel_size, kernel_size]`.
    Conv2d {
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        weight: Vec<f32>,
        bias: Vec<f32>,
    },
    Relu,
    /// Non-overlapping max-pool, floor truncation.
    MaxPool2d { window: usize },
    Flatten,
    /// Fully connected layer, `weight` is `[d_output, d_input]`.
    Linear {
        d_input: usize,
        d_output: usize,
        weight: Vec<f32>,
        bias: Vec<f32>,
    },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Conv2d { .. } => "conv2d",
            Op::Relu => "relu",
            Op::MaxPool2d { .. } => "max_pool2d",
            Op::Flatten => "flatten",
            Op::Linear { .. } => "linear",
        }
    }

    /// Output shape for `input`, checking the parameter buffers on the way.
    pub(crate) fn output_shape(&self, input: FeatureShape) -> Result<FeatureShape> {
        let invalid = |message: String| Error::Artifact(format!("{}: {message}", self.name()));
        if !matches!(input.checked_numel(), Some(numel) if numel > 0) {
            return Err(invalid(format!("unusable input shape {input:?}")));
        }

        match self {
            Op::Conv2d {
                in_channels,
                out_channels,
                kernel_size,
                weight,
                bias,
            } => {
                if input.channels != *in_channels {
                    return Err(invalid(format!(
                        "expects {in_channels} channels, received {}",
                        input.channels
                    )));
                }
                if *out_channels == 0 || *kernel_size == 0 {
                    return Err(invalid(format!(
                        "{out_channels} output channels with kernel {kernel_size}"
                    )));
                }
                let expected = out_channels
                    .checked_mul(*in_channels)
                    .and_then(|len| len.checked_mul(*kernel_size))
                    .and_then(|len| len.checked_mul(*kernel_size))
                    .ok_or_else(|| invalid("parameter count overflows".into()))?;
                if weight.len() != expected || bias.len() != *out_channels {
                    return Err(invalid(format!(
                        "parameter sizes {}/{} do not match {expected}/{out_channels}",
                        weight.len(),
                        bias.len()
                    )));
                }
                let height = valid_conv_output(input.height, *kernel_size);
                let width = valid_conv_output(input.width, *kernel_size);
                match (height, width) {
                    (Some(height), Some(width)) => {
                        Ok(FeatureShape::new(*out_channels, height, width))
                    }
                    _ => Err(invalid("input smaller than the kernel".into())),
                }
            }
            Op::Relu => Ok(input),
            Op::MaxPool2d { window } => {
                match (pool_output(input.height, *window), pool_output(input.width, *window)) {
                    (Some(height), Some(width)) => {
                        Ok(FeatureShape::new(input.channels, height, width))
                    }
                    _ => Err(invalid("input smaller than the window".into())),
                }
            }
            Op::Flatten => Ok(FeatureShape::new(input.numel(), 1, 1)),
            Op::Linear {
                d_input,
                d_output,
                weight,
                bias,
            } => {
                if input.numel() != *d_input || input.height != 1 || input.width != 1 {
                    return Err(invalid(format!(
                        "expects {d_input} flat features, received {input:?}"
                    )));
                }
                if *d_output == 0 {
                    return Err(invalid("no outputs".into()));
                }
                let expected = d_input
                    .checked_mul(*d_output)
                    .ok_or_else(|| invalid("parameter count overflows".into()))?;
                if weight.len() != expected || bias.len() != *d_output {
                    return Err(invalid(format!(
                        "parameter sizes {}/{} do not match {expected}/{d_output}",
                        weight.len(),
                        bias.len()
                    )));
                }
                Ok(FeatureShape::new(*d_output, 1, 1))
            }
        }
    }

    /// Evaluates the op on one sample laid out as `[channels, height, width]`.
    ///
    /// `input` must already have been checked with [Op::output_shape].
    pub(crate) fn run(
        &self,
        input: &[f32],
        shape: FeatureShape,
        output: FeatureShape,
    ) -> Vec<f32> {
        match self {
            Op::Conv2d {
                in_channels,
                kernel_size,
                weight,
                bias,
                ..
            } => conv2d(input, shape, output, *in_channels, *kernel_size, weight, bias),
            Op::Relu => input.iter().map(|value| value.max(0.0)).collect(),
            Op::MaxPool2d { window } => max_pool2d(input, shape, output, *window),
            Op::Flatten => input.to_vec(),
            Op::Linear {
                d_input,
                weight,
                bias,
                ..
            } => weight
                .chunks(*d_input)
                .zip(bias)
                .map(|(row, bias)| {
                    let sum = row
                        .iter()
                        .zip(input)
                        .fold(*bias as f64, |sum, (w, x)| sum + *w as f64 * *x as f64);
                    sum as f32
                })
                .collect(),
        }
    }
}

fn conv2d(
    input: &[f32],
    shape: FeatureShape,
    output: FeatureShape,
    in_channels: usize,
    kernel_size: usize,
    weight: &[f32],
    bias: &[f32],
) -> Vec<f32> {
    let mut values = Vec::with_capacity(output.numel());
    let kernel_area = kernel_size * kernel_size;

    for out_channel in 0..output.channels {
        let kernel_len = in_channels * kernel_area;
        let kernels = &weight[out_channel * kernel_len..][..kernel_len];
        for y in 0..output.height {
            for x in 0..output.width {
                let mut sum = bias[out_channel] as f64;
                for (in_channel, kernel) in kernels.chunks(kernel_area).enumerate() {
                    let plane = &input[in_channel * shape.height * shape.width..];
                    for ky in 0..kernel_size {
                        let row = &plane[(y + ky) * shape.width + x..][..kernel_size];
                        let taps = &kernel[ky * kernel_size..][..kernel_size];
                        for (w, v) in taps.iter().zip(row) {
                            sum += *w as f64 * *v as f64;
                        }
                    }
                }
                values.push(sum as f32);
            }
        }
    }

    values
}

fn max_pool2d(
    input: &[f32],
    shape: FeatureShape,
    output: FeatureShape,
    window: usize,
) -> Vec<f32> {
    let mut values = Vec::with_capacity(output.numel());

    for channel in 0..output.channels {
        let plane = &input[channel * shape.height * shape.width..];
        for y in 0..output.height {
            for x in 0..output.width {
                let mut max = f32::NEG_INFINITY;
                for ky in 0..window {
                    let row = &plane[(y * window + ky) * shape.width + x * window..][..window];
                    max = row.iter().fold(max, |max, value| max.max(*value));
                }
                values.push(max);
            }
        }
    }

    values
}
