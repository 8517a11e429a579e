mod block;
mod dropout;
mod norm;

pub use block::ConvBlock;
pub use dropout::Dropout;
pub use norm::ChannelNorm;

use burn::module::{Ignored, Module};
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{backend::Backend, Tensor};

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::shape::ShapeTrace;
use block::ConvBlockOptions;

/// Operating mode of a forward pass.
///
/// The mode is always chosen by the caller; nothing in the network infers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Frozen running statistics, dropout disabled.
    Inference,
    /// Batch statistics (running estimates updated) and dropout whose mask is
    /// derived from `seed`.
    Training { seed: u64 },
}

/// The gesture classifier.
///
/// Two [convolution blocks](ConvBlock) followed by flatten, [dropout](Dropout)
/// and a linear projection to the class logits. No softmax is applied.
#[derive(Module, Debug)]
pub struct Network<B: Backend> {
    pub block1: ConvBlock<B>,
    pub block2: ConvBlock<B>,
    dropout: Dropout,
    pub fc: Linear<B>,
    trace: Ignored<ShapeTrace>,
}

impl NetworkConfig {
    /// Initializes a network with random parameters.
    ///
    /// Fails when the configuration does not describe a valid topology.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Network<B>> {
        let trace = self.validate()?;
        let [channels_1, channels_2] = self.block_channels;

        let block = |channels| ConvBlockOptions {
            channels,
            kernel_size: self.kernel_size,
            pool_size: self.pool_size,
            momentum: self.norm_momentum,
            epsilon: self.norm_epsilon,
        };

        Ok(Network {
            block1: ConvBlock::new(&block([self.in_channels, channels_1]), device),
            block2: ConvBlock::new(&block([channels_1, channels_2]), device),
            dropout: Dropout::new(self.dropout),
            fc: LinearConfig::new(trace.features, self.num_classes)
                .with_bias(true)
                .init(device),
            trace: Ignored(trace),
        })
    }
}

impl<B: Backend> Network<B> {
    /// Stage shapes this network was built for.
    pub fn shape_trace(&self) -> &ShapeTrace {
        &self.trace
    }

    /// Runs the feature extractor only.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, 1, size, size]`
    /// - output: `[batch_size, 16, 6, 6]` (32 input) or `[batch_size, 16, 14, 14]` (64 input)
    pub fn features(&self, input: Tensor<B, 4>, mode: Mode) -> Result<Tensor<B, 4>> {
        self.trace.check_input(input.dims())?;

        let x = self.block1.forward(input, mode);
        let x = self.block2.forward(x, mode);

        let [batch_size, ..] = x.dims();
        let expected = self.trace.output().with_batch(batch_size);
        if x.dims() != expected {
            return Err(Error::ShapeMismatch {
                stage: "block2",
                expected: expected.to_vec(),
                actual: x.dims().to_vec(),
            });
        }

        Ok(x)
    }

    /// Runs the full network and returns the raw class logits.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, 1, size, size]`
    /// - output: `[batch_size, num_classes]`
    pub fn forward(&self, input: Tensor<B, 4>, mode: Mode) -> Result<Tensor<B, 2>> {
        let x = self.features(input, mode)?;
        let [batch_size, ..] = x.dims();

        let x = x.reshape([batch_size, self.trace.features]);
        let x = self.dropout.forward(x, mode);

        Ok(self.fc.forward(x))
    }

    /// Checks every parameter tensor against the configured topology.
    ///
    /// Records carry no shape checks of their own, so this runs after every
    /// snapshot load.
    pub fn check_parameters(&self) -> Result<()> {
        for (name, block, trace) in [
            ("block1", &self.block1, &self.trace.blocks[0]),
            ("block2", &self.block2, &self.trace.blocks[1]),
        ] {
            let kernel_size = trace.input.height - trace.conv.height + 1;
            let channels = [trace.conv.channels];

            check_shape(
                format!("{name}.conv.weight"),
                &[trace.conv.channels, trace.input.channels, kernel_size, kernel_size],
                &block.conv.weight.dims(),
            )?;
            if let Some(bias) = &block.conv.bias {
                check_shape(format!("{name}.conv.bias"), &channels, &bias.dims())?;
            }
            check_shape(format!("{name}.norm.gamma"), &channels, &block.norm.gamma.dims())?;
            check_shape(format!("{name}.norm.beta"), &channels, &block.norm.beta.dims())?;
            check_shape(
                format!("{name}.norm.running_mean"),
                &channels,
                &block.norm.running_mean.value().dims(),
            )?;
            check_shape(
                format!("{name}.norm.running_var"),
                &channels,
                &block.norm.running_var.value().dims(),
            )?;
        }

        check_shape(
            "fc.weight".to_string(),
            &[self.trace.features, self.trace.num_classes],
            &self.fc.weight.dims(),
        )?;
        if let Some(bias) = &self.fc.bias {
            check_shape("fc.bias".to_string(), &[self.trace.num_classes], &bias.dims())?;
        }

        Ok(())
    }
}

fn check_shape(name: String, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected != actual {
        return Err(Error::ParameterShape {
            name,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// Reads a tensor back as a flat `f32` vector.
pub fn into_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| Error::Data(format!("{err:?}")))
}
