use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor};

use super::norm::ChannelNorm;
use super::Mode;

/// One feature-extraction stage: valid convolution, channel normalization,
/// rectification and non-overlapping max-pooling, always in that order.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: ChannelNorm<B>,
    pool: MaxPool2d,
}

pub(crate) struct ConvBlockOptions {
    pub channels: [usize; 2],
    pub kernel_size: usize,
    pub pool_size: usize,
    pub momentum: f64,
    pub epsilon: f64,
}

impl<B: Backend> ConvBlock<B> {
    pub(crate) fn new(options: &ConvBlockOptions, device: &B::Device) -> Self {
        let kernel = [options.kernel_size, options.kernel_size];
        let window = [options.pool_size, options.pool_size];

        let conv = Conv2dConfig::new(options.channels, kernel)
            .with_stride([1, 1])
            .with_padding(PaddingConfig2d::Valid)
            .with_bias(true)
            .init(device);
        let norm = ChannelNorm::new(
            options.channels[1],
            options.momentum,
            options.epsilon,
            device,
        );
        let pool = MaxPool2dConfig::new(window)
            .with_strides(window)
            .with_padding(PaddingConfig2d::Valid)
            .init();

        Self { conv, norm, pool }
    }

    /// # Shapes
    ///
    /// - input: `[batch_size, channels_in, height, width]`
    /// - output: `[batch_size, channels_out, (height - k + 1) / p, (width - k + 1) / p]`
    pub fn forward(&self, input: Tensor<B, 4>, mode: Mode) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = self.norm.forward(x, mode);
        let x = relu(x);

        self.pool.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    fn options(channels: [usize; 2]) -> ConvBlockOptions {
        ConvBlockOptions {
            channels,
            kernel_size: 3,
            pool_size: 2,
            momentum: 0.1,
            epsilon: 1e-5,
        }
    }

    #[test]
    fn first_block_shape() {
        let device = Default::default();
        let block = ConvBlock::<TestBackend>::new(&options([1, 8]), &device);

        let output = block.forward(Tensor::zeros([2, 1, 32, 32], &device), Mode::Inference);

        assert_eq!(output.dims(), [2, 8, 15, 15]);
    }

    #[test]
    fn odd_sizes_are_truncated_by_the_pool() {
        let device = Default::default();
        let block = ConvBlock::<TestBackend>::new(&options([8, 16]), &device);

        let output = block.forward(Tensor::zeros([1, 8, 31, 31], &device), Mode::Inference);

        assert_eq!(output.dims(), [1, 16, 14, 14]);
    }

    #[test]
    fn output_is_rectified() {
        let device = Default::default();
        let block = ConvBlock::<TestBackend>::new(&options([1, 8]), &device);
        let input = Tensor::<TestBackend, 4>::random(
            [1, 1, 32, 32],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device,
        );

        let output = block.forward(input, Mode::Inference);
        let values = output.into_data().to_vec::<f32>().unwrap();

        assert!(values.iter().all(|v| *v >= 0.0));
    }
}
