use burn::module::{Module, Param, RunningState};
use burn::nn::Initializer;
use burn::tensor::{backend::Backend, Tensor};

use super::Mode;

/// Per-channel affine normalization of `[batch_size, channels, height, width]`
/// feature maps.
///
/// Each channel `c` is mapped to `x * scale[c] + shift[c]` with
/// `scale = γ / sqrt(var + epsilon)` and `shift = β - mean * scale`.
///
/// [Mode::Inference] reads `mean` and `var` from the running statistics and
/// never writes them, so the map is the fixed affine transform the exporter
/// folds into the preceding convolution. [Mode::Training] takes `mean` and the
/// biased `var` over the batch and spatial positions of the current input and
/// blends them into the running statistics with weight `momentum`.
#[derive(Module, Debug)]
pub struct ChannelNorm<B: Backend> {
    /// Learnable scale γ.
    pub gamma: Param<Tensor<B, 1>>,
    /// Learnable shift β.
    pub beta: Param<Tensor<B, 1>>,
    pub running_mean: RunningState<Tensor<B, 1>>,
    /// Biased running variance.
    pub running_var: RunningState<Tensor<B, 1>>,
    momentum: f64,
    epsilon: f64,
}

impl<B: Backend> ChannelNorm<B> {
    pub(crate) fn new(channels: usize, momentum: f64, epsilon: f64, device: &B::Device) -> Self {
        Self {
            gamma: Initializer::Ones.init([channels], device),
            beta: Initializer::Zeros.init([channels], device),
            running_mean: RunningState::new(Tensor::zeros([channels], device)),
            running_var: RunningState::new(Tensor::ones([channels], device)),
            momentum,
            epsilon,
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// # Shapes
    ///
    /// - input: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, channels, height, width]`
    pub fn forward(&self, input: Tensor<B, 4>, mode: Mode) -> Tensor<B, 4> {
        let device = input.device();
        let (mean, var) = match mode {
            Mode::Inference => (
                self.running_mean.value().to_device(&device),
                self.running_var.value().to_device(&device),
            ),
            Mode::Training { .. } => {
                let (mean, var) = batch_statistics(input.clone());
                self.record(mean.clone().detach(), var.clone().detach(), &device);
                (mean, var)
            }
        };

        let scale = self.gamma.val() / var.add_scalar(self.epsilon).sqrt();
        let shift = self.beta.val() - mean * scale.clone();
        let channels = scale.dims()[0];

        input * scale.reshape([1, channels, 1, 1]) + shift.reshape([1, channels, 1, 1])
    }

    fn record(&self, mean: Tensor<B, 1>, var: Tensor<B, 1>, device: &B::Device) {
        let blend = |running: Tensor<B, 1>, batch: Tensor<B, 1>| {
            (running.to_device(device).mul_scalar(1.0 - self.momentum)
                + batch.mul_scalar(self.momentum))
            .detach()
        };

        self.running_mean
            .update(blend(self.running_mean.value_sync(), mean));
        self.running_var
            .update(blend(self.running_var.value_sync(), var));
    }
}

/// Per-channel mean and biased variance over batch and spatial positions.
fn batch_statistics<B: Backend>(input: Tensor<B, 4>) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let [batch_size, channels, height, width] = input.dims();
    let per_channel = input
        .swap_dims(0, 1)
        .reshape([channels, batch_size * height * width]);

    let mean = per_channel.clone().mean_dim(1);
    let var = (per_channel - mean.clone()).powf_scalar(2.0).mean_dim(1);

    (mean.reshape([channels]), var.reshape([channels]))
}
