use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::Mode;

/// Inverted dropout driven by an explicit seed.
///
/// During [training](Mode::Training) each element is zeroed with probability
/// `prob` and the survivors are scaled by `1 / (1 - prob)`. The mask only
/// depends on the seed carried by the mode and on the input shape, so the
/// same seed always drops the same elements. In [inference](Mode::Inference)
/// the input is returned unchanged.
#[derive(Module, Clone, Debug)]
pub struct Dropout {
    prob: f64,
}

impl Dropout {
    pub fn new(prob: f64) -> Self {
        Self { prob }
    }

    pub fn prob(&self) -> f64 {
        self.prob
    }

    /// Applies the forward pass on the input tensor.
    ///
    /// # Shapes
    ///
    /// - input: `[..., any]`
    /// - output: `[..., any]`
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
        mode: Mode,
    ) -> Tensor<B, D> {
        let seed = match mode {
            Mode::Training { seed } if self.prob > 0.0 => seed,
            _ => return input,
        };

        let dims = input.dims();
        let scale = (1.0 / (1.0 - self.prob)) as f32;
        let mut rng = StdRng::seed_from_u64(seed);
        let mask: Vec<f32> = (0..dims.iter().product::<usize>())
            .map(|_| {
                if rng.gen_bool(self.prob) {
                    0.0
                } else {
                    scale
                }
            })
            .collect();

        let mask = Tensor::<B, D>::from_data(
            TensorData::new(mask, dims).convert::<B::FloatElem>(),
            &input.device(),
        );

        input.mul(mask)
    }
}
