use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::ExportedModel;
use crate::error::{Error, Result};
use crate::model::{into_vec, Mode, Network};

/// Absolute tolerance of the equivalence check.
pub const ABSOLUTE_TOLERANCE: f32 = 1e-5;
/// Relative tolerance of the equivalence check.
pub const RELATIVE_TOLERANCE: f32 = 1e-5;

/// Outcome of a successful equivalence check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verification {
    pub samples: usize,
    pub max_abs_diff: f32,
}

/// Element-wise `|actual - expected| <= atol + rtol * |expected|`.
pub fn allclose(actual: f32, expected: f32) -> bool {
    (actual - expected).abs() <= ABSOLUTE_TOLERANCE + RELATIVE_TOLERANCE * expected.abs()
}

/// Compares the exported graph with the inference forward pass of `network`
/// on `samples` uniform random inputs in `[-1, 1]`.
///
/// At least one sample is required.
pub fn verify<B: Backend>(
    network: &Network<B>,
    exported: &ExportedModel,
    samples: usize,
    seed: u64,
    device: &B::Device,
) -> Result<Verification> {
    let mut rng = StdRng::seed_from_u64(seed);
    let inputs = (0..samples)
        .map(|_| {
            (0..exported.input_len())
                .map(|_| rng.gen_range(-1.0f32..=1.0))
                .collect()
        })
        .collect::<Vec<Vec<f32>>>();

    verify_inputs(network, exported, &inputs, device)
}

/// Compares the exported graph with the inference forward pass of `network`
/// on the given preprocessed inputs.
///
/// Fails with [Error::ConversionMismatch] on the first sample outside the
/// tolerance, and with [Error::Config] when `inputs` is empty.
pub fn verify_inputs<B: Backend>(
    network: &Network<B>,
    exported: &ExportedModel,
    inputs: &[Vec<f32>],
    device: &B::Device,
) -> Result<Verification> {
    if inputs.is_empty() {
        return Err(Error::Config(
            "the equivalence check needs at least one input".into(),
        ));
    }

    let size = exported.input_size;
    let mut max_abs_diff = 0.0f32;

    for (sample, input) in inputs.iter().enumerate() {
        let actual = exported.run(input)?;
        let data = TensorData::new(input.clone(), [1, exported.in_channels, size, size]);
        let tensor = Tensor::<B, 4>::from_data(data.convert::<B::FloatElem>(), device);
        let expected = into_vec(network.forward(tensor, Mode::Inference)?)?;

        for (logit, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
            let diff = (a - e).abs();
            max_abs_diff = max_abs_diff.max(diff);
            if !allclose(*a, *e) {
                log::warn!("Exported model diverges at sample {sample}, logit {logit}: {a} != {e}");
                return Err(Error::ConversionMismatch {
                    max_abs_diff: diff,
                    sample,
                    logit,
                    tolerance: ABSOLUTE_TOLERANCE + RELATIVE_TOLERANCE * e.abs(),
                });
            }
        }
    }

    log::info!(
        "Inference results of the network and the exported model are within tolerance \
         ({} samples, max abs diff {max_abs_diff:e})",
        inputs.len()
    );

    Ok(Verification {
        samples: inputs.len(),
        max_abs_diff,
    })
}
