//! Hand-gesture classifier: the network, its preprocessing contract, training,
//! parameter snapshots and the frozen export used by embedded deployments.

pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod inference;
pub mod model;
pub mod preprocess;
pub mod shape;
pub mod snapshot;
pub mod training;

pub use config::{InputVariant, Interpolation, NetworkConfig, GESTURES, NUM_CLASSES};
pub use error::{Error, Result};
pub use model::{Mode, Network};
pub use preprocess::Preprocessor;

/// Backend for test cases
#[cfg(test)]
pub type TestBackend = burn::backend::NdArray<f32>;

/// Backend for autodiff test cases
#[cfg(test)]
pub type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;

#[cfg(test)]
pub(crate) mod test_utils {
    use burn::module::Param;
    use burn::tensor::{backend::Backend, Tensor, TensorData};

    use crate::{Network, NetworkConfig, TestBackend};

    /// A 32×32 network whose logits for a constant -1 input can be computed by
    /// hand: block 1 rectifies to zero, block 2 propagates its 0.5 bias and the
    /// head weights are `0.01 * (class + 1)` with bias `class`.
    pub fn known_network(device: &<TestBackend as Backend>::Device) -> Network<TestBackend> {
        let mut network: Network<TestBackend> = NetworkConfig::new().init(device).unwrap();

        network.block1.conv.weight = Param::from_tensor(Tensor::full([8, 1, 3, 3], 0.1, device));
        network.block1.conv.bias = Some(Param::from_tensor(Tensor::zeros([8], device)));
        network.block2.conv.weight =
            Param::from_tensor(Tensor::full([16, 8, 3, 3], 0.05, device));
        network.block2.conv.bias = Some(Param::from_tensor(Tensor::full([16], 0.5, device)));

        let weight: Vec<f32> = (0..576)
            .flat_map(|_| (0..14).map(|class| 0.01 * (class as f32 + 1.0)))
            .collect();
        let bias: Vec<f32> = (0..14).map(|class| class as f32).collect();
        network.fc.weight = Param::from_tensor(Tensor::from_data(
            TensorData::new(weight, [576, 14]),
            device,
        ));
        network.fc.bias = Some(Param::from_tensor(Tensor::from_data(
            TensorData::new(bias, [14]),
            device,
        )));

        network
    }
}
