use std::path::PathBuf;

use burn::record::RecorderError;

/// Result type used across the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced while building, running, storing or exporting a network.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A tensor reached a stage with a shape the configuration does not allow.
    #[error("shape mismatch at {stage}: expected {expected:?}, received {actual:?}")]
    ShapeMismatch {
        stage: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The configuration cannot describe a valid network.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A loaded parameter does not match the configured topology.
    #[error("parameter `{name}` has shape {actual:?}, expected {expected:?}")]
    ParameterShape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// No parameter snapshot exists at the given location.
    #[error("parameter snapshot not found: {}", .0.display())]
    SnapshotNotFound(PathBuf),

    /// The recorder failed to store or load a snapshot.
    #[error("recorder error: {0}")]
    Record(#[from] RecorderError),

    /// The exported graph disagrees with the training-path forward pass.
    #[error(
        "exported model diverges from the network: max abs diff {max_abs_diff:e} \
         at sample {sample}, logit {logit} (tolerance {tolerance:e})"
    )]
    ConversionMismatch {
        max_abs_diff: f32,
        sample: usize,
        logit: usize,
        tolerance: f32,
    },

    /// The exported artifact is malformed.
    #[error("invalid exported artifact: {0}")]
    Artifact(String),

    /// The dataset layout on disk is unusable.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Tensor data could not be read back as `f32`.
    #[error("tensor data error: {0}")]
    Data(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bincode(#[from] bincode::Error),
}
