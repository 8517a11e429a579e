use burn::config::Config;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::error::{self, Error};
use crate::shape::ShapeTrace;

/// Number of gesture classes produced by the classifier head.
pub const NUM_CLASSES: usize = 14;

/// Class names, indexed by logit position.
pub const GESTURES: [&str; NUM_CLASSES] = [
    "fist",
    "1 finger",
    "2 fingers",
    "3 fingers",
    "4 fingers",
    "palm",
    "phone",
    "mouth",
    "open mouth",
    "ok",
    "pinky",
    "rock1",
    "rock2",
    "stop",
];

/// Side length of the grayscale sample image embedded in firmware builds.
pub const SAMPLE_IMAGE_SIZE: usize = 96;

/// Canonical square input size of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputVariant {
    /// 32×32 input, 576 flattened features.
    Size32,
    /// 64×64 input, 3136 flattened features.
    Size64,
}

impl InputVariant {
    /// Side length in pixels.
    pub fn size(self) -> usize {
        match self {
            InputVariant::Size32 => 32,
            InputVariant::Size64 => 64,
        }
    }
}

impl TryFrom<usize> for InputVariant {
    type Error = Error;

    fn try_from(size: usize) -> error::Result<Self> {
        match size {
            32 => Ok(InputVariant::Size32),
            64 => Ok(InputVariant::Size64),
            other => Err(Error::Config(format!(
                "unsupported input size {other}, expected 32 or 64"
            ))),
        }
    }
}

/// Interpolation used when resizing images to the network input.
///
/// Training and deployment must agree on this value; it is stored with the
/// network configuration so both sides read it from the same place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    /// Nearest neighbour, the cheapest option on microcontrollers.
    Nearest,
    /// Bilinear (triangle filter).
    Bilinear,
}

impl Interpolation {
    pub(crate) fn filter(self) -> FilterType {
        match self {
            Interpolation::Nearest => FilterType::Nearest,
            Interpolation::Bilinear => FilterType::Triangle,
        }
    }
}

/// Configuration to create a [Network](crate::model::Network) using the
/// [init function](NetworkConfig::init).
#[derive(Config, Debug)]
pub struct NetworkConfig {
    /// Input variant. Default: 32×32
    #[config(default = "InputVariant::Size32")]
    pub input: InputVariant,
    /// Channels of the input image. Default: 1
    #[config(default = 1)]
    pub in_channels: usize,
    /// Output channels of the two convolution blocks. Default: [8, 16]
    #[config(default = "[8, 16]")]
    pub block_channels: [usize; 2],
    /// Square convolution kernel size. Default: 3
    #[config(default = 3)]
    pub kernel_size: usize,
    /// Max-pooling window and stride. Default: 2
    #[config(default = 2)]
    pub pool_size: usize,
    /// Number of output logits. Default: 14
    #[config(default = 14)]
    pub num_classes: usize,
    /// Dropout probability of the classifier head. Default: 0.5
    #[config(default = 0.5)]
    pub dropout: f64,
    /// Channel normalization epsilon. Default: 1e-5
    #[config(default = 1e-5)]
    pub norm_epsilon: f64,
    /// Momentum of the running statistics update. Default: 0.1
    #[config(default = 0.1)]
    pub norm_momentum: f64,
    /// Resize method of the preprocessor. Default: bilinear
    #[config(default = "Interpolation::Bilinear")]
    pub interpolation: Interpolation,
}

impl NetworkConfig {
    /// Side length of the square input.
    pub fn input_size(&self) -> usize {
        self.input.size()
    }

    /// Shapes of every stage for this configuration.
    pub fn shape_trace(&self) -> error::Result<ShapeTrace> {
        ShapeTrace::new(self)
    }

    /// Checks that the configuration describes a buildable network.
    pub fn validate(&self) -> error::Result<ShapeTrace> {
        if self.in_channels == 0 || self.block_channels.contains(&0) {
            return Err(Error::Config("channel counts must be positive".into()));
        }
        if self.num_classes == 0 {
            return Err(Error::Config("at least one class is required".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config(format!(
                "dropout probability {} is outside [0, 1)",
                self.dropout
            )));
        }
        if self.norm_epsilon <= 0.0 {
            return Err(Error::Config("normalization epsilon must be positive".into()));
        }
        self.shape_trace()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_topology() {
        let config = NetworkConfig::new();

        assert_eq!(config.input_size(), 32);
        assert_eq!(config.in_channels, 1);
        assert_eq!(config.block_channels, [8, 16]);
        assert_eq!(config.kernel_size, 3);
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.num_classes, NUM_CLASSES);
        assert_eq!(config.dropout, 0.5);
        assert_eq!(config.interpolation, Interpolation::Bilinear);
    }

    #[test]
    fn input_variant_from_size() {
        assert_eq!(InputVariant::try_from(32).unwrap(), InputVariant::Size32);
        assert_eq!(InputVariant::try_from(64).unwrap(), InputVariant::Size64);
        assert!(matches!(InputVariant::try_from(48), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_invalid_dropout() {
        let config = NetworkConfig::new().with_dropout(1.0);

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = NetworkConfig::new()
            .with_input(InputVariant::Size64)
            .with_interpolation(Interpolation::Nearest);
        let json = config.to_string();
        let decoded: NetworkConfig = NetworkConfig::load_binary(json.as_bytes()).unwrap();

        assert_eq!(decoded.input, InputVariant::Size64);
        assert_eq!(decoded.interpolation, Interpolation::Nearest);
        assert_eq!(decoded.block_channels, config.block_channels);
    }
}
