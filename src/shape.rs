//! Static shape bookkeeping for the fixed topology.
//!
//! Every stage shape is known from the [NetworkConfig] alone, so the trace is
//! computed once and used both to validate tensors at the network boundary and
//! to size the exported graph.

use crate::config::NetworkConfig;
use crate::error::{Error, Result};

/// Shape of a single feature map, batch dimension excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl FeatureShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Number of scalars in the feature map.
    pub fn numel(&self) -> usize {
        self.channels * self.height * self.width
    }

    /// [numel](Self::numel), or `None` on overflow.
    pub fn checked_numel(&self) -> Option<usize> {
        self.channels.checked_mul(self.height)?.checked_mul(self.width)
    }

    /// Dims of a batch of this shape, `[batch, channels, height, width]`.
    pub fn with_batch(&self, batch_size: usize) -> [usize; 4] {
        [batch_size, self.channels, self.height, self.width]
    }
}

/// Output size of a valid (unpadded) convolution with stride 1.
pub fn valid_conv_output(size: usize, kernel_size: usize) -> Option<usize> {
    if kernel_size == 0 {
        return None;
    }
    size.checked_sub(kernel_size).map(|reduced| reduced + 1)
}

/// Output size of a non-overlapping max-pool.
///
/// Uses floor division: a trailing row or column that does not fill a whole
/// window is dropped.
pub fn pool_output(size: usize, window: usize) -> Option<usize> {
    if window == 0 {
        return None;
    }
    match size / window {
        0 => None,
        out => Some(out),
    }
}

/// Shapes of one convolution block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTrace {
    pub input: FeatureShape,
    pub conv: FeatureShape,
    pub pool: FeatureShape,
    /// Square convolution kernel size.
    pub kernel_size: usize,
    /// Pooling window, equal to its stride.
    pub window: usize,
}

impl BlockTrace {
    fn new(
        stage: &'static str,
        input: FeatureShape,
        channels: usize,
        kernel_size: usize,
        pool_size: usize,
    ) -> Result<Self> {
        let too_small = || {
            Error::Config(format!(
                "{stage}: a {}x{} feature map is too small for kernel {kernel_size} and pool {pool_size}",
                input.height, input.width
            ))
        };

        let conv_h = valid_conv_output(input.height, kernel_size).ok_or_else(too_small)?;
        let conv_w = valid_conv_output(input.width, kernel_size).ok_or_else(too_small)?;
        let pool_h = pool_output(conv_h, pool_size).ok_or_else(too_small)?;
        let pool_w = pool_output(conv_w, pool_size).ok_or_else(too_small)?;

        Ok(Self {
            input,
            conv: FeatureShape::new(channels, conv_h, conv_w),
            pool: FeatureShape::new(channels, pool_h, pool_w),
            kernel_size,
            window: pool_size,
        })
    }
}

/// Stage-by-stage shapes of the network for one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeTrace {
    pub input: FeatureShape,
    pub blocks: [BlockTrace; 2],
    /// Length of the flattened feature vector fed to the classifier head.
    pub features: usize,
    pub num_classes: usize,
}

impl ShapeTrace {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let size = config.input_size();
        let input = FeatureShape::new(config.in_channels, size, size);
        let [channels_1, channels_2] = config.block_channels;

        let block_1 = BlockTrace::new(
            "block1",
            input,
            channels_1,
            config.kernel_size,
            config.pool_size,
        )?;
        let block_2 = BlockTrace::new(
            "block2",
            block_1.pool,
            channels_2,
            config.kernel_size,
            config.pool_size,
        )?;

        Ok(Self {
            input,
            features: block_2.pool.numel(),
            blocks: [block_1, block_2],
            num_classes: config.num_classes,
        })
    }

    /// Shape of the feature extractor output.
    pub fn output(&self) -> FeatureShape {
        self.blocks[1].pool
    }

    /// Checks a `[batch, channels, height, width]` input against the trace.
    pub fn check_input(&self, dims: [usize; 4]) -> Result<()> {
        let [batch_size, channels, height, width] = dims;
        let expected = self.input.with_batch(batch_size);

        if batch_size == 0 || [channels, height, width] != expected[1..] {
            return Err(Error::ShapeMismatch {
                stage: "input",
                expected: expected.to_vec(),
                actual: dims.to_vec(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputVariant;
    use rstest::rstest;

    #[test]
    fn trace_32() {
        let trace = ShapeTrace::new(&NetworkConfig::new()).unwrap();

        assert_eq!(trace.input, FeatureShape::new(1, 32, 32));
        assert_eq!(trace.blocks[0].conv, FeatureShape::new(8, 30, 30));
        assert_eq!(trace.blocks[0].pool, FeatureShape::new(8, 15, 15));
        assert_eq!(trace.blocks[1].conv, FeatureShape::new(16, 13, 13));
        assert_eq!(trace.blocks[1].pool, FeatureShape::new(16, 6, 6));
        assert_eq!(trace.features, 576);
    }

    #[test]
    fn trace_64() {
        let config = NetworkConfig::new().with_input(InputVariant::Size64);
        let trace = ShapeTrace::new(&config).unwrap();

        assert_eq!(trace.blocks[0].conv, FeatureShape::new(8, 62, 62));
        assert_eq!(trace.blocks[0].pool, FeatureShape::new(8, 31, 31));
        assert_eq!(trace.blocks[1].conv, FeatureShape::new(16, 29, 29));
        assert_eq!(trace.blocks[1].pool, FeatureShape::new(16, 14, 14));
        assert_eq!(trace.features, 3136);
    }

    #[rstest]
    #[case(30, 15)]
    #[case(13, 6)]
    #[case(29, 14)]
    #[case(2, 1)]
    fn pool_truncates_odd_sizes(#[case] size: usize, #[case] expected: usize) {
        assert_eq!(pool_output(size, 2), Some(expected));
    }

    #[test]
    fn trace_keeps_the_pool_window() {
        let config = NetworkConfig::new().with_pool_size(3);
        let trace = ShapeTrace::new(&config).unwrap();

        assert_eq!(trace.blocks[1].conv, FeatureShape::new(16, 8, 8));
        assert_eq!(trace.blocks[1].pool, FeatureShape::new(16, 2, 2));
        assert_eq!(trace.blocks[1].window, 3);
        assert_eq!(trace.blocks[1].kernel_size, 3);
    }

    #[test]
    fn degenerate_sizes_are_rejected() {
        assert_eq!(valid_conv_output(2, 3), None);
        assert_eq!(pool_output(1, 2), None);
        assert_eq!(pool_output(4, 0), None);
    }

    #[test]
    fn check_input_rejects_wrong_spatial_size() {
        let trace = ShapeTrace::new(&NetworkConfig::new()).unwrap();

        assert!(trace.check_input([4, 1, 32, 32]).is_ok());
        assert!(matches!(
            trace.check_input([1, 1, 64, 64]),
            Err(Error::ShapeMismatch { stage: "input", .. })
        ));
        assert!(matches!(
            trace.check_input([1, 3, 32, 32]),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(trace.check_input([0, 1, 32, 32]).is_err());
    }
}
