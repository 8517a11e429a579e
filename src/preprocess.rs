//! Image preprocessing shared by training and deployment.
//!
//! Any decoded image goes through the same three steps, in this order:
//! grayscale conversion, resize to the network input size, then normalization
//! of every pixel to `(p / 255 - 0.5) / 0.5`, i.e. `[-1, 1]`.

use std::path::Path;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::{imageops, DynamicImage, GrayImage};

use crate::config::{Interpolation, NetworkConfig};
use crate::error::{Error, Result};

const MEAN: f32 = 0.5;
const STD: f32 = 0.5;

/// ITU-R BT.601 luma of an 8-bit RGB pixel, in 16.16 fixed point.
///
/// `Y = (19595 R + 38470 G + 7471 B + 32768) >> 16`
pub fn luma_bt601(red: u8, green: u8, blue: u8) -> u8 {
    let luma = 19595 * red as u32 + 38470 * green as u32 + 7471 * blue as u32 + 32768;
    (luma >> 16) as u8
}

/// Maps an 8-bit intensity to the normalized network range.
pub fn normalize_pixel(pixel: u8) -> f32 {
    (pixel as f32 / 255.0 - MEAN) / STD
}

/// Converts an image to 8-bit grayscale.
///
/// Single-channel images are used as-is (16-bit gray is reduced to 8 bit);
/// color images go through [luma_bt601]. Alpha is ignored.
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    match image {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageLumaA16(_) => image.to_luma8(),
        _ => {
            let rgb = image.to_rgb8();
            GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let [red, green, blue] = rgb.get_pixel(x, y).0;
                image::Luma([luma_bt601(red, green, blue)])
            })
        }
    }
}

/// Turns images into network inputs for one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preprocessor {
    size: u32,
    interpolation: Interpolation,
}

impl Preprocessor {
    pub fn new(config: &NetworkConfig) -> Self {
        Self::with_size(config.input_size(), config.interpolation)
    }

    /// Preprocessor producing `size * size` inputs.
    pub fn with_size(size: usize, interpolation: Interpolation) -> Self {
        Self {
            size: size as u32,
            interpolation,
        }
    }

    /// Side length of the produced square input.
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Grayscale and resize, without normalization.
    pub fn gray(&self, image: &DynamicImage) -> GrayImage {
        self.resize(to_grayscale(image))
    }

    /// Normalized pixels in row-major order, `size * size` values.
    pub fn to_vec(&self, image: &DynamicImage) -> Vec<f32> {
        self.gray(image).pixels().map(|p| normalize_pixel(p.0[0])).collect()
    }

    /// Preprocesses an image into a `[1, 1, size, size]` tensor.
    pub fn to_tensor<B: Backend>(&self, image: &DynamicImage, device: &B::Device) -> Tensor<B, 4> {
        self.tensor_from_vec(self.to_vec(image), device)
    }

    /// Preprocesses a raw 8-bit grayscale frame buffer of any size.
    ///
    /// The buffer must hold exactly `width * height` pixels.
    pub fn frame_to_vec(&self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<f32>> {
        let mismatch = || Error::ShapeMismatch {
            stage: "frame",
            expected: vec![height as usize, width as usize],
            actual: vec![pixels.len()],
        };
        if (width as usize).checked_mul(height as usize) != Some(pixels.len()) {
            return Err(mismatch());
        }
        let frame = GrayImage::from_raw(width, height, pixels.to_vec()).ok_or_else(mismatch)?;

        Ok(self
            .resize(frame)
            .pixels()
            .map(|p| normalize_pixel(p.0[0]))
            .collect())
    }

    /// Opens and preprocesses an image file.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<Vec<f32>> {
        let image = image::open(path)?;
        Ok(self.to_vec(&image))
    }

    pub(crate) fn tensor_from_vec<B: Backend>(
        &self,
        values: Vec<f32>,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        let size = self.size();
        let data = TensorData::new(values, [1, 1, size, size]).convert::<B::FloatElem>();

        Tensor::from_data(data, device)
    }

    fn resize(&self, gray: GrayImage) -> GrayImage {
        if gray.width() == self.size && gray.height() == self.size {
            return gray;
        }
        imageops::resize(&gray, self.size, self.size, self.interpolation.filter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputVariant;
    use crate::TestBackend;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn luma_fixed_points() {
        assert_eq!(luma_bt601(0, 0, 0), 0);
        assert_eq!(luma_bt601(255, 255, 255), 255);
        assert_eq!(luma_bt601(255, 0, 0), 76);
        assert_eq!(luma_bt601(0, 255, 0), 150);
        assert_eq!(luma_bt601(0, 0, 255), 29);
    }

    #[test]
    fn normalization_range() {
        assert_eq!(normalize_pixel(0), -1.0);
        assert_eq!(normalize_pixel(255), 1.0);
        assert!(normalize_pixel(128).abs() < 0.01);
    }

    #[test]
    fn black_image_becomes_constant_minus_one() {
        let preprocessor = Preprocessor::new(&NetworkConfig::new());
        let image = DynamicImage::ImageRgb8(RgbImage::new(100, 80));

        let values = preprocessor.to_vec(&image);

        assert_eq!(values.len(), 32 * 32);
        assert!(values.iter().all(|v| *v == -1.0));
    }

    #[test]
    fn alpha_is_ignored() {
        let preprocessor = Preprocessor::new(&NetworkConfig::new());
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 40, Rgba([255, 255, 255, 0])));

        let values = preprocessor.to_vec(&image);

        assert!(values.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn gray_images_are_used_as_is() {
        let gray = GrayImage::from_fn(32, 32, |x, y| image::Luma([(x * 8 + y) as u8]));
        let preprocessor = Preprocessor::new(&NetworkConfig::new());

        let output = preprocessor.gray(&DynamicImage::ImageLuma8(gray.clone()));

        assert_eq!(output, gray);
    }

    #[test]
    fn color_uses_bt601() {
        let preprocessor = Preprocessor::new(&NetworkConfig::new());
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([255, 0, 0])));

        let gray = preprocessor.gray(&image);

        assert!(gray.pixels().all(|p| p.0[0] == 76));
    }

    #[test]
    fn tensor_has_network_input_shape() {
        let device = Default::default();
        let config = NetworkConfig::new().with_input(InputVariant::Size64);
        let preprocessor = Preprocessor::new(&config);
        let image = DynamicImage::ImageRgb8(RgbImage::new(120, 90));

        let tensor = preprocessor.to_tensor::<TestBackend>(&image, &device);

        assert_eq!(tensor.dims(), [1, 1, 64, 64]);
    }

    #[test]
    fn nearest_and_bilinear_agree_on_flat_images() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 50, Rgb([90, 90, 90])));
        let bilinear = Preprocessor::new(&NetworkConfig::new());
        let nearest =
            Preprocessor::new(&NetworkConfig::new().with_interpolation(Interpolation::Nearest));

        assert_eq!(bilinear.to_vec(&image), nearest.to_vec(&image));
    }

    #[test]
    fn frame_buffer_of_wrong_length_is_rejected() {
        let preprocessor = Preprocessor::new(&NetworkConfig::new());

        assert!(preprocessor.frame_to_vec(&[0; 10], 4, 4).is_err());
        assert!(matches!(
            preprocessor.frame_to_vec(&[0; 17], 4, 4),
            Err(Error::ShapeMismatch { stage: "frame", .. })
        ));
        assert_eq!(
            preprocessor.frame_to_vec(&[255; 96 * 96], 96, 96).unwrap(),
            vec![1.0; 32 * 32]
        );
    }
}
