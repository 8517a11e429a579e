use std::path::Path;
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::transform::{PartialDataset, ShuffledDataset};
use burn::data::dataset::vision::{Annotation, ImageDatasetItem, ImageFolderDataset, PixelDepth};
use burn::data::dataset::{Dataset, InMemDataset};
use burn::prelude::*;
use image::{DynamicImage, ImageBuffer, Luma, LumaA, Rgb, Rgba};

use crate::error::{Error, Result};
use crate::preprocess::Preprocessor;

/// A preprocessed sample: `size * size` normalized pixels and a class index.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureItem {
    pub image: Vec<f32>,
    pub label: usize,
}

/// One side of a [GestureDataset::split].
pub type GestureSplit =
    PartialDataset<Arc<ShuffledDataset<InMemDataset<GestureItem>, GestureItem>>, GestureItem>;

/// Labelled gesture images, one sub-directory per class.
///
/// Discovery and labelling follow [ImageFolderDataset]: classes are the
/// directories holding at least one supported image, indexed in lexicographic
/// order, and images are visited in path order. Every image is preprocessed
/// once when the dataset is built.
pub struct GestureDataset {
    items: InMemDataset<GestureItem>,
    classes: Vec<String>,
}

impl Dataset<GestureItem> for GestureDataset {
    fn get(&self, index: usize) -> Option<GestureItem> {
        self.items.get(index)
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

impl GestureDataset {
    /// Creates a dataset from already preprocessed items.
    pub fn new(items: Vec<GestureItem>, classes: Vec<String>) -> Self {
        Self {
            items: InMemDataset::new(items),
            classes,
        }
    }

    /// Loads an image folder laid out as `root/<class>/<image>`.
    pub fn from_folder<P: AsRef<Path>>(root: P, preprocessor: &Preprocessor) -> Result<Self> {
        let root = root.as_ref();
        let folder = ImageFolderDataset::new_classification(root)
            .map_err(|err| Error::Dataset(format!("{}: {err}", root.display())))?;

        if folder.is_empty() {
            return Err(Error::Dataset(format!(
                "no images found in {}",
                root.display()
            )));
        }

        let mut items = Vec::with_capacity(folder.len());
        let mut classes: Vec<String> = Vec::new();

        for item in folder.iter() {
            let label = match item.annotation {
                Annotation::Label(label) => label,
                ref other => {
                    return Err(Error::Dataset(format!(
                        "{} is annotated with {other:?}, expected a class label",
                        item.image_path
                    )))
                }
            };

            if classes.len() <= label {
                classes.resize(label + 1, String::new());
                classes[label] = class_name(Path::new(&item.image_path));
                log::debug!("Class {label} ({})", classes[label]);
            }

            let image = decoded_image(&item)?;
            items.push(GestureItem {
                image: preprocessor.to_vec(&image),
                label,
            });
        }

        log::info!(
            "Loaded {} images in {} classes from {}",
            items.len(),
            classes.len(),
            root.display()
        );

        Ok(Self::new(items, classes))
    }

    /// Class names in label order.
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Shuffles the items with `seed` and splits them into a training part of
    /// `floor(ratio * len)` items and a validation part with the rest.
    pub fn split(self, ratio: f64, seed: u64) -> Result<(GestureSplit, GestureSplit)> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(Error::Config(format!(
                "split ratio {ratio} is outside [0, 1]"
            )));
        }

        let len = self.items.len();
        let train_len = (ratio * len as f64) as usize;
        let shuffled = Arc::new(ShuffledDataset::with_seed(self.items, seed));

        Ok((
            PartialDataset::new(shuffled.clone(), 0, train_len),
            PartialDataset::new(shuffled, train_len, len),
        ))
    }
}

fn class_name(image_path: &Path) -> String {
    image_path
        .parent()
        .and_then(|dir| dir.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Rebuilds the decoded image of a dataset item.
///
/// The item only carries the samples, so the dimensions are read back from the
/// image header.
fn decoded_image(item: &ImageDatasetItem) -> Result<DynamicImage> {
    let (width, height) = image::image_dimensions(&item.image_path)?;
    let area = width as usize * height as usize;
    let invalid = || {
        Error::Dataset(format!(
            "{} has {} samples for a {width}x{height} image",
            item.image_path,
            item.image.len()
        ))
    };

    if area == 0 || item.image.len() % area != 0 {
        return Err(invalid());
    }
    let channels = item.image.len() / area;

    let image = match item.image.first() {
        Some(PixelDepth::U8(_)) => {
            let raw = samples::<u8>(&item.image)?;
            match channels {
                1 => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, raw)
                    .map(DynamicImage::ImageLuma8),
                2 => ImageBuffer::<LumaA<u8>, _>::from_raw(width, height, raw)
                    .map(DynamicImage::ImageLumaA8),
                3 => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, raw)
                    .map(DynamicImage::ImageRgb8),
                4 => ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, raw)
                    .map(DynamicImage::ImageRgba8),
                _ => None,
            }
        }
        Some(PixelDepth::U16(_)) => {
            let raw = samples::<u16>(&item.image)?;
            match channels {
                1 => ImageBuffer::<Luma<u16>, _>::from_raw(width, height, raw)
                    .map(DynamicImage::ImageLuma16),
                2 => ImageBuffer::<LumaA<u16>, _>::from_raw(width, height, raw)
                    .map(DynamicImage::ImageLumaA16),
                3 => ImageBuffer::<Rgb<u16>, _>::from_raw(width, height, raw)
                    .map(DynamicImage::ImageRgb16),
                4 => ImageBuffer::<Rgba<u16>, _>::from_raw(width, height, raw)
                    .map(DynamicImage::ImageRgba16),
                _ => None,
            }
        }
        Some(PixelDepth::F32(_)) => {
            let raw = samples::<f32>(&item.image)?;
            match channels {
                3 => ImageBuffer::<Rgb<f32>, _>::from_raw(width, height, raw)
                    .map(DynamicImage::ImageRgb32F),
                4 => ImageBuffer::<Rgba<f32>, _>::from_raw(width, height, raw)
                    .map(DynamicImage::ImageRgba32F),
                _ => None,
            }
        }
        None => None,
    };

    image.ok_or_else(invalid)
}

fn samples<T>(pixels: &[PixelDepth]) -> Result<Vec<T>>
where
    T: TryFrom<PixelDepth, Error = &'static str>,
{
    pixels
        .iter()
        .cloned()
        .map(|pixel| T::try_from(pixel).map_err(|err| Error::Dataset(err.to_string())))
        .collect()
}

/// A batch of network inputs and their class indices.
#[derive(Clone, Debug)]
pub struct GestureBatch<B: Backend> {
    /// `[batch_size, 1, size, size]`
    pub images: Tensor<B, 4>,
    /// `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks preprocessed items into a [GestureBatch].
#[derive(Clone, Debug)]
pub struct GestureBatcher {
    size: usize,
}

impl GestureBatcher {
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

impl<B: Backend> Batcher<B, GestureItem, GestureBatch<B>> for GestureBatcher {
    fn batch(&self, items: Vec<GestureItem>, device: &B::Device) -> GestureBatch<B> {
        let batch_size = items.len();
        let targets: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let images: Vec<f32> = items.into_iter().flat_map(|item| item.image).collect();

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(images, [batch_size, 1, self.size, self.size])
                .convert::<B::FloatElem>(),
            device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(targets, [batch_size]).convert::<B::IntElem>(),
            device,
        );

        GestureBatch { images, targets }
    }
}
