use std::path::Path;

use burn::config::Config;
use burn::tensor::{backend::Backend, Tensor};
use image::DynamicImage;

use crate::config::{NetworkConfig, GESTURES};
use crate::error::{Error, Result};
use crate::model::{into_vec, Mode, Network};
use crate::preprocess::Preprocessor;
use crate::snapshot;
use crate::training::{TrainingConfig, CONFIG_FILE, MODEL_FILE};

/// Result of classifying one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Index of the highest logit.
    pub class: usize,
    /// Raw class logits.
    pub logits: Vec<f32>,
}

impl Prediction {
    /// Picks the first maximum of `logits`.
    pub fn new(logits: Vec<f32>) -> Result<Self> {
        let class = argmax(&logits)
            .ok_or_else(|| Error::Data("the network produced no logits".into()))?;
        Ok(Self { class, logits })
    }

    /// Gesture name of the predicted class.
    pub fn label(&self) -> Option<&'static str> {
        GESTURES.get(self.class).copied()
    }
}

/// Index of the first maximum.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (index, value)| match best {
            Some((_, max)) if *value <= max => best,
            _ => Some((index, *value)),
        })
        .map(|(index, _)| index)
}

/// A frozen network together with the preprocessing it was trained with.
#[derive(Debug, Clone)]
pub struct Classifier<B: Backend> {
    network: Network<B>,
    preprocessor: Preprocessor,
    device: B::Device,
}

impl<B: Backend> Classifier<B> {
    pub fn new(network: Network<B>, config: &NetworkConfig, device: B::Device) -> Self {
        Self {
            network,
            preprocessor: Preprocessor::new(config),
            device,
        }
    }

    /// Loads `config.json` and the parameter snapshot of a training run.
    pub fn load(artifact_dir: &Path, device: B::Device) -> Result<Self> {
        let config = TrainingConfig::load(artifact_dir.join(CONFIG_FILE))
            .map_err(|err| Error::Config(format!("{err}")))?;
        let network = snapshot::load(&config.network, artifact_dir.join(MODEL_FILE), &device)?;

        Ok(Self::new(network, &config.network, device))
    }

    pub fn network(&self) -> &Network<B> {
        &self.network
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Classifies a decoded image.
    pub fn predict(&self, image: &DynamicImage) -> Result<Prediction> {
        self.predict_values(self.preprocessor.to_vec(image))
    }

    /// Classifies a raw 8-bit grayscale frame.
    pub fn predict_frame(&self, pixels: &[u8], width: u32, height: u32) -> Result<Prediction> {
        self.predict_values(self.preprocessor.frame_to_vec(pixels, width, height)?)
    }

    /// Classifies several images in one forward pass.
    pub fn predict_batch(&self, images: &[DynamicImage]) -> Result<Vec<Prediction>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let inputs = images
            .iter()
            .map(|image| self.preprocessor.to_tensor(image, &self.device))
            .collect();
        let logits = self
            .network
            .forward(Tensor::cat(inputs, 0), Mode::Inference)?;
        let num_classes = logits.dims()[1];

        into_vec(logits)?
            .chunks(num_classes)
            .map(|logits| Prediction::new(logits.to_vec()))
            .collect()
    }

    fn predict_values(&self, values: Vec<f32>) -> Result<Prediction> {
        let input = self.preprocessor.tensor_from_vec(values, &self.device);
        let logits = self.network.forward(input, Mode::Inference)?;

        Prediction::new(into_vec(logits)?)
    }
}
