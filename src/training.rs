use std::fs;
use std::path::Path;
use std::sync::Arc;

use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::config::NetworkConfig;
use crate::data::{GestureBatch, GestureBatcher, GestureDataset, GestureItem};
use crate::error::{self, Error};
use crate::model::{Mode, Network};
use crate::preprocess::Preprocessor;
use crate::snapshot;

/// File name of the training configuration inside an artifacts directory.
pub const CONFIG_FILE: &str = "config.json";
/// File stem of the parameter snapshot inside an artifacts directory.
pub const MODEL_FILE: &str = "model";

#[derive(Config)]
pub struct TrainingConfig {
    pub network: NetworkConfig,
    pub optimizer: AdamConfig,
    #[config(default = 5)]
    pub num_epochs: usize,
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 1.0e-3)]
    pub learning_rate: f64,
    #[config(default = 42)]
    pub seed: u64,
    /// Share of the dataset used for training, the rest is used for validation.
    #[config(default = 0.8)]
    pub train_ratio: f64,
    /// Number of batches between two progress logs.
    #[config(default = 25)]
    pub log_interval: usize,
}

/// Mean losses of one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train_loss: f32,
    /// `None` when the validation set is empty.
    pub valid_loss: Option<f32>,
}

/// Trains `network` and returns the updated network with one summary per epoch.
///
/// The training loader reshuffles every epoch from `config.seed`, and each
/// step runs with its own dropout seed drawn from the same seed.
pub fn train<B, DT, DV>(
    config: &TrainingConfig,
    mut network: Network<B>,
    train: DT,
    valid: DV,
    device: &B::Device,
) -> error::Result<(Network<B>, Vec<EpochSummary>)>
where
    B: AutodiffBackend,
    DT: Dataset<GestureItem> + 'static,
    DV: Dataset<GestureItem> + 'static,
{
    if config.batch_size == 0 {
        return Err(Error::Config("batch size must be positive".into()));
    }
    if train.is_empty() {
        return Err(Error::Dataset("the training set is empty".into()));
    }

    let num_batches = train.len().div_ceil(config.batch_size);
    let loader = DataLoaderBuilder::new(GestureBatcher::new(config.network.input_size()))
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .set_device(device.clone())
        .build(train);
    let valid = Arc::new(valid);

    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut optim = config.optimizer.init::<B, Network<B>>();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut history = Vec::with_capacity(config.num_epochs);

    for epoch in 1..=config.num_epochs {
        let mut epoch_loss = 0.0;

        for (iteration, batch) in loader.iter().enumerate() {
            let batch: GestureBatch<B> = batch;
            let mode = Mode::Training { seed: rng.gen() };

            let logits = network.forward(batch.images, mode)?;
            let loss = loss_fn.forward(logits, batch.targets);
            let loss_value = loss.clone().into_scalar().elem::<f32>();

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &network);
            network = optim.step(config.learning_rate, network, grads);

            epoch_loss += loss_value;
            if iteration % config.log_interval.max(1) == 0 {
                log::info!(
                    "Epoch {epoch} batch {iteration}/{num_batches} Current loss: {loss_value:.4}"
                );
            }
        }

        let summary = EpochSummary {
            epoch,
            train_loss: epoch_loss / num_batches as f32,
            valid_loss: validate(config, &network.valid(), valid.clone(), device)?,
        };
        match summary.valid_loss {
            Some(valid_loss) => log::info!(
                "Epoch {epoch} Train loss: {:.4} Val loss: {valid_loss:.4}",
                summary.train_loss
            ),
            None => log::info!("Epoch {epoch} Train loss: {:.4}", summary.train_loss),
        }
        history.push(summary);
    }

    Ok((network, history))
}

/// Mean cross-entropy over the batches of `dataset`, in inference mode.
pub fn validate<B, D>(
    config: &TrainingConfig,
    network: &Network<B>,
    dataset: D,
    device: &B::Device,
) -> error::Result<Option<f32>>
where
    B: Backend,
    D: Dataset<GestureItem> + 'static,
{
    if config.batch_size == 0 {
        return Err(Error::Config("batch size must be positive".into()));
    }

    let loader = DataLoaderBuilder::new(GestureBatcher::new(config.network.input_size()))
        .batch_size(config.batch_size)
        .set_device(device.clone())
        .build(dataset);
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut total = 0.0;
    let mut count = 0;

    for batch in loader.iter() {
        let batch: GestureBatch<B> = batch;
        let logits = network.forward(batch.images, Mode::Inference)?;
        total += loss_fn
            .forward(logits, batch.targets)
            .into_scalar()
            .elem::<f32>();
        count += 1;
    }

    Ok((count > 0).then(|| total / count as f32))
}

/// Trains a fresh network on the image folder at `data_root` and writes
/// `config.json` and `model.mpk` to `artifact_dir`.
pub fn run<B: AutodiffBackend>(
    artifact_dir: &Path,
    data_root: &Path,
    config: &TrainingConfig,
    device: &B::Device,
) -> error::Result<Network<B::InnerBackend>> {
    fs::create_dir_all(artifact_dir)?;
    config.save(artifact_dir.join(CONFIG_FILE))?;

    let preprocessor = Preprocessor::new(&config.network);
    let dataset = GestureDataset::from_folder(data_root, &preprocessor)?;
    if dataset.classes().len() > config.network.num_classes {
        return Err(Error::Dataset(format!(
            "{} class directories found, the network has {} outputs",
            dataset.classes().len(),
            config.network.num_classes
        )));
    }
    let (train_set, valid_set) = dataset.split(config.train_ratio, config.seed)?;
    log::info!(
        "Training on {} images, validating on {}",
        train_set.len(),
        valid_set.len()
    );

    B::seed(config.seed);
    let network: Network<B> = config.network.init(device)?;
    let (network, _) = train(config, network, train_set, valid_set, device)?;

    let network = network.valid();
    snapshot::save(&network, artifact_dir.join(MODEL_FILE))?;

    Ok(network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::into_vec;
    use crate::TestAutodiffBackend;
    use burn::data::dataset::InMemDataset;
    use image::{GrayImage, Luma};

    fn synthetic(len: usize) -> InMemDataset<GestureItem> {
        let items = (0..len)
            .map(|index| {
                let label = index % 2;
                let value = if label == 0 { -0.8 } else { 0.8 };
                GestureItem {
                    image: vec![value; 32 * 32],
                    label,
                }
            })
            .collect();
        InMemDataset::new(items)
    }

    fn config() -> TrainingConfig {
        TrainingConfig::new(NetworkConfig::new(), AdamConfig::new())
            .with_num_epochs(1)
            .with_batch_size(4)
    }

    #[test]
    fn one_epoch_gives_finite_losses() {
        let device = Default::default();
        let network: Network<TestAutodiffBackend> = NetworkConfig::new().init(&device).unwrap();
        let before = into_vec(network.fc.weight.val()).unwrap();

        let (network, history) =
            train(&config(), network, synthetic(10), synthetic(3), &device).unwrap();

        assert_eq!(history.len(), 1);
        assert!(history[0].train_loss.is_finite());
        assert!(history[0].valid_loss.unwrap().is_finite());
        assert_ne!(into_vec(network.fc.weight.val()).unwrap(), before);
        network.check_parameters().unwrap();
    }

    #[test]
    fn empty_validation_set_has_no_loss() {
        let device = Default::default();
        let network: Network<TestAutodiffBackend> = NetworkConfig::new().init(&device).unwrap();

        let (_, history) =
            train(&config(), network, synthetic(4), synthetic(0), &device).unwrap();

        assert_eq!(history[0].valid_loss, None);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let device = Default::default();
        let network: Network<TestAutodiffBackend> = NetworkConfig::new().init(&device).unwrap();

        let result = train(
            &config().with_batch_size(0),
            network,
            synthetic(4),
            synthetic(0),
            &device,
        );

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn run_writes_reloadable_artifacts() {
        let data = tempfile::tempdir().unwrap();
        let artifacts = tempfile::tempdir().unwrap();
        for (class, value) in [("fist", 20u8), ("palm", 230u8)] {
            let dir = data.path().join(class);
            fs::create_dir(&dir).unwrap();
            for index in 0..5 {
                GrayImage::from_pixel(48, 48, Luma([value]))
                    .save(dir.join(format!("{index}.png")))
                    .unwrap();
            }
        }
        let device = Default::default();

        run::<TestAutodiffBackend>(artifacts.path(), data.path(), &config(), &device).unwrap();

        let config = TrainingConfig::load(artifacts.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.batch_size, 4);
        assert!(artifacts.path().join("model.mpk").is_file());
        snapshot::load::<crate::TestBackend, _>(
            &config.network,
            artifacts.path().join(MODEL_FILE),
            &device,
        )
        .unwrap();
    }
}
