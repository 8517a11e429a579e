use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::config::Config;
use burn::optim::AdamConfig;
use clap::{Parser, Subcommand};
use gesture_net::export::{self, ExportedModel};
use gesture_net::inference::Classifier;
use gesture_net::training::{self, TrainingConfig, CONFIG_FILE, MODEL_FILE};
use gesture_net::{snapshot, InputVariant, Interpolation, NetworkConfig};
use tracing_subscriber::EnvFilter;

#[cfg(not(feature = "wgpu"))]
mod backend {
    pub type Backend = burn::backend::NdArray<f32>;
}

#[cfg(feature = "wgpu")]
mod backend {
    pub type Backend = burn::backend::Wgpu;
}

type Backend = backend::Backend;
type AutodiffBackend = burn::backend::Autodiff<Backend>;

/// Train, export and run the hand-gesture classifier.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a network on an image folder with one sub-directory per class.
    Train {
        /// Root of the image folder.
        #[arg(long)]
        data: PathBuf,
        /// Directory receiving config.json and model.mpk.
        #[arg(long, default_value = "artifacts")]
        artifacts: PathBuf,
        /// Input size, 32 or 64.
        #[arg(long, default_value_t = 32)]
        input_size: usize,
        #[arg(long, default_value_t = 5)]
        epochs: usize,
        #[arg(long, default_value_t = 64)]
        batch_size: usize,
        #[arg(long, default_value_t = 1e-3)]
        learning_rate: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Resize with nearest neighbour instead of bilinear.
        #[arg(long)]
        nearest: bool,
    },
    /// Freeze a trained network into a deployment artifact.
    Export {
        #[arg(long, default_value = "artifacts")]
        artifacts: PathBuf,
        /// Output file of the exported model.
        #[arg(long, default_value = "model.gnet")]
        output: PathBuf,
        /// Number of random inputs compared against the network.
        #[arg(long, default_value_t = 16)]
        samples: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Also write include/model.h and main/model.c below this directory.
        #[arg(long)]
        c_dir: Option<PathBuf>,
    },
    /// Classify images with a trained network.
    Predict {
        #[arg(long, default_value = "artifacts")]
        artifacts: PathBuf,
        /// Use this exported model instead of the artifacts directory.
        #[arg(long)]
        exported: Option<PathBuf>,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Write a 96x96 grayscale sample image as C sources.
    SampleImage {
        image: PathBuf,
        /// Receives include/mock_image.h and main/mock_image.c.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

enum Predictor {
    Network(Classifier<Backend>),
    Exported(ExportedModel),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let device = Default::default();

    match args.command {
        Command::Train {
            data,
            artifacts,
            input_size,
            epochs,
            batch_size,
            learning_rate,
            seed,
            nearest,
        } => {
            let interpolation = if nearest {
                Interpolation::Nearest
            } else {
                Interpolation::Bilinear
            };
            let network = NetworkConfig::new()
                .with_input(InputVariant::try_from(input_size)?)
                .with_interpolation(interpolation);
            let config = TrainingConfig::new(network, AdamConfig::new())
                .with_num_epochs(epochs)
                .with_batch_size(batch_size)
                .with_learning_rate(learning_rate)
                .with_seed(seed);

            training::run::<AutodiffBackend>(&artifacts, &data, &config, &device)
                .with_context(|| format!("training on {} failed", data.display()))?;
        }
        Command::Export {
            artifacts,
            output,
            samples,
            seed,
            c_dir,
        } => {
            let config = TrainingConfig::load(artifacts.join(CONFIG_FILE))
                .with_context(|| format!("no training config in {}", artifacts.display()))?;
            let network = snapshot::load::<Backend, _>(
                &config.network,
                artifacts.join(MODEL_FILE),
                &device,
            )?;

            let exported = export::export(&network, config.network.interpolation)?;
            export::verify(&network, &exported, samples, seed, &device)
                .context("the exported model is invalid")?;
            exported.save(&output)?;

            if let Some(c_dir) = c_dir {
                export::model_data(&exported.to_bytes()?)
                    .write(&c_dir.join("include"), &c_dir.join("main"))?;
            }
        }
        Command::Predict {
            artifacts,
            exported,
            images,
        } => {
            let predictor = match exported {
                Some(path) => Predictor::Exported(
                    ExportedModel::load(&path)
                        .with_context(|| format!("cannot load {}", path.display()))?,
                ),
                None => Predictor::Network(
                    Classifier::<Backend>::load(&artifacts, device)
                        .with_context(|| format!("cannot load {}", artifacts.display()))?,
                ),
            };

            for path in images {
                let image = image::open(&path)
                    .with_context(|| format!("cannot read {}", path.display()))?;
                let prediction = match &predictor {
                    Predictor::Exported(exported) => exported.predict(&image)?,
                    Predictor::Network(classifier) => classifier.predict(&image)?,
                };
                println!(
                    "{}: {} ({})",
                    path.display(),
                    prediction.label().unwrap_or("unknown"),
                    prediction.class
                );
            }
        }
        Command::SampleImage { image, out_dir } => {
            let decoded = image::open(&image)
                .with_context(|| format!("cannot read {}", image.display()))?;
            let sample = export::sample_image(&decoded);
            export::mock_image(&sample)?.write(&out_dir.join("include"), &out_dir.join("main"))?;
        }
    }

    Ok(())
}
