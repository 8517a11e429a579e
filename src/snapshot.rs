//! Parameter snapshots.
//!
//! A snapshot is the named record of every parameter and running statistic of a
//! [Network] (`block1.conv.weight`, `block1.norm.running_mean`, ..., `fc.bias`),
//! stored with burn's named MessagePack recorder at full precision.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::model::Network;

/// Recorder used for every snapshot.
pub type SnapshotRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// File the recorder writes for `path`.
pub fn snapshot_file<P: AsRef<Path>>(path: P) -> PathBuf {
    path.as_ref().with_extension("mpk")
}

/// Saves the parameters of `network` and returns the written file.
pub fn save<B: Backend, P: AsRef<Path>>(network: &Network<B>, path: P) -> Result<PathBuf> {
    let file = snapshot_file(&path);
    network
        .clone()
        .save_file(path.as_ref().to_path_buf(), &SnapshotRecorder::new())?;

    log::info!("Saved parameter snapshot to {}", file.display());
    Ok(file)
}

/// Builds a network for `config` and replaces its parameters with the snapshot
/// at `path`.
///
/// Fails if the snapshot is missing, unreadable, or does not match the
/// configured topology.
pub fn load<B: Backend, P: AsRef<Path>>(
    config: &NetworkConfig,
    path: P,
    device: &B::Device,
) -> Result<Network<B>> {
    let file = snapshot_file(&path);
    if !file.is_file() {
        return Err(Error::SnapshotNotFound(file));
    }

    let network: Network<B> = config.init(device)?;
    let network =
        network.load_file(path.as_ref().to_path_buf(), &SnapshotRecorder::new(), device)?;
    network.check_parameters()?;

    log::info!("Loaded parameter snapshot from {}", file.display());
    Ok(network)
}
