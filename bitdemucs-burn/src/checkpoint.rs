//! Checkpoint management.
//!
//! A checkpoint directory holds the model configuration as `config.json` and the weights in
//! burn's named MessagePack format (`model.mpk`), at full precision.

use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Device},
};
use tracing::info;

use crate::error::{BitDemucsError, Result};
use crate::model::{BitDemucs, BitDemucsConfig};

const CONFIG_FILE: &str = "config.json";
const MODEL_FILE: &str = "model";

/// Save the model and the configuration it was built from into `dir`, creating it if needed.
///
/// Returns the path of the weights file.
pub fn save_checkpoint<B: Backend, P: AsRef<Path>>(
    model: &BitDemucs<B>,
    dir: P,
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    model.config().save(dir.join(CONFIG_FILE))?;

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model.clone().save_file(dir.join(MODEL_FILE), &recorder)?;

    // burn appends .mpk extension
    let path = dir.join(MODEL_FILE).with_extension("mpk");
    info!(path = %path.display(), num_params = model.num_params(), "saved checkpoint");

    Ok(path)
}

/// Rebuild a model from a directory written by [save_checkpoint].
pub fn load_checkpoint<B: Backend, P: AsRef<Path>>(
    dir: P,
    device: &Device<B>,
) -> Result<BitDemucs<B>> {
    let dir = dir.as_ref();
    let config = BitDemucsConfig::load(dir.join(CONFIG_FILE))
        .map_err(|err| BitDemucsError::Config(err.to_string()))?;

    // Skip the rescaling, the weights are overwritten anyway
    let model = config
        .clone()
        .with_rescale(0.0)
        .init::<B>(device)?
        .with_config(config);

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let model = model.load_file(dir.join(MODEL_FILE), &recorder, device)?;
    info!(dir = %dir.display(), "loaded checkpoint");

    Ok(model)
}
