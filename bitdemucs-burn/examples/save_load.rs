use std::path::PathBuf;

use bitdemucs_burn::{load_checkpoint, save_checkpoint, BitDemucsConfig, Result};
use burn::{
    backend::NdArray,
    tensor::{Distribution, Tensor},
};
use tracing_subscriber::EnvFilter;

type B = NdArray<f32>;

pub fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("bitdemucs-checkpoint"));
    let device = Default::default();

    let config = BitDemucsConfig::new()
        .with_hidden(8)
        .with_depth(3)
        .with_n_bits(128)
        .with_kernel_out(8);
    let model = config.init::<B>(&device)?;
    let path = save_checkpoint(&model, &dir)?;
    println!("Saved {}", path.display());

    let loaded = load_checkpoint::<B, _>(&dir, &device)?;
    let audio = Tensor::<B, 3>::random([1, config.chin, 4096], Distribution::Default, &device);
    let diff: f32 = (model.forward(audio.clone()) - loaded.forward(audio))
        .abs()
        .max()
        .into_scalar();
    println!("Max difference after reload: {diff}");

    Ok(())
}
