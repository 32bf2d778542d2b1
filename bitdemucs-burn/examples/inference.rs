use core::f64::consts::PI;

use bitdemucs_burn::{BitDemucsConfig, Result};
use burn::{
    backend::NdArray,
    tensor::{activation::sigmoid, backend::Backend, Device, Tensor, TensorData},
};
use tracing_subscriber::EnvFilter;

const BATCH_SIZE: usize = 2;
const SECONDS: f64 = 0.5;

/// A chirp sweeping from 200Hz to 2kHz, one per batch item with a small phase shift.
fn chirp<B: Backend>(sample_rate: usize, device: &Device<B>) -> Tensor<B, 3> {
    let length = (SECONDS * sample_rate as f64) as usize;
    let data = (0..BATCH_SIZE * length)
        .map(|i| {
            let (item, t) = (i / length, (i % length) as f64 / sample_rate as f64);
            let freq = 200.0 + 1800.0 * t / SECONDS;
            (0.5 * (2.0 * PI * freq * t + item as f64).sin()) as f32
        })
        .collect::<Vec<_>>();

    Tensor::from_data(TensorData::new(data, [BATCH_SIZE, 1, length]), device)
}

pub fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let device = Default::default();

    // Small mono model predicting a 256 bit message
    let config = BitDemucsConfig::new()
        .with_chin(1)
        .with_chout(1)
        .with_hidden(16)
        .with_depth(4)
        .with_n_bits(256)
        .with_kernel_out(16)
        .with_normalize(true);
    let model = config.init::<NdArray>(&device)?;

    let audio = chirp::<NdArray>(config.sample_rate, &device);
    let [_, _, length] = audio.dims();
    println!(
        "Input length {length}, valid length {}, total stride {}",
        model.valid_length(length),
        model.total_stride()
    );

    let heads = model.forward_heads(audio);
    let bits = sigmoid(heads.logits).greater_elem(0.5).int();

    println!("Bit logits {:?}", heads.stacked_logits.dims());
    for (item, bits) in bits.iter_dim(0).enumerate() {
        let bits = bits
            .into_data()
            .iter::<i64>()
            .take(32)
            .map(|bit| if bit > 0 { '1' } else { '0' })
            .collect::<String>();
        println!("Item {item}: {bits}...");
    }

    Ok(())
}
