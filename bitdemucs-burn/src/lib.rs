//! BitDemucs model for Burn.
//!
//! A DEMUCS encoder/decoder that regresses the bits of a message embedded in an audio segment.
//! The model predicts one logit per bit from a waveform batch `[batch_size, channels, length]`.
//!
//! # Example
//!
//! ```ignore
//! use bitdemucs_burn::BitDemucsConfig;
//! use burn::backend::NdArray;
//!
//! type B = NdArray<f32>;
//!
//! let device = Default::default();
//! let model = BitDemucsConfig::new().with_chin(1).with_chout(1).init::<B>(&device)?;
//! let logits = model.forward(audio); // [batch_size, 5120]
//! ```

pub mod checkpoint;
mod error;
pub mod model;

pub use checkpoint::*;
pub use error::{BitDemucsError, Result};
pub use model::*;
