pub mod bitdemucs;
mod blocks;
pub mod config;
pub mod head;
pub mod lstm;
pub mod normalize;
pub mod resample;
mod rescale;

pub use bitdemucs::BitDemucs;
pub use config::{BitDemucsConfig, StageChannels, SEGMENT_LENGTH};
pub use head::BitHeadOutput;
