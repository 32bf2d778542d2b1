use burn::config::Config;

use super::resample::Resampler;
use crate::error::BitDemucsError;

/// Input length (in samples) the bit-regression head is laid out for.
pub const SEGMENT_LENGTH: usize = 40960;

/// [BitDemucs](super::bitdemucs::BitDemucs) configuration.
///
/// The model keeps a copy of the exact configuration it was built from so that a checkpoint
/// can be reconstructed from it.
#[derive(Config, Debug)]
pub struct BitDemucsConfig {
    /// Number of input channels.
    #[config(default = "2")]
    pub chin: usize,
    /// Number of channels produced by the outermost decoder stage.
    #[config(default = "2")]
    pub chout: usize,
    /// Number of hidden channels of the first stage.
    #[config(default = "64")]
    pub hidden: usize,
    /// Number of encoder (and decoder) stages.
    #[config(default = "5")]
    pub depth: usize,
    /// Kernel size of every strided (transposed) convolution.
    #[config(default = "8")]
    pub kernel_size: usize,
    /// Stride of every strided (transposed) convolution.
    #[config(default = "2")]
    pub stride: usize,
    /// Uses a unidirectional LSTM in the bottleneck when true.
    #[config(default = false)]
    pub causal: bool,
    /// Resampling applied around the encoder/decoder. One of 1, 2 or 4.
    #[config(default = "2")]
    pub resample: usize,
    /// Channel growth factor applied at every stage.
    #[config(default = "2.0")]
    pub growth: f64,
    /// Upper bound on the number of hidden channels.
    #[config(default = "10_000")]
    pub max_hidden: usize,
    /// Normalizes the input by its standard deviation.
    #[config(default = false)]
    pub normalize: bool,
    /// Uses GLU instead of ReLU after the pointwise convolutions.
    #[config(default = true)]
    pub glu: bool,
    /// Reference standard deviation for the weight rescaling. `0.0` disables rescaling.
    #[config(default = "0.1")]
    pub rescale: f64,
    /// Stability floor added to the standard deviation when normalizing.
    #[config(default = "1e-3")]
    pub floor: f64,
    /// Number of predicted message bits.
    #[config(default = "5120")]
    pub n_bits: usize,
    /// Kernel size and stride of the output head convolutions.
    #[config(default = "64")]
    pub kernel_out: usize,
    /// Input length the output head is laid out for.
    #[config(default = "SEGMENT_LENGTH")]
    pub segment_length: usize,
    /// Sample rate the model is trained at.
    #[config(default = "16_000")]
    pub sample_rate: usize,
}

/// Channel widths of one encoder stage and of its mirrored decoder stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageChannels {
    /// Input channels of the encoder stage.
    pub chin: usize,
    /// Hidden channels shared by the encoder stage and its mirrored decoder stage.
    pub hidden: usize,
    /// Output channels of the decoder stage.
    pub chout: usize,
}

impl BitDemucsConfig {
    /// Check the configuration before any parameter is allocated.
    pub fn validate(&self) -> crate::error::Result<()> {
        Resampler::check_factor(self.resample)?;

        let positive = [
            ("chin", self.chin),
            ("chout", self.chout),
            ("hidden", self.hidden),
            ("depth", self.depth),
            ("kernel_size", self.kernel_size),
            ("stride", self.stride),
            ("n_bits", self.n_bits),
            ("kernel_out", self.kernel_out),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(BitDemucsError::InvalidConfig(format!(
                "{name} should be greater than 0"
            )));
        }

        if self.growth <= 0.0 {
            return Err(BitDemucsError::InvalidConfig(format!(
                "growth should be positive, got {}",
                self.growth
            )));
        }

        if self.stride.checked_pow(self.depth as u32).is_none() {
            return Err(BitDemucsError::InvalidConfig(format!(
                "stride {} to the power of depth {} overflows",
                self.stride, self.depth
            )));
        }

        if self.segment_length < self.kernel_out {
            return Err(BitDemucsError::InvalidConfig(format!(
                "segment_length {} is shorter than kernel_out {}",
                self.segment_length, self.kernel_out
            )));
        }

        let head_channels = self.head_channels();
        if self.n_bits % head_channels != 0 {
            return Err(BitDemucsError::InvalidConfig(format!(
                "n_bits {} is not divisible by the {head_channels} output head channels",
                self.n_bits
            )));
        }

        Ok(())
    }

    /// Return the nearest valid length to use with the model so that no time step is left
    /// over in the strided convolutions.
    ///
    /// This is the shortest length, no shorter than `length`, obtained by downsampling a
    /// signal that the encoder/decoder reproduces exactly. A valid length is its own valid
    /// length.
    pub fn valid_length(&self, length: usize) -> usize {
        let resample = self.resample.max(1);
        let period = self.stride.saturating_pow(self.depth as u32).max(1);

        // Decoded length of a single bottleneck frame, then one more frame per `period`
        let shortest = (0..self.depth).fold(1usize, |decoded, _| {
            decoded
                .saturating_sub(1)
                .saturating_mul(self.stride)
                .saturating_add(self.kernel_size)
        });

        // Smallest decoded length that still downsamples to at least `length`
        let target = resample
            .saturating_mul(length.saturating_sub(1))
            .saturating_add(1);
        let frames = target.saturating_sub(shortest).div_ceil(period);
        let decoded = shortest.saturating_add(frames.saturating_mul(period));

        decoded.div_ceil(resample)
    }

    /// Overall time downsampling between the input and the bottleneck.
    pub fn total_stride(&self) -> usize {
        self.stride.saturating_pow(self.depth as u32) / self.resample.max(1)
    }

    /// Channel widths of every stage, outermost first.
    pub fn channel_schedule(&self) -> Vec<StageChannels> {
        let mut chin = self.chin;
        let mut chout = self.chout;
        let mut hidden = self.hidden;

        let mut stages = Vec::with_capacity(self.depth);
        for _ in 0..self.depth {
            stages.push(StageChannels {
                chin,
                hidden,
                chout,
            });
            chout = hidden;
            chin = hidden;
            hidden = ((self.growth * hidden as f64) as usize).min(self.max_hidden);
        }

        stages
    }

    /// Channel width of the deepest stage, which is also the recurrent bottleneck width.
    pub fn bottleneck_dim(&self) -> usize {
        self.channel_schedule()
            .last()
            .map(|stage| stage.hidden)
            .unwrap_or(self.chin)
    }

    /// Number of channels of the output head convolution.
    ///
    /// A segment of `segment_length` samples yields `segment_length / kernel_out` frames,
    /// each frame carrying `n_bits / frames` bits.
    pub fn head_channels(&self) -> usize {
        let frames = (self.segment_length / self.kernel_out.max(1)).max(1);
        (self.n_bits / frames).max(1)
    }

    /// Number of time frames the output head is aligned to.
    pub fn head_frames(&self) -> usize {
        self.n_bits / self.head_channels()
    }
}
