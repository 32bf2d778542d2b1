use burn::{
    module::Module,
    nn::{
        conv::{Conv1d, Conv1dConfig},
        pool::{AdaptiveAvgPool1d, AdaptiveAvgPool1dConfig},
    },
    tensor::{backend::Backend, Device, Tensor},
};

use super::rescale::rescale_conv1d;

/// Flatten `[B, C, T]` into `[B, T * C]`, time-major, as if a dense layer had been applied
/// on blocks of `kernel_out` samples.
pub fn flatten_time_major<B: Backend>(x: Tensor<B, 3>) -> Tensor<B, 2> {
    x.swap_dims(1, 2).flatten(1, 2)
}

/// Outputs of both bit-regression heads, in logits.
#[derive(Debug, Clone)]
pub struct BitHeadOutput<B: Backend> {
    /// Single convolution head `[batch, n_bits]`. This is what the model returns.
    pub logits: Tensor<B, 2>,
    /// Two-layer head `[batch, n_bits]`.
    pub stacked_logits: Tensor<B, 2>,
}

/// Bit-regression head: one strided convolution over non-overlapping blocks of `kernel_out`
/// samples.
#[derive(Module, Debug)]
pub struct BitHead<B: Backend> {
    conv: Conv1d<B>,
    align: AdaptiveAvgPool1d,
}

impl<B: Backend> BitHead<B> {
    /// Map the decoder output `[B, chout, T]` to bit logits `[B, n_bits]`.
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        let x = self.conv.forward(x);
        // Identity for inputs of the segment length
        let x = self.align.forward(x);
        flatten_time_major(x)
    }

    pub fn rescale(self, reference: f64) -> Self {
        Self {
            conv: rescale_conv1d(self.conv, reference),
            align: self.align,
        }
    }

    #[cfg(test)]
    pub(crate) fn weight(&self) -> Tensor<B, 3> {
        self.conv.weight.val()
    }
}

/// [Bit-regression head](BitHead) configuration.
pub struct BitHeadConfig {
    conv: Conv1dConfig,
    align: AdaptiveAvgPool1dConfig,
}

impl BitHeadConfig {
    /// Create a new instance of the bit-regression head [config](BitHeadConfig).
    ///
    /// # Arguments
    ///
    /// * `chout` - Channels of the decoder output.
    /// * `channels` - Bits predicted per frame.
    /// * `kernel_out` - Frame size, used as kernel size and stride.
    /// * `frames` - Number of frames, so that `channels * frames` is the number of bits.
    pub fn new(chout: usize, channels: usize, kernel_out: usize, frames: usize) -> Self {
        let conv = Conv1dConfig::new(chout, channels, kernel_out).with_stride(kernel_out);
        let align = AdaptiveAvgPool1dConfig::new(frames);

        Self { conv, align }
    }

    /// Initialize a new [bit-regression head](BitHead) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> BitHead<B> {
        BitHead {
            conv: self.conv.init(device),
            align: self.align.init(),
        }
    }
}

/// Two-layer bit-regression head.
///
/// A first strided convolution expands every block of `kernel_out` samples into `kernel_out`
/// features, which are laid back out as a single-channel sequence for a second strided
/// convolution.
#[derive(Module, Debug)]
pub struct StackedBitHead<B: Backend> {
    expand: Conv1d<B>,
    collapse: Conv1d<B>,
    align: AdaptiveAvgPool1d,
}

impl<B: Backend> StackedBitHead<B> {
    /// Map the decoder output `[B, chout, T]` to bit logits `[B, n_bits]`.
    ///
    /// # Panics
    ///
    /// When `T` is shorter than `kernel_out * kernel_out`.
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        let x = flatten_time_major(self.expand.forward(x));
        let x = self.collapse.forward(x.unsqueeze_dim::<3>(1));
        let x = self.align.forward(x);
        flatten_time_major(x)
    }

    pub fn rescale(self, reference: f64) -> Self {
        Self {
            expand: rescale_conv1d(self.expand, reference),
            collapse: rescale_conv1d(self.collapse, reference),
            align: self.align,
        }
    }
}

/// [Two-layer bit-regression head](StackedBitHead) configuration.
pub struct StackedBitHeadConfig {
    expand: Conv1dConfig,
    collapse: Conv1dConfig,
    align: AdaptiveAvgPool1dConfig,
}

impl StackedBitHeadConfig {
    /// Create a new instance of the two-layer head [config](StackedBitHeadConfig).
    ///
    /// Arguments are those of [BitHeadConfig::new].
    pub fn new(chout: usize, channels: usize, kernel_out: usize, frames: usize) -> Self {
        let expand = Conv1dConfig::new(chout, kernel_out, kernel_out).with_stride(kernel_out);
        let collapse = Conv1dConfig::new(1, channels, kernel_out).with_stride(kernel_out);
        let align = AdaptiveAvgPool1dConfig::new(frames);

        Self {
            expand,
            collapse,
            align,
        }
    }

    /// Initialize a new [two-layer head](StackedBitHead) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> StackedBitHead<B> {
        StackedBitHead {
            expand: self.expand.init(device),
            collapse: self.collapse.init(device),
            align: self.align.init(),
        }
    }
}
