use burn::{
    module::Module,
    nn::conv::{Conv1d, Conv1dConfig, ConvTranspose1d, ConvTranspose1dConfig},
    tensor::{
        activation::{relu, sigmoid},
        backend::Backend,
        Device, Tensor,
    },
};

use super::rescale::{rescale_conv1d, rescale_conv_transpose1d};

/// Gated linear unit over the channel axis, or ReLU when `glu` is false.
pub fn gated<B: Backend>(x: Tensor<B, 3>, glu: bool) -> Tensor<B, 3> {
    if !glu {
        return relu(x);
    }

    let [_, channels, _] = x.dims();
    let half = channels / 2;
    let value = x.clone().narrow(1, 0, half);
    let gate = x.narrow(1, half, half);
    value * sigmoid(gate)
}

// The pointwise convolution doubles its width when gated, GLU halves it back
fn channel_scale(glu: bool) -> usize {
    if glu {
        2
    } else {
        1
    }
}

/// A strided Conv1d -> ReLU -> pointwise Conv1d -> GLU/ReLU block.
///
/// Downsamples time by the stride and maps `chin` to `hidden` channels.
#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    conv: Conv1d<B>,
    pointwise: Conv1d<B>,
    glu: bool,
}

impl<B: Backend> EncoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = relu(self.conv.forward(x));
        gated(self.pointwise.forward(x), self.glu)
    }

    /// Rescale the convolution weights toward the `reference` standard deviation.
    pub fn rescale(self, reference: f64) -> Self {
        Self {
            conv: rescale_conv1d(self.conv, reference),
            pointwise: rescale_conv1d(self.pointwise, reference),
            glu: self.glu,
        }
    }

    #[cfg(test)]
    pub(crate) fn conv_weight(&self) -> Tensor<B, 3> {
        self.conv.weight.val()
    }
}

/// [Encoder block](EncoderBlock) configuration.
pub struct EncoderBlockConfig {
    conv: Conv1dConfig,
    pointwise: Conv1dConfig,
    glu: bool,
}

impl EncoderBlockConfig {
    /// Create a new instance of the encoder block [config](EncoderBlockConfig).
    pub fn new(chin: usize, hidden: usize, kernel_size: usize, stride: usize, glu: bool) -> Self {
        let conv = Conv1dConfig::new(chin, hidden, kernel_size).with_stride(stride);
        let pointwise = Conv1dConfig::new(hidden, hidden * channel_scale(glu), 1);

        Self {
            conv,
            pointwise,
            glu,
        }
    }

    /// Initialize a new [encoder block](EncoderBlock) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> EncoderBlock<B> {
        EncoderBlock {
            conv: self.conv.init(device),
            pointwise: self.pointwise.init(device),
            glu: self.glu,
        }
    }
}

/// A skip addition -> pointwise Conv1d -> GLU/ReLU -> strided ConvTranspose1d block.
///
/// Upsamples time by the stride and maps `hidden` to `chout` channels. Every stage except the
/// outermost one ends with a ReLU.
#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    pointwise: Conv1d<B>,
    conv_tr: ConvTranspose1d<B>,
    glu: bool,
    relu: bool,
}

impl<B: Backend> DecoderBlock<B> {
    /// Add the encoder `skip` (truncated to the length of `x`) and decode.
    ///
    /// # Panics
    ///
    /// When `skip` is shorter than `x`.
    pub fn forward(&self, x: Tensor<B, 3>, skip: Tensor<B, 3>) -> Tensor<B, 3> {
        let [_, _, time] = x.dims();
        let x = x + skip.narrow(2, 0, time);

        let x = gated(self.pointwise.forward(x), self.glu);
        let x = self.conv_tr.forward(x);

        if self.relu {
            relu(x)
        } else {
            x
        }
    }

    /// Rescale the convolution weights toward the `reference` standard deviation.
    pub fn rescale(self, reference: f64) -> Self {
        Self {
            pointwise: rescale_conv1d(self.pointwise, reference),
            conv_tr: rescale_conv_transpose1d(self.conv_tr, reference),
            glu: self.glu,
            relu: self.relu,
        }
    }

    #[cfg(test)]
    pub(crate) fn has_relu(&self) -> bool {
        self.relu
    }
}

/// [Decoder block](DecoderBlock) configuration.
pub struct DecoderBlockConfig {
    pointwise: Conv1dConfig,
    conv_tr: ConvTranspose1dConfig,
    glu: bool,
    relu: bool,
}

impl DecoderBlockConfig {
    /// Create a new instance of the decoder block [config](DecoderBlockConfig).
    ///
    /// The outermost stage sets `relu` to false so the decoder output stays real-valued.
    pub fn new(
        hidden: usize,
        chout: usize,
        kernel_size: usize,
        stride: usize,
        glu: bool,
        relu: bool,
    ) -> Self {
        let pointwise = Conv1dConfig::new(hidden, hidden * channel_scale(glu), 1);
        let conv_tr = ConvTranspose1dConfig::new([hidden, chout], kernel_size).with_stride(stride);

        Self {
            pointwise,
            conv_tr,
            glu,
            relu,
        }
    }

    /// Initialize a new [decoder block](DecoderBlock) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> DecoderBlock<B> {
        DecoderBlock {
            pointwise: self.pointwise.init(device),
            conv_tr: self.conv_tr.init(device),
            glu: self.glu,
            relu: self.relu,
        }
    }
}
