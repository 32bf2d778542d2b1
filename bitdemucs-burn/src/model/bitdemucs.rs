use burn::{
    module::{Ignored, Module},
    tensor::{backend::Backend, Device, Tensor},
};
use tracing::{debug, trace};

use super::{
    blocks::{DecoderBlock, DecoderBlockConfig, EncoderBlock, EncoderBlockConfig},
    config::BitDemucsConfig,
    head::{BitHead, BitHeadConfig, BitHeadOutput, StackedBitHead, StackedBitHeadConfig},
    lstm::{RecurrentBottleneck, RecurrentBottleneckConfig},
    normalize::InputNormalizer,
    resample::{pad_time, Resampler},
};
use crate::error::Result;

/// DEMUCS encoder/decoder regressing message bits from an audio segment.
///
/// The waveform is upsampled, encoded by a stack of strided convolutions, summarized by a
/// recurrent bottleneck, decoded with U-Net skip connections back to `chout` channels and
/// downsampled. A strided convolution head then turns every block of `kernel_out` samples
/// into bit logits.
///
/// Derived from [`Real Time Speech Enhancement in the Waveform Domain`](https://arxiv.org/abs/2006.12847).
#[derive(Module, Debug)]
pub struct BitDemucs<B: Backend> {
    encoder: Vec<EncoderBlock<B>>,
    /// Deepest stage first.
    decoder: Vec<DecoderBlock<B>>,
    lstm: RecurrentBottleneck<B>,
    resampler: Resampler,
    normalizer: InputNormalizer,
    output_bit: BitHead<B>,
    output_bit_stacked: StackedBitHead<B>,
    config: Ignored<BitDemucsConfig>,
}

impl<B: Backend> BitDemucs<B> {
    /// Predict bit logits from a batch of waveforms.
    ///
    /// # Shapes
    ///   - input: `[batch_size, chin, length]`
    ///   - output: `[batch_size, n_bits]`
    ///
    /// Both heads are evaluated, only the [primary one](BitHeadOutput::logits) is returned.
    ///
    /// # Panics
    ///
    /// When `length` is shorter than `kernel_out`.
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        self.forward_heads(input).logits
    }

    /// Same as [forward](BitDemucs::forward) for single channel input `[batch_size, length]`.
    pub fn forward_mono(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.forward(input.unsqueeze_dim::<3>(1))
    }

    /// Run the model and return the logits of both output heads.
    pub fn forward_heads(&self, input: Tensor<B, 3>) -> BitHeadOutput<B> {
        let (x, std) = self.decode(input);

        let logits = self.output_bit.forward(x.clone());
        let stacked_logits = self.output_bit_stacked.forward(x);

        BitHeadOutput {
            logits: self.normalizer.denormalize(logits, std.clone()),
            stacked_logits: self.normalizer.denormalize(stacked_logits, std),
        }
    }

    // Encoder/decoder pass, returning the `[B, chout, length]` decoder output and the input
    // standard deviation when normalizing.
    fn decode(&self, input: Tensor<B, 3>) -> (Tensor<B, 3>, Option<Tensor<B, 3>>) {
        let [batch_size, _, length] = input.dims();
        let (x, std) = self.normalizer.normalize(input);

        let valid = self.valid_length(length);
        let x = pad_time(x, valid - length);
        let mut x = self.resampler.upsample(x);
        trace!(batch_size, length, valid, "encoding {:?}", x.dims());

        let mut skips = Vec::with_capacity(self.encoder.len());
        for block in self.encoder.iter() {
            x = block.forward(x);
            skips.push(x.clone());
        }

        // [B, C, T] -> [B, T, C] and back
        let (x, _) = self.lstm.forward(x.swap_dims(1, 2), None);
        let mut x = x.swap_dims(1, 2);

        for (block, skip) in self.decoder.iter().zip(skips.into_iter().rev()) {
            x = block.forward(x, skip);
        }

        let x = self.resampler.downsample(x).narrow(2, 0, length);
        trace!("decoded {:?}", x.dims());

        (x, std)
    }

    /// See [BitDemucsConfig::valid_length].
    pub fn valid_length(&self, length: usize) -> usize {
        self.config.valid_length(length)
    }

    /// See [BitDemucsConfig::total_stride].
    pub fn total_stride(&self) -> usize {
        self.config.total_stride()
    }

    /// Configuration the model was built from.
    pub fn config(&self) -> &BitDemucsConfig {
        &self.config
    }

    pub(crate) fn with_config(self, config: BitDemucsConfig) -> Self {
        Self {
            config: Ignored(config),
            ..self
        }
    }

    /// Rescale every convolution toward the `reference` weight standard deviation.
    pub fn rescale(self, reference: f64) -> Self {
        Self {
            encoder: self
                .encoder
                .into_iter()
                .map(|block| block.rescale(reference))
                .collect(),
            decoder: self
                .decoder
                .into_iter()
                .map(|block| block.rescale(reference))
                .collect(),
            output_bit: self.output_bit.rescale(reference),
            output_bit_stacked: self.output_bit_stacked.rescale(reference),
            ..self
        }
    }
}

impl BitDemucsConfig {
    /// Initialize a new [BitDemucs](BitDemucs) module.
    ///
    /// Fails when the configuration is not [valid](BitDemucsConfig::validate).
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Result<BitDemucs<B>> {
        self.validate()?;

        let stages = self.channel_schedule();
        let mut encoder = Vec::with_capacity(self.depth);
        let mut decoder = Vec::with_capacity(self.depth);
        for (index, stage) in stages.iter().enumerate() {
            encoder.push(
                EncoderBlockConfig::new(
                    stage.chin,
                    stage.hidden,
                    self.kernel_size,
                    self.stride,
                    self.glu,
                )
                .init(device),
            );
            decoder.insert(
                0,
                DecoderBlockConfig::new(
                    stage.hidden,
                    stage.chout,
                    self.kernel_size,
                    self.stride,
                    self.glu,
                    index > 0,
                )
                .init(device),
            );
        }
        debug!(?stages, "channel schedule");

        let lstm = RecurrentBottleneckConfig::new(self.bottleneck_dim())
            .with_bidirectional(!self.causal)
            .init(device);

        let (channels, frames) = (self.head_channels(), self.head_frames());
        let output_bit =
            BitHeadConfig::new(self.chout, channels, self.kernel_out, frames).init(device);
        let output_bit_stacked =
            StackedBitHeadConfig::new(self.chout, channels, self.kernel_out, frames).init(device);

        let model = BitDemucs {
            encoder,
            decoder,
            lstm,
            resampler: Resampler::new(self.resample)?,
            normalizer: InputNormalizer::new(self.normalize, self.floor),
            output_bit,
            output_bit_stacked,
            config: Ignored(self.clone()),
        };

        let model = if self.rescale != 0.0 {
            model.rescale(self.rescale)
        } else {
            model
        };
        debug!(
            num_params = model.num_params(),
            head_channels = channels,
            head_frames = frames,
            "initialized BitDemucs"
        );

        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::rescale::weight_std;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    type B = NdArray;

    fn small_config() -> BitDemucsConfig {
        BitDemucsConfig::new()
            .with_chin(1)
            .with_chout(1)
            .with_hidden(8)
            .with_depth(2)
            .with_kernel_size(4)
            .with_stride(2)
            .with_resample(1)
            .with_n_bits(64)
            .with_kernel_out(8)
    }

    fn is_finite(x: Tensor<B, 2>) -> bool {
        x.into_data().iter::<f32>().all(f32::is_finite)
    }

    #[test]
    fn forward_predicts_one_logit_per_bit() {
        let device = Default::default();
        let model = small_config().init::<B>(&device).unwrap();
        let x = Tensor::<B, 3>::random([3, 1, 1000], Distribution::Normal(0.0, 1.0), &device);

        let logits = model.forward(x);

        assert_eq!(logits.dims(), [3, 64]);
        assert!(is_finite(logits));
    }

    #[test]
    fn forward_mono_matches_single_channel_forward() {
        let device = Default::default();
        let model = small_config().init::<B>(&device).unwrap();
        let x = Tensor::<B, 2>::random([2, 300], Distribution::Normal(0.0, 1.0), &device);

        let mono = model.forward_mono(x.clone());
        let multi = model.forward(x.unsqueeze_dim::<3>(1));

        let diff: f32 = (mono - multi).abs().max().into_scalar();
        assert!(diff < 1e-6);
    }

    #[test]
    fn forward_returns_primary_head() {
        let device = Default::default();
        let model = small_config()
            .with_segment_length(1024)
            .init::<B>(&device)
            .unwrap();
        let x = Tensor::<B, 3>::random([2, 1, 1024], Distribution::Normal(0.0, 1.0), &device);

        let heads = model.forward_heads(x.clone());
        let logits = model.forward(x);

        assert_eq!(heads.logits.dims(), [2, 64]);
        assert_eq!(heads.stacked_logits.dims(), [2, 64]);
        let primary: f32 = (heads.logits - logits.clone()).abs().max().into_scalar();
        assert!(primary < 1e-6);
        let stacked: f32 = (heads.stacked_logits - logits).abs().max().into_scalar();
        assert!(stacked > 0.0);
    }

    #[test]
    fn forward_accepts_a_single_head_frame() {
        let device = Default::default();
        let model = small_config().init::<B>(&device).unwrap();
        let x = Tensor::<B, 3>::random([1, 1, 8], Distribution::Normal(0.0, 1.0), &device);

        assert_eq!(model.forward(x).dims(), [1, 64]);
    }

    #[test]
    fn resample_four_restores_valid_length() {
        let config = small_config().with_resample(4);
        let resampler = Resampler::new(4).unwrap();
        let device = Default::default();

        for length in [1, 37, 250, 1001] {
            let valid = config.valid_length(length);
            let x = Tensor::<B, 3>::random([1, 1, valid], Distribution::Normal(0.0, 1.0), &device);

            let up = resampler.upsample(x);
            assert_eq!(up.dims(), [1, 1, 4 * valid]);
            assert_eq!(resampler.downsample(up).dims(), [1, 1, valid]);
        }
    }

    #[test]
    fn resample_four_forward() {
        let device = Default::default();
        let model = small_config()
            .with_resample(4)
            .with_chin(2)
            .with_chout(2)
            .init::<B>(&device)
            .unwrap();
        let x = Tensor::<B, 3>::random([2, 2, 333], Distribution::Normal(0.0, 1.0), &device);

        let logits = model.forward(x);

        assert_eq!(logits.dims(), [2, 64]);
        assert!(is_finite(logits));
    }

    #[test]
    fn forward_shapes_over_architectures() {
        let device = Default::default();
        let architectures = [
            (1, 2, 1),
            (1, 3, 3),
            (2, 4, 2),
            (2, 5, 3),
            (2, 8, 4),
            (3, 3, 2),
            (3, 4, 2),
            (3, 6, 3),
            (4, 2, 2),
            (4, 4, 2),
            (2, 3, 1),
        ];

        for (depth, kernel_size, stride) in architectures {
            let config = BitDemucsConfig::new()
                .with_chin(1)
                .with_chout(1)
                .with_hidden(4)
                .with_depth(depth)
                .with_kernel_size(kernel_size)
                .with_stride(stride)
                .with_resample(2)
                .with_n_bits(32)
                .with_kernel_out(4);
            let model = config.init::<B>(&device).unwrap();
            let x = Tensor::<B, 3>::random([1, 1, 257], Distribution::Normal(0.0, 1.0), &device);

            let logits = model.forward(x);
            assert_eq!(logits.dims(), [1, 32], "{config}");
            assert!(is_finite(logits), "{config}");
        }
    }

    #[test]
    fn normalized_model_is_scale_equivariant() {
        let device = Default::default();
        let model = small_config()
            .with_normalize(true)
            .with_floor(0.0)
            .init::<B>(&device)
            .unwrap();
        let x = Tensor::<B, 3>::random([2, 1, 500], Distribution::Normal(0.0, 1.0), &device);

        let y = model.forward(x.clone());
        let y2 = model.forward(x.mul_scalar(2.0));

        let diff: f32 = (y2 - y.clone().mul_scalar(2.0)).abs().max().into_scalar();
        let scale: f32 = y.abs().max().into_scalar();
        assert!(diff < 1e-3 * scale.max(1.0), "diff {diff}");
    }

    #[test]
    fn unnormalized_model_is_not_scale_equivariant() {
        let device = Default::default();
        let model = small_config().init::<B>(&device).unwrap();
        let x = Tensor::<B, 3>::random([2, 1, 500], Distribution::Normal(0.0, 1.0), &device);

        let y = model.forward(x.clone());
        let y2 = model.forward(x.mul_scalar(2.0));

        let diff: f32 = (y2 - y.mul_scalar(2.0)).abs().max().into_scalar();
        assert!(diff > 1e-3, "diff {diff}");
    }

    #[test]
    fn normalize_flag_changes_output() {
        let device = Default::default();
        let model = small_config().init::<B>(&device).unwrap();
        let normalized = small_config()
            .with_normalize(true)
            .init::<B>(&device)
            .unwrap()
            .load_record(model.clone().into_record());
        let x = Tensor::<B, 3>::random([1, 1, 500], Distribution::Normal(0.0, 5.0), &device);

        let diff: f32 = (model.forward(x.clone()) - normalized.forward(x))
            .abs()
            .max()
            .into_scalar();
        assert!(diff > 0.0);
    }

    #[test]
    fn causal_model_uses_unidirectional_bottleneck() {
        let device = Default::default();
        let model = small_config().with_causal(true).init::<B>(&device).unwrap();
        let x = Tensor::<B, 3>::random([2, 1, 400], Distribution::Normal(0.0, 1.0), &device);

        assert_eq!(model.lstm.directions(), 1);
        assert_eq!(model.forward(x).dims(), [2, 64]);
    }

    #[test]
    fn invalid_config_is_rejected_before_allocation() {
        let device = Default::default();
        assert!(small_config()
            .with_resample(3)
            .init::<B>(&device)
            .is_err());
    }

    #[test]
    fn decoder_mirrors_encoder() {
        let device = Default::default();
        let model = small_config().with_depth(3).init::<B>(&device).unwrap();

        assert_eq!(model.encoder.len(), 3);
        assert_eq!(model.decoder.len(), 3);
        // Only the outermost stage, applied last, skips the ReLU
        let relus = model
            .decoder
            .iter()
            .map(|block| block.has_relu())
            .collect::<Vec<_>>();
        assert_eq!(relus, vec![true, true, false]);
    }

    #[test]
    fn rescaling_shrinks_weights_toward_reference() {
        let device = Default::default();
        let raw = small_config().with_rescale(0.0).init::<B>(&device).unwrap();
        let rescaled = raw.clone().rescale(0.1);

        let before = weight_std(&raw.output_bit.weight());
        let after = weight_std(&rescaled.output_bit.weight());
        let expected = (before * 0.1).sqrt();
        assert!((after - expected).abs() < 1e-4, "{after} vs {expected}");
    }

    #[test]
    fn gradients_reach_encoder_and_head() {
        type AB = Autodiff<NdArray>;
        let device = Default::default();
        let model = small_config().init::<AB>(&device).unwrap();
        let x = Tensor::<AB, 3>::random([2, 1, 200], Distribution::Normal(0.0, 1.0), &device);

        let loss = model.forward(x).powf_scalar(2.0).mean();
        let grads = loss.backward();

        assert!(model.output_bit.weight().grad(&grads).is_some());
        assert!(model.encoder[0].conv_weight().grad(&grads).is_some());
    }

    #[test]
    fn model_keeps_its_config() {
        let device = Default::default();
        let config = small_config().with_glu(false);
        let model = config.init::<B>(&device).unwrap();

        assert_eq!(model.config().to_string(), config.to_string());
        assert_eq!(model.valid_length(1000), config.valid_length(1000));
        assert_eq!(model.total_stride(), 4);
    }
}
