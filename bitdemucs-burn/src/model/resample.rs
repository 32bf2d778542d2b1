use core::f64::consts::PI;

use burn::{
    module::Module,
    tensor::{
        backend::Backend, module::conv1d, ops::ConvOptions, Device, Tensor, TensorData,
    },
};

use crate::error::{BitDemucsError, Result};

/// Number of sinc zero crossings on each side of the interpolation kernel.
pub const SINC_ZEROS: usize = 56;

/// Sinc interpolation kernel producing the sample halfway between two input samples.
///
/// The kernel has `2 * zeros` taps and is windowed with the odd samples of a symmetric Hann
/// window of size `4 * zeros + 1`.
pub fn kernel_upsample2(zeros: usize) -> Vec<f32> {
    let size = 4 * zeros + 1;
    let window = (0..size).map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (size - 1) as f64).cos()));

    window
        .skip(1)
        .step_by(2)
        .take(2 * zeros)
        .enumerate()
        .map(|(i, w)| {
            let t = (-(zeros as f64) + 0.5 + i as f64) * PI;
            (t.sin() / t * w) as f32
        })
        .collect()
}

fn sinc_kernel<B: Backend>(zeros: usize, device: &Device<B>) -> Tensor<B, 3> {
    let taps = 2 * zeros;
    Tensor::from_data(
        TensorData::new(kernel_upsample2(zeros), [1, 1, taps]).convert::<B::FloatElem>(),
        device,
    )
}

/// Right-pad the time axis with `amount` zeros.
pub fn pad_time<B: Backend>(x: Tensor<B, 3>, amount: usize) -> Tensor<B, 3> {
    if amount == 0 {
        return x;
    }
    let [batch, channels, _] = x.dims();
    let zeros = Tensor::zeros([batch, channels, amount], &x.device());
    Tensor::cat(vec![x, zeros], 2)
}

// Filter every channel independently with the sinc kernel; output has `time + 1` samples.
fn sinc_filter<B: Backend>(x: Tensor<B, 3>, zeros: usize) -> Tensor<B, 3> {
    let [batch, channels, time] = x.dims();
    let kernel = sinc_kernel::<B>(zeros, &x.device());
    let x = x.reshape([batch * channels, 1, time]);
    let out = conv1d(x, kernel, None, ConvOptions::new([1], [zeros], [1], 1));
    out.reshape([batch, channels, time + 1])
}

/// Upsample the time axis by 2 with sinc interpolation.
///
/// Original samples are kept at even positions, interpolated ones are inserted at odd
/// positions.
pub fn upsample2<B: Backend>(x: Tensor<B, 3>, zeros: usize) -> Tensor<B, 3> {
    let [batch, channels, time] = x.dims();
    let out = sinc_filter(x.clone(), zeros).narrow(2, 1, time);

    // Shape (b, c, t) x 2 -> (b, c, t, 2) -> (b, c, 2t)
    Tensor::stack::<4>(vec![x, out], 3).reshape([batch, channels, 2 * time])
}

/// Downsample the time axis by 2 with sinc interpolation.
///
/// Odd lengths are padded with a trailing zero first, so the output has `ceil(t / 2)` samples.
pub fn downsample2<B: Backend>(x: Tensor<B, 3>, zeros: usize) -> Tensor<B, 3> {
    let [_, _, time] = x.dims();
    let x = pad_time(x, time % 2);
    let [batch, channels, time] = x.dims();
    let half = time / 2;

    let pairs = x.reshape([batch, channels, half, 2]);
    let even = pairs.clone().narrow(3, 0, 1).reshape([batch, channels, half]);
    let odd = pairs.narrow(3, 1, 1).reshape([batch, channels, half]);

    let odd = sinc_filter(odd, zeros).narrow(2, 0, half);
    (even + odd).mul_scalar(0.5)
}

/// Power-of-two resampling applied around the encoder/decoder.
///
/// Upsampling before the encoder trades time resolution for channel capacity, downsampling
/// after the decoder undoes it.
#[derive(Module, Clone, Debug)]
pub struct Resampler {
    factor: usize,
    zeros: usize,
}

impl Resampler {
    /// Create a resampler for a factor of 1, 2 or 4.
    pub fn new(factor: usize) -> Result<Self> {
        Self::check_factor(factor)?;
        Ok(Self {
            factor,
            zeros: SINC_ZEROS,
        })
    }

    /// Fail if `factor` is not a supported resampling factor.
    pub fn check_factor(factor: usize) -> Result<()> {
        match factor {
            1 | 2 | 4 => Ok(()),
            _ => Err(BitDemucsError::InvalidResample(factor)),
        }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    // Number of 2x passes
    fn passes(&self) -> u32 {
        self.factor.trailing_zeros()
    }

    pub fn upsample<B: Backend>(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        (0..self.passes()).fold(x, |x, _| upsample2(x, self.zeros))
    }

    pub fn downsample<B: Backend>(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        (0..self.passes()).fold(x, |x, _| downsample2(x, self.zeros))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray;

    fn sine(batch: usize, time: usize, period: f64, device: &Device<B>) -> Tensor<B, 3> {
        let data = (0..batch * time)
            .map(|i| ((i % time) as f64 * 2.0 * PI / period).sin() as f32)
            .collect::<Vec<_>>();
        Tensor::from_data(TensorData::new(data, [batch, 1, time]), device)
    }

    fn max_abs_diff(a: Tensor<B, 3>, b: Tensor<B, 3>) -> f32 {
        (a - b).abs().max().into_scalar()
    }

    #[test]
    fn kernel_is_symmetric_and_sums_to_one() {
        let kernel = kernel_upsample2(SINC_ZEROS);
        assert_eq!(kernel.len(), 2 * SINC_ZEROS);

        for (a, b) in kernel.iter().zip(kernel.iter().rev()) {
            assert!((a - b).abs() < 1e-6);
        }

        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-2, "kernel sum {sum}");
    }

    #[test]
    fn factor_one_is_identity() {
        let device = Default::default();
        let resampler = Resampler::new(1).unwrap();
        let x = Tensor::<B, 3>::random([2, 3, 101], Distribution::Normal(0.0, 1.0), &device);

        let up = resampler.upsample(x.clone());
        let down = resampler.downsample(up.clone());

        up.to_data().assert_eq(&x.to_data(), true);
        down.to_data().assert_eq(&x.to_data(), true);
    }

    #[test]
    fn invalid_factor_is_rejected() {
        for factor in [0, 3, 6, 8] {
            assert!(matches!(
                Resampler::new(factor),
                Err(BitDemucsError::InvalidResample(f)) if f == factor
            ));
        }
    }

    #[test]
    fn upsample_keeps_original_samples() {
        let device = Default::default();
        let x = Tensor::<B, 3>::random([1, 2, 50], Distribution::Normal(0.0, 1.0), &device);

        let up = upsample2(x.clone(), SINC_ZEROS);
        assert_eq!(up.dims(), [1, 2, 100]);

        let even = up.reshape([1, 2, 50, 2]).narrow(3, 0, 1).reshape([1, 2, 50]);
        even.to_data().assert_eq(&x.to_data(), true);
    }

    #[test]
    fn downsample_handles_odd_lengths() {
        let device = Default::default();
        let x = Tensor::<B, 3>::random([2, 1, 33], Distribution::Normal(0.0, 1.0), &device);

        assert_eq!(downsample2(x, SINC_ZEROS).dims(), [2, 1, 17]);
    }

    #[test]
    fn factor_four_round_trip_restores_length() {
        let device = Default::default();
        let resampler = Resampler::new(4).unwrap();
        let x = sine(2, 256, 64.0, &device);

        let up = resampler.upsample(x.clone());
        assert_eq!(up.dims(), [2, 1, 1024]);

        let down = resampler.downsample(up);
        assert_eq!(down.dims(), [2, 1, 256]);
    }

    #[test]
    fn round_trip_preserves_band_limited_signal() {
        let device = Default::default();
        let x = sine(1, 512, 64.0, &device);

        let y = downsample2(upsample2(x.clone(), SINC_ZEROS), SINC_ZEROS);

        // Edges see the zero padding of the filter
        let interior = |t: Tensor<B, 3>| t.narrow(2, 64, 384);
        let diff = max_abs_diff(interior(y), interior(x));
        assert!(diff < 1e-2, "max difference {diff}");
    }
}
