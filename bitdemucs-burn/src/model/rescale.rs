//! Post-initialization weight rescaling.
//!
//! Every convolution is rescaled once at construction so that the standard deviation of its
//! weights moves toward a reference value, following
//! [`Demucs: Deep Extractor for Music Sources`](https://arxiv.org/abs/1911.13254).
use burn::{
    nn::conv::{Conv1d, ConvTranspose1d},
    tensor::{backend::Backend, ElementConversion, Tensor},
};

/// Unbiased standard deviation over all elements of `weight`.
pub fn weight_std<B: Backend, const D: usize>(weight: &Tensor<B, D>) -> f64 {
    let numel = weight.shape().num_elements();
    weight
        .clone()
        .reshape([numel])
        .var(0)
        .sqrt()
        .into_scalar()
        .elem::<f64>()
}

/// Factor the weights and bias get divided by: `sqrt(std / reference)`.
pub fn rescale_factor<B: Backend, const D: usize>(weight: &Tensor<B, D>, reference: f64) -> f64 {
    (weight_std(weight) / reference).sqrt()
}

// Divide by `scale` and keep the result a leaf parameter.
fn scaled<B: Backend, const D: usize>(tensor: Tensor<B, D>, scale: f64) -> Tensor<B, D> {
    let require_grad = tensor.is_require_grad();
    tensor
        .div_scalar(scale)
        .detach()
        .set_require_grad(require_grad)
}

pub fn rescale_conv1d<B: Backend>(mut conv: Conv1d<B>, reference: f64) -> Conv1d<B> {
    let scale = rescale_factor(&conv.weight.val(), reference);
    conv.weight = conv.weight.map(|weight| scaled(weight, scale));
    conv.bias = conv.bias.map(|bias| bias.map(|bias| scaled(bias, scale)));
    conv
}

pub fn rescale_conv_transpose1d<B: Backend>(
    mut conv: ConvTranspose1d<B>,
    reference: f64,
) -> ConvTranspose1d<B> {
    let scale = rescale_factor(&conv.weight.val(), reference);
    conv.weight = conv.weight.map(|weight| scaled(weight, scale));
    conv.bias = conv.bias.map(|bias| bias.map(|bias| scaled(bias, scale)));
    conv
}
