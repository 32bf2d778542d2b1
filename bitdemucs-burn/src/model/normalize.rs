use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};

/// Optional input normalization by the standard deviation of the mono signal.
#[derive(Module, Clone, Debug)]
pub struct InputNormalizer {
    enabled: bool,
    floor: f64,
}

impl InputNormalizer {
    pub fn new(enabled: bool, floor: f64) -> Self {
        Self { enabled, floor }
    }

    /// Divide `x` by `floor + std`, where `std` is the per-item standard deviation over time
    /// of the channel average.
    ///
    /// Returns the normalized input and the `[batch, 1, 1]` standard deviation, or the input
    /// untouched and `None` when disabled.
    pub fn normalize<B: Backend>(&self, x: Tensor<B, 3>) -> (Tensor<B, 3>, Option<Tensor<B, 3>>) {
        if !self.enabled {
            return (x, None);
        }

        let mono = x.clone().mean_dim(1);
        let std = mono.var(2).sqrt();
        let x = x / std.clone().add_scalar(self.floor);

        (x, Some(std))
    }

    /// Scale bit logits `[batch, n_bits]` back by the standard deviation from
    /// [normalize](InputNormalizer::normalize).
    pub fn denormalize<B: Backend>(
        &self,
        logits: Tensor<B, 2>,
        std: Option<Tensor<B, 3>>,
    ) -> Tensor<B, 2> {
        match std {
            Some(std) => {
                let [batch, _, _] = std.dims();
                logits * std.reshape([batch, 1])
            }
            None => logits,
        }
    }
}
