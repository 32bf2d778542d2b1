use burn::{
    config::Config,
    module::Module,
    nn::{BiLstm, BiLstmConfig, Linear, LinearConfig, Lstm, LstmConfig, LstmState},
    tensor::{backend::Backend, Device, Tensor},
};

#[allow(clippy::large_enum_variant)]
#[derive(Module, Debug)]
enum RecurrentLayer<B: Backend> {
    Forward(Lstm<B>),
    Bidirectional(BiLstm<B>),
}

/// Stacked (bi)directional LSTM over the deepest encoder feature map.
///
/// When bidirectional, the concatenated forward/backward outputs are projected back to `dim`
/// channels.
#[derive(Module, Debug)]
pub struct RecurrentBottleneck<B: Backend> {
    layers: Vec<RecurrentLayer<B>>,
    linear: Option<Linear<B>>,
}

impl<B: Backend> RecurrentBottleneck<B> {
    /// Run the recurrent stack.
    ///
    /// # Arguments
    ///
    /// * `x` - Sequence of shape `[batch, time, dim]`.
    /// * `state` - Initial state, cell and hidden of shape `[layers * directions, batch, dim]`.
    ///
    /// # Returns
    ///
    /// The output sequence `[batch, time, dim]` and the final state of every layer and
    /// direction, in the same layout as the initial state.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        state: Option<LstmState<B, 3>>,
    ) -> (Tensor<B, 3>, LstmState<B, 3>) {
        let directions = self.directions();
        let mut cells = Vec::with_capacity(self.layers.len());
        let mut hiddens = Vec::with_capacity(self.layers.len());

        let mut x = x;
        for (index, layer) in self.layers.iter().enumerate() {
            let init = state.as_ref().map(|state| {
                LstmState::new(
                    state.cell.clone().narrow(0, index * directions, directions),
                    state.hidden.clone().narrow(0, index * directions, directions),
                )
            });

            let (output, layer_state) = match layer {
                RecurrentLayer::Forward(lstm) => {
                    let init = init.map(|s| {
                        LstmState::new(s.cell.squeeze::<2>(0), s.hidden.squeeze::<2>(0))
                    });
                    let (output, s) = lstm.forward(x, init);
                    (
                        output,
                        LstmState::new(
                            s.cell.unsqueeze_dim::<3>(0),
                            s.hidden.unsqueeze_dim::<3>(0),
                        ),
                    )
                }
                RecurrentLayer::Bidirectional(lstm) => lstm.forward(x, init),
            };

            x = output;
            cells.push(layer_state.cell);
            hiddens.push(layer_state.hidden);
        }

        if let Some(linear) = &self.linear {
            x = linear.forward(x);
        }

        (x, LstmState::new(Tensor::cat(cells, 0), Tensor::cat(hiddens, 0)))
    }

    pub fn directions(&self) -> usize {
        if self.linear.is_some() {
            2
        } else {
            1
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

/// [Recurrent bottleneck](RecurrentBottleneck) configuration.
#[derive(Config, Debug)]
pub struct RecurrentBottleneckConfig {
    /// Input, hidden and output width.
    pub dim: usize,
    #[config(default = "2")]
    pub layers: usize,
    #[config(default = true)]
    pub bidirectional: bool,
}

impl RecurrentBottleneckConfig {
    /// Initialize a new [recurrent bottleneck](RecurrentBottleneck) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> RecurrentBottleneck<B> {
        let layers = (0..self.layers)
            .map(|index| {
                if self.bidirectional {
                    // Deeper layers read both directions
                    let d_input = if index == 0 { self.dim } else { 2 * self.dim };
                    RecurrentLayer::Bidirectional(
                        BiLstmConfig::new(d_input, self.dim, true).init(device),
                    )
                } else {
                    RecurrentLayer::Forward(LstmConfig::new(self.dim, self.dim, true).init(device))
                }
            })
            .collect();

        let linear = self
            .bidirectional
            .then(|| LinearConfig::new(2 * self.dim, self.dim).init(device));

        RecurrentBottleneck { layers, linear }
    }
}
