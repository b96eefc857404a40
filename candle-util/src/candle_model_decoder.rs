use crate::candle_aux_layers::*;
use crate::candle_loss_functions::{MAX_LN_VAR, MIN_LN_VAR};
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{ops, Activation, Linear, Module, ModuleT, VarBuilder};

/// Feed-forward decoder `z -> fc -> (mean, log variance)`; with
/// `binary` output the mean goes through a logistic function.
pub struct GaussianDecoder {
    n_features: usize,
    n_latent: usize,
    binary: bool,
    fc: StackLayers<Linear>,
    x_mean: Linear,
    x_lnvar: Linear,
}

impl DecoderModuleT for GaussianDecoder {
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        check_matrix_width(z_nk, self.n_latent, "decoder input")?;
        let h_nl = self.fc.forward_t(z_nk, train)?;
        let x_mean_nd = self.x_mean.forward(&h_nl)?;
        let x_mean_nd = if self.binary {
            ops::sigmoid(&x_mean_nd)?
        } else {
            x_mean_nd
        };
        let x_lnvar_nd = self.x_lnvar.forward(&h_nl)?.clamp(MIN_LN_VAR, MAX_LN_VAR)?;
        Ok((x_mean_nd, x_lnvar_nd))
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl GaussianDecoder {
    /// Will create a new decoder module with these variables:
    ///
    /// * `nn.dec.fc.{}.weight` where {} is the layer index
    /// * `nn.dec.fc.{}.bn.*`
    /// * `nn.dec.x.mean.weight`
    /// * `nn.dec.x.lnvar.weight`
    pub fn new(
        n_features: usize,
        n_latent: usize,
        layers: &[usize],
        activation: Activation,
        dropout: f32,
        binary: bool,
        vs: VarBuilder,
    ) -> Result<Self> {
        if layers.is_empty() {
            candle_core::bail!("decoder needs at least one hidden layer");
        }

        let (fc, prev_dim) = build_network(
            "nn.dec.fc",
            n_latent,
            layers,
            activation,
            dropout,
            vs.clone(),
        )?;

        let x_mean = candle_nn::linear(prev_dim, n_features, vs.pp("nn.dec.x.mean"))?;
        let x_lnvar = candle_nn::linear(prev_dim, n_features, vs.pp("nn.dec.x.lnvar"))?;

        Ok(Self {
            n_features,
            n_latent,
            binary,
            fc,
            x_mean,
            x_lnvar,
        })
    }
}
