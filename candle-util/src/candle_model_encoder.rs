use crate::candle_aux_layers::*;
use crate::candle_loss_functions::{MAX_LN_VAR, MIN_LN_VAR};
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, ModuleT, VarBuilder};

/// Feed-forward encoder `x -> fc -> (mean, log variance)`
pub struct GaussianEncoder {
    n_features: usize,
    n_latent: usize,
    fc: StackLayers<Linear>,
    z_mean: Linear,
    z_lnvar: Linear,
}

impl EncoderModuleT for GaussianEncoder {
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        check_matrix_width(x_nd, self.n_features, "encoder input")?;
        let h_nl = self.fc.forward_t(x_nd, train)?;
        let z_mean_nk = self.z_mean.forward(&h_nl)?;
        let z_lnvar_nk = self.z_lnvar.forward(&h_nl)?.clamp(MIN_LN_VAR, MAX_LN_VAR)?;
        Ok((z_mean_nk, z_lnvar_nk))
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl GaussianEncoder {
    /// Will create a new encoder module with these variables:
    ///
    /// * `nn.enc.fc.{}.weight` where {} is the layer index
    /// * `nn.enc.fc.{}.bn.*`
    /// * `nn.enc.z.mean.weight`
    /// * `nn.enc.z.lnvar.weight`
    pub fn new(
        n_features: usize,
        n_latent: usize,
        layers: &[usize],
        activation: Activation,
        dropout: f32,
        vs: VarBuilder,
    ) -> Result<Self> {
        if layers.is_empty() {
            candle_core::bail!("encoder needs at least one hidden layer");
        }

        // (1) data -> fc
        let (fc, prev_dim) = build_network(
            "nn.enc.fc",
            n_features,
            layers,
            activation,
            dropout,
            vs.clone(),
        )?;

        // (2) fc -> K
        let z_mean = candle_nn::linear(prev_dim, n_latent, vs.pp("nn.enc.z.mean"))?;
        let z_lnvar = candle_nn::linear(prev_dim, n_latent, vs.pp("nn.enc.z.lnvar"))?;

        Ok(Self {
            n_features,
            n_latent,
            fc,
            z_mean,
            z_lnvar,
        })
    }
}

///
/// z = mu + sigma * eps
/// where eps ~ N(0, 1)
///
/// In evaluation mode `z = mu` exactly.
///
/// # Arguments
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
/// * `train` - draw noise or not
pub fn reparameterize(z_mean: &Tensor, z_lnvar: &Tensor, train: bool) -> Result<Tensor> {
    if z_mean.dims() != z_lnvar.dims() {
        candle_core::bail!(
            "mean {:?} and log variance {:?} differ in shape",
            z_mean.dims(),
            z_lnvar.dims()
        );
    }
    if train {
        let eps = Tensor::randn_like(z_mean, 0., 1.)?;
        z_mean + (z_lnvar * 0.5)?.exp()? * eps
    } else {
        Ok(z_mean.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn encoder_shapes() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = GaussianEncoder::new(8, 2, &[16, 4], Activation::Relu, 0.0, vs)?;

        let x = Tensor::rand(0f32, 1f32, (5, 8), &dev)?;
        let (mu, lnvar) = enc.forward_t(&x, false)?;
        assert_eq!(mu.dims(), &[5, 2]);
        assert_eq!(lnvar.dims(), &[5, 2]);
        assert_eq!(enc.dim_obs(), 8);
        assert_eq!(enc.dim_latent(), 2);
        Ok(())
    }

    #[test]
    fn encoder_rejects_wrong_width() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = GaussianEncoder::new(8, 2, &[4], Activation::Relu, 0.0, vs)?;
        let x = Tensor::zeros((3, 7), DType::F32, &dev)?;
        assert!(enc.forward_t(&x, false).is_err());
        Ok(())
    }

    #[test]
    fn eval_sample_is_the_mean() -> Result<()> {
        let dev = Device::Cpu;
        let mu = Tensor::randn(0f32, 1f32, (4, 3), &dev)?;
        let lnvar = Tensor::randn(0f32, 5f32, (4, 3), &dev)?;
        let z = reparameterize(&mu, &lnvar, false)?;
        assert_eq!(z.to_vec2::<f32>()?, mu.to_vec2::<f32>()?);
        Ok(())
    }
}
