use crate::elbo::*;
use crate::mixture::*;
use crate::responsibility::{most_likely_component, responsibility};

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use candle_util::candle_checkpoint::*;
use candle_util::candle_model_decoder::GaussianDecoder;
use candle_util::candle_model_encoder::{reparameterize, GaussianEncoder};
use candle_util::candle_model_traits::*;
use clap::ValueEnum;
use log::info;
use serde::{Deserialize, Serialize};
use std::io::Write;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ActivationKind {
    Relu,
    Sigmoid,
}

impl From<ActivationKind> for candle_nn::Activation {
    fn from(act: ActivationKind) -> Self {
        match act {
            ActivationKind::Relu => candle_nn::Activation::Relu,
            ActivationKind::Sigmoid => candle_nn::Activation::Sigmoid,
        }
    }
}

/// Architecture of a model; stored next to every checkpoint
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VadeConfig {
    pub input_dim: usize,
    pub latent_dim: usize,
    pub n_clusters: usize,
    pub binary: bool,
    pub encoder_layers: Vec<usize>,
    pub decoder_layers: Vec<usize>,
    pub activation: ActivationKind,
    pub dropout: f32,
}

impl VadeConfig {
    pub fn new(input_dim: usize, latent_dim: usize, n_clusters: usize, binary: bool) -> Self {
        Self {
            input_dim,
            latent_dim,
            n_clusters,
            binary,
            encoder_layers: vec![500, 500, 2000],
            decoder_layers: vec![2000, 500, 500],
            activation: ActivationKind::Relu,
            dropout: 0.0,
        }
    }

    pub fn with_layers(mut self, encoder_layers: &[usize], decoder_layers: &[usize]) -> Self {
        self.encoder_layers = encoder_layers.to_vec();
        self.decoder_layers = decoder_layers.to_vec();
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input_dim == 0 || self.latent_dim == 0 || self.n_clusters == 0 {
            anyhow::bail!(
                "dimensions must be positive: input {}, latent {}, clusters {}",
                self.input_dim,
                self.latent_dim,
                self.n_clusters
            );
        }
        if self.encoder_layers.is_empty() || self.decoder_layers.is_empty() {
            anyhow::bail!("encoder and decoder need at least one hidden layer each");
        }
        if self
            .encoder_layers
            .iter()
            .chain(self.decoder_layers.iter())
            .any(|&w| w == 0)
        {
            anyhow::bail!("hidden layer widths must be positive");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            anyhow::bail!("dropout {} is not in [0, 1)", self.dropout);
        }
        Ok(())
    }

    pub fn to_json_file(&self, file: &str) -> anyhow::Result<()> {
        let mut writer = matrix_util::common_io::open_buf_writer(file)?;
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn from_json_file(file: &str) -> anyhow::Result<Self> {
        let reader = matrix_util::common_io::open_buf_reader(file)?;
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }
}

/// Everything one forward pass produces
pub struct VadeForward {
    pub z_mean_nd: Tensor,
    pub z_lnvar_nd: Tensor,
    pub z_nd: Tensor,
    pub x_mean_nd: Tensor,
    pub x_lnvar_nd: Tensor,
}

/// Soft and hard cluster assignments in the input order
pub struct Prediction {
    pub gamma_nk: Tensor,
    pub membership: Vec<usize>,
}

/// Variational deep embedding: a VAE whose latent prior is a
/// Gaussian mixture
pub struct Vade {
    config: VadeConfig,
    varmap: VarMap,
    encoder: GaussianEncoder,
    decoder: GaussianDecoder,
    mixture: MixtureParams,
    likelihood: ReconLikelihood,
    device: Device,
}

impl Vade {
    pub fn new(config: VadeConfig, device: &Device) -> anyhow::Result<Self> {
        config.validate()?;

        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let encoder = GaussianEncoder::new(
            config.input_dim,
            config.latent_dim,
            &config.encoder_layers,
            config.activation.into(),
            config.dropout,
            vs.clone(),
        )?;

        let decoder = GaussianDecoder::new(
            config.input_dim,
            config.latent_dim,
            &config.decoder_layers,
            config.activation.into(),
            config.dropout,
            config.binary,
            vs.clone(),
        )?;

        let mixture = MixtureParams::new(config.latent_dim, config.n_clusters, vs)?;
        let likelihood = ReconLikelihood::from_binary(config.binary);

        Ok(Self {
            config,
            varmap,
            encoder,
            decoder,
            mixture,
            likelihood,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &VadeConfig {
        &self.config
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn mixture(&self) -> &MixtureParams {
        &self.mixture
    }

    pub fn likelihood(&self) -> ReconLikelihood {
        self.likelihood
    }

    /// encoder -> sample -> decoder
    pub fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<VadeForward> {
        let (z_mean_nd, z_lnvar_nd) = self.encoder.forward_t(x_nd, train)?;
        let z_nd = reparameterize(&z_mean_nd, &z_lnvar_nd, train)?;
        let (x_mean_nd, x_lnvar_nd) = self.decoder.forward_t(&z_nd, train)?;
        Ok(VadeForward {
            z_mean_nd,
            z_lnvar_nd,
            z_nd,
            x_mean_nd,
            x_lnvar_nd,
        })
    }

    /// Posterior means in evaluation mode
    pub fn embed(&self, x_nd: &Tensor) -> Result<Tensor> {
        Ok(self.encoder.forward_t(x_nd, false)?.0)
    }

    /// Soft cluster assignment of latent codes under the current prior
    pub fn gamma(&self, z_nd: &Tensor) -> Result<Tensor> {
        responsibility(z_nd, &self.mixture.view()?)
    }

    /// Forward pass and the negative ELBO
    pub fn loss(&self, x_nd: &Tensor, train: bool) -> Result<ElboOutput> {
        let fwd = self.forward_t(x_nd, train)?;
        vade_loss(
            self.likelihood,
            &Reconstruction {
                x_nd,
                x_mean_nd: &fwd.x_mean_nd,
                x_lnvar_nd: &fwd.x_lnvar_nd,
            },
            &LatentSample {
                z_nd: &fwd.z_nd,
                z_mean_nd: &fwd.z_mean_nd,
                z_lnvar_nd: &fwd.z_lnvar_nd,
            },
            &self.mixture.view()?,
        )
    }

    /// Reconstruction-only loss with the posterior mean fed straight
    /// into the decoder
    pub fn autoencoder_loss(&self, x_nd: &Tensor, train: bool) -> Result<Tensor> {
        let (z_mean_nd, _) = self.encoder.forward_t(x_nd, train)?;
        let (x_mean_nd, x_lnvar_nd) = self.decoder.forward_t(&z_mean_nd, train)?;
        self.likelihood
            .neg_log_likelihood(&Reconstruction {
                x_nd,
                x_mean_nd: &x_mean_nd,
                x_lnvar_nd: &x_lnvar_nd,
            })?
            .mean_all()
    }

    /// Gamma and the most probable cluster for each row of `x_nd`,
    /// computed in evaluation mode (z = posterior mean)
    pub fn predict(&self, x_nd: &Tensor) -> Result<Prediction> {
        let z_nd = self.embed(x_nd)?;
        let gamma_nk = self.gamma(&z_nd)?;
        let membership = most_likely_component(&z_nd, &self.mixture.view()?)?;
        Ok(Prediction {
            gamma_nk,
            membership,
        })
    }

    /// Write `{prefix}.safetensors` and `{prefix}.config.json`
    pub fn save(&self, prefix: &str) -> anyhow::Result<()> {
        matrix_util::common_io::mkdir(prefix)?;
        save_varmap(&self.varmap, format!("{}.safetensors", prefix))?;
        self.config.to_json_file(&format!("{}.config.json", prefix))?;
        Ok(())
    }

    /// Build from `{prefix}.config.json` and fill in parameters from
    /// `{prefix}.safetensors`
    pub fn load(prefix: &str, device: &Device) -> anyhow::Result<Self> {
        let config = VadeConfig::from_json_file(&format!("{}.config.json", prefix))?;
        let model = Self::new(config, device)?;
        model.load_parameters(&format!("{}.safetensors", prefix))?;
        Ok(model)
    }

    /// Overwrite parameters from a safetensors file; unknown names are
    /// skipped and absent ones keep their current value
    pub fn load_parameters(&self, file: &str) -> anyhow::Result<LoadReport> {
        let report = load_varmap_lenient(&self.varmap, file)?;
        if report.loaded == 0 {
            info!("{}: no matching parameters", file);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> VadeConfig {
        VadeConfig::new(6, 2, 3, true).with_layers(&[8], &[8])
    }

    #[test]
    fn config_validation() {
        assert!(small_config().validate().is_ok());

        let mut bad = small_config();
        bad.n_clusters = 0;
        assert!(bad.validate().is_err());

        let mut bad = small_config();
        bad.dropout = 1.0;
        assert!(bad.validate().is_err());

        let mut bad = small_config();
        bad.encoder_layers.clear();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn config_json_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("m.config.json");
        let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;
        let config = small_config();
        config.to_json_file(file)?;
        assert_eq!(VadeConfig::from_json_file(file)?, config);
        Ok(())
    }

    #[test]
    fn forward_shapes_and_prediction() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let model = Vade::new(small_config(), &dev)?;
        let x = Tensor::rand(0f32, 1f32, (5, 6), &dev)?.round()?;

        let fwd = model.forward_t(&x, true)?;
        assert_eq!(fwd.z_nd.dims(), &[5, 2]);
        assert_eq!(fwd.x_mean_nd.dims(), &[5, 6]);

        let out = model.loss(&x, true)?;
        assert_eq!(out.gamma_nk.dims(), &[5, 3]);
        assert!(out.loss_value()?.is_finite());

        let pred = model.predict(&x)?;
        assert_eq!(pred.membership.len(), 5);
        assert!(pred.membership.iter().all(|&k| k < 3));
        Ok(())
    }

    #[test]
    fn rejects_wrong_input_width() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let model = Vade::new(small_config(), &dev)?;
        let x = Tensor::zeros((4, 5), DType::F32, &dev)?;
        assert!(model.loss(&x, true).is_err());
        Ok(())
    }
}
