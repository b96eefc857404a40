//! Negative evidence lower bound of the mixture-prior VAE
//!
//! Per sample n, with γ = responsibility(z):
//!
//! ```text
//! loss(n) = recon(n)
//!         + 0.5 * sum_k γ(n,k) sum_d [ ln 2π + ln λ(d,k) + exp(lnvar(n,d)) / λ(d,k)
//!                                      + (μ(n,d) - u(d,k))^2 / λ(d,k) ]
//!         - 0.5 * sum_d [ 1 + lnvar(n,d) + ln 2π ]
//!         - sum_k γ(n,k) ln θ(k)
//!         + sum_k γ(n,k) ln γ(n,k)
//! ```
//!
//! and the batch loss is the mean over samples.

use crate::mixture::GmmView;
use crate::responsibility::{responsibility, SCORE_FLOOR};
use candle_core::{Result, Tensor};
use candle_util::candle_loss_functions::*;
use serde::{Deserialize, Serialize};

/// How observations are scored against their reconstruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconLikelihood {
    /// binary data; the decoder mean is a probability
    Bernoulli,
    /// continuous data; diagonal Gaussian with the decoder's log-variance
    Gaussian,
}

impl ReconLikelihood {
    pub fn from_binary(binary: bool) -> Self {
        if binary {
            Self::Bernoulli
        } else {
            Self::Gaussian
        }
    }

    /// Negative log-likelihood of each row (n)
    pub fn neg_log_likelihood(&self, recon: &Reconstruction) -> Result<Tensor> {
        let llik_n = match self {
            Self::Bernoulli => bernoulli_log_likelihood(recon.x_nd, recon.x_mean_nd)?,
            Self::Gaussian => {
                gaussian_log_likelihood(recon.x_nd, recon.x_mean_nd, recon.x_lnvar_nd)?
            }
        };
        llik_n.neg()
    }
}

/// Observed data and the decoder output
pub struct Reconstruction<'a> {
    pub x_nd: &'a Tensor,
    pub x_mean_nd: &'a Tensor,
    pub x_lnvar_nd: &'a Tensor,
}

/// A latent sample and the posterior it was drawn from
pub struct LatentSample<'a> {
    pub z_nd: &'a Tensor,
    pub z_mean_nd: &'a Tensor,
    pub z_lnvar_nd: &'a Tensor,
}

/// Each term of the per-sample loss (n) and their batch mean
pub struct ElboOutput {
    pub gamma_nk: Tensor,
    pub loss: Tensor,
    pub recon_n: Tensor,
    pub logpzc_n: Tensor,
    pub qentropy_n: Tensor,
    pub logpc_n: Tensor,
    pub logqcx_n: Tensor,
}

impl ElboOutput {
    /// Total per-sample loss (n)
    pub fn loss_n(&self) -> Result<Tensor> {
        (((&self.recon_n + &self.logpzc_n)? + &self.qentropy_n)? + &self.logpc_n)?
            + &self.logqcx_n
    }

    pub fn loss_value(&self) -> Result<f32> {
        self.loss.to_scalar::<f32>()
    }
}

/// Compute gamma and the negative ELBO averaged over the batch
pub fn vade_loss(
    likelihood: ReconLikelihood,
    recon: &Reconstruction,
    latent: &LatentSample,
    view: &GmmView,
) -> Result<ElboOutput> {
    let nn = latent.z_nd.dim(0)?;
    if recon.x_nd.dims() != recon.x_mean_nd.dims() || recon.x_nd.dim(0)? != nn {
        candle_core::bail!(
            "observations {:?}, reconstruction {:?}, latent {:?}",
            recon.x_nd.dims(),
            recon.x_mean_nd.dims(),
            latent.z_nd.dims()
        );
    }
    if latent.z_mean_nd.dims() != latent.z_nd.dims()
        || latent.z_lnvar_nd.dims() != latent.z_nd.dims()
    {
        candle_core::bail!(
            "posterior mean {:?} / log variance {:?} vs. sample {:?}",
            latent.z_mean_nd.dims(),
            latent.z_lnvar_nd.dims(),
            latent.z_nd.dims()
        );
    }

    let gamma_nk = responsibility(latent.z_nd, view)?;

    // 1. reconstruction
    let recon_n = likelihood.neg_log_likelihood(recon)?;

    // 2. expected log p(z|c)
    let lambda_1dk = view.lambda_dk.unsqueeze(0)?;
    let var_nd1 = latent
        .z_lnvar_nd
        .clamp(MIN_LN_VAR, MAX_LN_VAR)?
        .exp()?
        .unsqueeze(2)?;
    let sq_ndk = latent
        .z_mean_nd
        .unsqueeze(2)?
        .broadcast_sub(&view.u_dk.unsqueeze(0)?)?
        .sqr()?;
    let inner_nk = (var_nd1.broadcast_add(&sq_ndk)?.broadcast_div(&lambda_1dk)?
        .broadcast_add(&(view.ln_lambda_dk.unsqueeze(0)? + LN_2PI)?)?)
    .sum(1)?;
    let logpzc_n = ((&gamma_nk * &inner_nk)?.sum(1)? * 0.5)?;

    // 3. posterior entropy
    let qentropy_n = ((latent.z_lnvar_nd + (1. + LN_2PI))?.sum(1)? * (-0.5))?;

    // 4. log p(c)
    let logpc_n = gamma_nk
        .broadcast_mul(&view.ln_theta_k.unsqueeze(0)?)?
        .sum(1)?
        .neg()?;

    // 5. log q(c|x), added as is
    let logqcx_n = (gamma_nk.maximum(SCORE_FLOOR)?.log()? * &gamma_nk)?.sum(1)?;

    let mut out = ElboOutput {
        loss: Tensor::zeros((), recon_n.dtype(), recon_n.device())?,
        gamma_nk,
        recon_n,
        logpzc_n,
        qentropy_n,
        logpc_n,
        logqcx_n,
    };
    out.loss = out.loss_n()?.mean_all()?;
    Ok(out)
}
