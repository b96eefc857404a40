//! Learnable Gaussian-mixture prior over the latent space
//!
//! The mixing weights are stored as softmax logits and the
//! per-cluster variances as log-variances, so every view handed to
//! the responsibility and loss routines lies on the simplex and is
//! strictly positive.

use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::{ops, Init, VarBuilder, VarMap};
use candle_util::candle_checkpoint::overwrite_variable;
use nalgebra::DMatrix;

pub const THETA_LOGIT: &str = "gmm.theta.logit";
pub const MEAN: &str = "gmm.u";
pub const LN_VAR: &str = "gmm.ln_lambda";

/// log-variances of the mixture components are kept in this range
pub const MIN_LN_LAMBDA: f64 = -10.;
pub const MAX_LN_LAMBDA: f64 = 10.;

/// Learnable parameters of the mixture prior
///
/// * `theta_logit_k` - mixing weights before softmax (K)
/// * `u_dk` - component means (D x K)
/// * `ln_lambda_dk` - component log-variances (D x K)
pub struct MixtureParams {
    theta_logit_k: Tensor,
    u_dk: Tensor,
    ln_lambda_dk: Tensor,
    n_latent: usize,
    n_clusters: usize,
}

/// A constrained snapshot of the mixture prior used in computation
#[derive(Clone, Debug)]
pub struct GmmView {
    /// mixing weights (K), summing to one
    pub theta_k: Tensor,
    /// log mixing weights (K)
    pub ln_theta_k: Tensor,
    /// component means (D x K)
    pub u_dk: Tensor,
    /// component variances (D x K), all positive
    pub lambda_dk: Tensor,
    /// component log-variances (D x K)
    pub ln_lambda_dk: Tensor,
}

impl MixtureParams {
    /// Will create these variables:
    ///
    /// * `gmm.theta.logit` zero logits, i.e. uniform weights
    /// * `gmm.u` zeros
    /// * `gmm.ln_lambda` zeros, i.e. unit variances
    pub fn new(n_latent: usize, n_clusters: usize, vs: VarBuilder) -> Result<Self> {
        if n_latent == 0 || n_clusters == 0 {
            candle_core::bail!(
                "mixture needs positive dimensions: latent {}, clusters {}",
                n_latent,
                n_clusters
            );
        }
        let theta_logit_k = vs.get_with_hints(n_clusters, THETA_LOGIT, Init::Const(0.))?;
        let u_dk = vs.get_with_hints((n_latent, n_clusters), MEAN, Init::Const(0.))?;
        let ln_lambda_dk = vs.get_with_hints((n_latent, n_clusters), LN_VAR, Init::Const(0.))?;
        Ok(Self {
            theta_logit_k,
            u_dk,
            ln_lambda_dk,
            n_latent,
            n_clusters,
        })
    }

    pub fn dim_latent(&self) -> usize {
        self.n_latent
    }

    pub fn num_clusters(&self) -> usize {
        self.n_clusters
    }

    /// Softmax on the weights, exponentiated clamped log-variances
    pub fn view(&self) -> Result<GmmView> {
        let ln_theta_k = ops::log_softmax(&self.theta_logit_k, D::Minus1)?;
        let ln_lambda_dk = self.ln_lambda_dk.clamp(MIN_LN_LAMBDA, MAX_LN_LAMBDA)?;
        Ok(GmmView {
            theta_k: ln_theta_k.exp()?,
            ln_theta_k,
            u_dk: self.u_dk.clone(),
            lambda_dk: ln_lambda_dk.exp()?,
            ln_lambda_dk,
        })
    }

    /// Overwrite means and variances with a mixture fitted elsewhere;
    /// the mixing weights stay as they are.
    ///
    /// * `means_kd` - component means (K x D)
    /// * `variances_kd` - diagonal variances (K x D), all positive
    pub fn assign(
        &self,
        varmap: &VarMap,
        means_kd: &DMatrix<f64>,
        variances_kd: &DMatrix<f64>,
    ) -> anyhow::Result<()> {
        let expected = (self.n_clusters, self.n_latent);
        if means_kd.shape() != expected || variances_kd.shape() != expected {
            anyhow::bail!(
                "mixture fit of shape {:?} / {:?}, expected {:?}",
                means_kd.shape(),
                variances_kd.shape(),
                expected
            );
        }
        if variances_kd.iter().any(|&v| !(v > 0.0 && v.is_finite())) {
            anyhow::bail!("mixture fit has a non-positive or non-finite variance");
        }

        let device = self.u_dk.device();
        let u_dk = dk_tensor(means_kd, device)?;
        let ln_lambda_dk = dk_tensor(&variances_kd.map(f64::ln), device)?;

        overwrite_variable(varmap, MEAN, &u_dk)?;
        overwrite_variable(varmap, LN_VAR, &ln_lambda_dk)?;
        Ok(())
    }
}

/// K x D matrix to D x K tensor
fn dk_tensor(kd: &DMatrix<f64>, device: &Device) -> Result<Tensor> {
    let (kk, dd) = kd.shape();
    // column-major storage of K x D is row-major D x K
    let data = kd.iter().map(|&x| x as f32).collect::<Vec<_>>();
    Tensor::from_vec(data, (dd, kk), device)
}

impl GmmView {
    /// Build a view from unconstrained values. Weights are normalized
    /// to sum to one; a non-positive or non-finite weight or variance
    /// is an error.
    ///
    /// * `theta_k` - mixing weights (K)
    /// * `u_dk` - component means (D x K)
    /// * `lambda_dk` - component variances (D x K)
    pub fn from_raw(theta_k: &Tensor, u_dk: &Tensor, lambda_dk: &Tensor) -> Result<Self> {
        let kk = theta_k.dims1()?;
        let (dd, k2) = u_dk.dims2()?;
        if k2 != kk || lambda_dk.dims() != &[dd, kk] {
            candle_core::bail!(
                "inconsistent mixture shapes: theta {:?}, u {:?}, lambda {:?}",
                theta_k.dims(),
                u_dk.dims(),
                lambda_dk.dims()
            );
        }

        let theta = theta_k.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        if theta.iter().any(|&t| !(t > 0.0 && t.is_finite())) {
            candle_core::bail!("mixing weights must be positive and finite: {:?}", theta);
        }
        let lambda = lambda_dk.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        if lambda.iter().any(|&l| !(l > 0.0 && l.is_finite())) {
            candle_core::bail!("mixture variances must be positive and finite");
        }
        let u = u_dk.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        if u.iter().any(|m| !m.is_finite()) {
            candle_core::bail!("mixture means must be finite");
        }

        let theta_k = theta_k.to_dtype(DType::F32)?;
        let theta_k = theta_k.broadcast_div(&theta_k.sum_all()?)?;
        let lambda_dk = lambda_dk.to_dtype(DType::F32)?;

        Ok(Self {
            ln_theta_k: theta_k.log()?,
            theta_k,
            u_dk: u_dk.to_dtype(DType::F32)?,
            ln_lambda_dk: lambda_dk.log()?,
            lambda_dk,
        })
    }

    pub fn dim_latent(&self) -> Result<usize> {
        self.u_dk.dim(0)
    }

    pub fn num_clusters(&self) -> Result<usize> {
        self.u_dk.dim(1)
    }
}
