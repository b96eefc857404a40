use crate::model::Vade;

use candle_util::candle_data_loader::DataLoader;
use log::{info, warn};
use matrix_util::dmatrix_io::*;
use matrix_util::gmm::*;
use matrix_util::traits::ConvertMatOps;

/// A mixture fitter to seed the latent prior
pub trait MixtureEstimator {
    /// Fit `k` components on the rows of `data_nd`
    fn fit(&self, data_nd: &DMatrix<f64>, k: usize) -> anyhow::Result<GmmFit>;
}

/// EM with diagonal covariances initialized by k-means, restarted
/// `num_init` times
///
/// Every variance is floored at `relative_reg_covar` times the average
/// per-dimension variance of the embedding. Embeddings of discrete
/// data pile many rows onto identical points, and without a floor on
/// that scale a component can shrink onto one of them.
#[derive(Debug, Clone)]
pub struct DiagonalGmm {
    pub max_iter: usize,
    pub relative_reg_covar: f64,
    pub kmeans_restarts: usize,
    pub num_init: usize,
}

impl Default for DiagonalGmm {
    fn default() -> Self {
        Self {
            max_iter: 300,
            relative_reg_covar: 1e-2,
            kmeans_restarts: 10,
            num_init: 5,
        }
    }
}

/// smallest variance floor regardless of the data scale
const MIN_REG_COVAR: f64 = 1e-6;

/// Average over columns of the per-column variance
pub fn mean_column_variance(data_nd: &DMatrix<f64>) -> f64 {
    if data_nd.nrows() == 0 || data_nd.ncols() == 0 {
        return 0.0;
    }
    let total: f64 = data_nd.column_iter().map(|col| col.variance()).sum();
    total / data_nd.ncols() as f64
}

impl DiagonalGmm {
    /// The absolute variance floor used for `data_nd`
    pub fn reg_covar_for(&self, data_nd: &DMatrix<f64>) -> f64 {
        (self.relative_reg_covar * mean_column_variance(data_nd)).max(MIN_REG_COVAR)
    }
}

impl MixtureEstimator for DiagonalGmm {
    fn fit(&self, data_nd: &DMatrix<f64>, k: usize) -> anyhow::Result<GmmFit> {
        let reg_covar = self.reg_covar_for(data_nd);
        let mut args = GmmArgs::diagonal(k)
            .with_max_iter(self.max_iter)
            .with_reg_covar(reg_covar)
            .with_num_init(self.num_init);
        args.kmeans_restarts = self.kmeans_restarts;

        let fit = data_nd.fit_gmm_rows(&args)?;

        if fit.min_variance() < 1.01 * reg_covar {
            warn!(
                "a mixture component sits at the variance floor {:.3e}",
                reg_covar
            );
        }
        Ok(fit)
    }
}

/// Posterior means of every observation in the loader's order
pub fn embed_all<D>(model: &Vade, data: &mut D, batch_size: usize) -> anyhow::Result<DMatrix<f64>>
where
    D: DataLoader,
{
    data.ordered_minibatch(batch_size)?;
    let mut chunks = Vec::with_capacity(data.num_minibatch());
    for b in 0..data.num_minibatch() {
        let mb = data.minibatch_data(b, model.device())?;
        chunks.push(model.embed(&mb.input)?);
    }
    let z_nd = candle_core::Tensor::cat(&chunks, 0)?;
    DMatrix::<f64>::from_tensor(&z_nd)
}

/// One-shot seeding of the mixture prior: embed the data in
/// evaluation mode, fit a diagonal-covariance mixture on the
/// embeddings, copy its means into `u` and its variances into
/// `lambda`.
pub fn initialize_mixture<D, E>(
    model: &Vade,
    data: &mut D,
    estimator: &E,
    batch_size: usize,
) -> anyhow::Result<()>
where
    D: DataLoader,
    E: MixtureEstimator,
{
    let z_nd = embed_all(model, data, batch_size)?;
    let k = model.config().n_clusters;

    info!(
        "fitting a {}-component mixture on {} x {} embeddings",
        k,
        z_nd.nrows(),
        z_nd.ncols()
    );

    let fit = estimator.fit(&z_nd, k)?;

    info!(
        "mixture fit: log-likelihood {:.4} after {} iterations",
        fit.log_likelihood, fit.num_iter
    );

    model
        .mixture()
        .assign(model.varmap(), &fit.means, &fit.variances())
}
