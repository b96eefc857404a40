//! Gaussian mixture models fitted by expectation-maximization
//!
//! ```text
//! p(x) = Σ_k π_k N(x | μ_k, Σ_k)
//! ```
//!
//! E-step: `r(n,k) ∝ π_k N(x_n | μ_k, Σ_k)`, normalized in log space.
//! M-step: `N_k = Σ_n r(n,k)`, `π_k = N_k / N`, `μ_k = Σ_n r(n,k) x_n / N_k`,
//! `Σ_k = Σ_n r(n,k) (x_n - μ_k)(x_n - μ_k)' / N_k + reg * I`
//! (only the diagonal in the diagonal model).
//!
//! Responsibilities are seeded from a k-means partition. With
//! `num_init > 1` EM restarts from fresh k-means seeds and the fit
//! with the highest log-likelihood is kept. Failure to converge, a
//! non-finite likelihood, an ill-defined covariance, or a component
//! left with almost no data are all reported as errors; a restart
//! that fails this way is dropped, and only when every restart fails
//! is the error returned.

use crate::clustering::{Kmeans, KmeansArgs};
use nalgebra::{Cholesky, DMatrix, DVector};
use rayon::prelude::*;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovarianceType {
    Diagonal,
    Full,
}

/// Arguments for a Gaussian mixture fit
#[derive(Debug, Clone)]
pub struct GmmArgs {
    pub num_components: usize,
    pub covariance: CovarianceType,
    pub max_iter: usize,
    /// stop when the mean log-likelihood improves less than this
    pub tol: f64,
    /// added to every variance
    pub reg_covar: f64,
    /// a component whose effective sample count falls below this
    /// makes the fit degenerate
    pub min_component_size: f64,
    pub kmeans_restarts: usize,
    /// independent EM runs; the best log-likelihood wins
    pub num_init: usize,
}

impl GmmArgs {
    pub fn new(num_components: usize, covariance: CovarianceType) -> Self {
        Self {
            num_components,
            covariance,
            max_iter: 300,
            tol: 1e-3,
            reg_covar: 1e-6,
            min_component_size: 1.0,
            kmeans_restarts: 10,
            num_init: 1,
        }
    }

    pub fn diagonal(num_components: usize) -> Self {
        Self::new(num_components, CovarianceType::Diagonal)
    }

    pub fn full(num_components: usize) -> Self {
        Self::new(num_components, CovarianceType::Full)
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_reg_covar(mut self, reg_covar: f64) -> Self {
        self.reg_covar = reg_covar;
        self
    }

    pub fn with_num_init(mut self, num_init: usize) -> Self {
        self.num_init = num_init.max(1);
        self
    }
}

#[derive(Debug, Clone)]
pub enum Covariances {
    /// `k x d` variances
    Diagonal(DMatrix<f64>),
    /// `k` matrices, each `d x d`
    Full(Vec<DMatrix<f64>>),
}

/// A fitted mixture
#[derive(Debug, Clone)]
pub struct GmmFit {
    /// mixing weights, length `k`
    pub weights: DVector<f64>,
    /// `k x d` component means
    pub means: DMatrix<f64>,
    pub covariances: Covariances,
    /// average log-likelihood per sample at the last iteration
    pub log_likelihood: f64,
    pub num_iter: usize,
}

/// Fit a Gaussian mixture on the rows of a matrix
pub trait GaussianMixtureOps {
    fn fit_gmm_rows(&self, args: &GmmArgs) -> anyhow::Result<GmmFit>;
}

impl GaussianMixtureOps for DMatrix<f64> {
    fn fit_gmm_rows(&self, args: &GmmArgs) -> anyhow::Result<GmmFit> {
        let (nn, kk) = (self.nrows(), args.num_components);

        if kk == 0 {
            return Err(anyhow::anyhow!("need at least one mixture component"));
        }
        if nn < kk {
            return Err(anyhow::anyhow!(
                "{} samples cannot support {} mixture components",
                nn,
                kk
            ));
        }
        if self.iter().any(|x| !x.is_finite()) {
            return Err(anyhow::anyhow!("non-finite values in the data"));
        }

        let mut best: Option<GmmFit> = None;
        let mut last_err = None;

        for run in 0..args.num_init.max(1) {
            match fit_once(self, args) {
                Ok(fit) => {
                    log::debug!(
                        "GMM run {}: log-likelihood {:.5} after {} iterations",
                        run,
                        fit.log_likelihood,
                        fit.num_iter
                    );
                    if best
                        .as_ref()
                        .is_none_or(|b| fit.log_likelihood > b.log_likelihood)
                    {
                        best = Some(fit);
                    }
                }
                Err(err) => {
                    log::debug!("GMM run {} failed: {}", run, err);
                    last_err = Some(err);
                }
            }
        }

        match (best, last_err) {
            (Some(fit), _) => Ok(fit),
            (None, Some(err)) => Err(err),
            (None, None) => Err(anyhow::anyhow!("no mixture fit was attempted")),
        }
    }
}

/// One EM run from a fresh k-means seeding
fn fit_once(data: &DMatrix<f64>, args: &GmmArgs) -> anyhow::Result<GmmFit> {
    let (nn, kk) = (data.nrows(), args.num_components);
    let membership =
        data.kmeans_rows(KmeansArgs::with_clusters(kk).with_restarts(args.kmeans_restarts));

    let mut resp = DMatrix::<f64>::zeros(nn, kk);
    for (i, &c) in membership.iter().enumerate() {
        resp[(i, c.min(kk - 1))] = 1.0;
    }

    let mut fit = m_step(data, &resp, args)?;
    let mut prev_llik = f64::NEG_INFINITY;
    let mut converged = false;

    for iter in 0..args.max_iter {
        let (log_resp, llik) = e_step(data, &fit)?;

        if !llik.is_finite() {
            return Err(anyhow::anyhow!(
                "mixture log-likelihood became {} at iteration {}",
                llik,
                iter
            ));
        }

        resp = log_resp.map(f64::exp);
        fit = m_step(data, &resp, args)?;
        fit.log_likelihood = llik;
        fit.num_iter = iter + 1;

        if (llik - prev_llik).abs() < args.tol {
            converged = true;
            break;
        }
        prev_llik = llik;
    }

    if !converged {
        return Err(anyhow::anyhow!(
            "mixture fit did not converge in {} iterations (last log-likelihood {:.5})",
            args.max_iter,
            fit.log_likelihood
        ));
    }

    let num_effective = fit
        .weights
        .iter()
        .filter(|&&w| w * nn as f64 >= args.min_component_size)
        .count();

    if num_effective < kk {
        return Err(anyhow::anyhow!(
            "mixture fit is degenerate: {} effective components out of {}",
            num_effective,
            kk
        ));
    }

    Ok(fit)
}

impl GmmFit {
    pub fn num_components(&self) -> usize {
        self.means.nrows()
    }

    pub fn dim(&self) -> usize {
        self.means.ncols()
    }

    /// Variances as a `k x d` matrix; the diagonal of each full
    /// covariance matrix
    pub fn variances(&self) -> DMatrix<f64> {
        match &self.covariances {
            Covariances::Diagonal(var_kd) => var_kd.clone(),
            Covariances::Full(cov_k) => DMatrix::from_fn(self.num_components(), self.dim(), |k, j| {
                cov_k[k][(j, j)]
            }),
        }
    }

    /// Smallest variance over all components and dimensions
    pub fn min_variance(&self) -> f64 {
        self.variances().min()
    }

    /// `n x k` posterior membership probabilities
    pub fn predict_proba(&self, data: &DMatrix<f64>) -> anyhow::Result<DMatrix<f64>> {
        self.check_dim(data)?;
        Ok(e_step(data, self)?.0.map(f64::exp))
    }

    /// Most probable component for each row
    pub fn predict(&self, data: &DMatrix<f64>) -> anyhow::Result<Vec<usize>> {
        let prob = self.predict_proba(data)?;
        Ok(prob.row_iter().map(|row| row.transpose().argmax().0).collect())
    }

    fn check_dim(&self, data: &DMatrix<f64>) -> anyhow::Result<()> {
        if data.ncols() != self.dim() {
            return Err(anyhow::anyhow!(
                "data has {} columns, but the mixture was fitted on {}",
                data.ncols(),
                self.dim()
            ));
        }
        Ok(())
    }

    /// `n x k` matrix of `ln π_k + ln N(x_n | μ_k, Σ_k)`
    fn weighted_log_prob(&self, data: &DMatrix<f64>) -> anyhow::Result<DMatrix<f64>> {
        let (nn, kk, dd) = (data.nrows(), self.num_components(), self.dim());
        let log_weights = self.weights.map(f64::ln);

        let rows: Vec<Vec<f64>> = match &self.covariances {
            Covariances::Diagonal(var_kd) => {
                let log_det: Vec<f64> = (0..kk).map(|k| var_kd.row(k).map(f64::ln).sum()).collect();
                (0..nn)
                    .into_par_iter()
                    .map(|i| {
                        (0..kk)
                            .map(|k| {
                                let maha: f64 = (0..dd)
                                    .map(|j| {
                                        let diff = data[(i, j)] - self.means[(k, j)];
                                        diff * diff / var_kd[(k, j)]
                                    })
                                    .sum();
                                log_weights[k] - 0.5 * (dd as f64 * LN_2PI + log_det[k] + maha)
                            })
                            .collect()
                    })
                    .collect()
            }
            Covariances::Full(cov_k) => {
                let chol_k = cov_k
                    .iter()
                    .enumerate()
                    .map(|(k, cov)| {
                        Cholesky::new(cov.clone()).map(|c| c.l()).ok_or_else(|| {
                            anyhow::anyhow!("covariance of component {} is not positive definite", k)
                        })
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;
                let log_det: Vec<f64> = chol_k
                    .iter()
                    .map(|l| 2.0 * l.diagonal().map(f64::ln).sum())
                    .collect();

                (0..nn)
                    .into_par_iter()
                    .map(|i| {
                        (0..kk)
                            .map(|k| {
                                let diff: DVector<f64> =
                                    (data.row(i) - self.means.row(k)).transpose();
                                let maha = chol_k[k]
                                    .solve_lower_triangular(&diff)
                                    .map(|y| y.norm_squared())
                                    .unwrap_or(f64::INFINITY);
                                log_weights[k] - 0.5 * (dd as f64 * LN_2PI + log_det[k] + maha)
                            })
                            .collect()
                    })
                    .collect()
            }
        };

        Ok(DMatrix::from_fn(nn, kk, |i, k| rows[i][k]))
    }
}

/// Returns `(log responsibilities, mean log-likelihood)`
fn e_step(data: &DMatrix<f64>, fit: &GmmFit) -> anyhow::Result<(DMatrix<f64>, f64)> {
    let mut log_prob = fit.weighted_log_prob(data)?;
    let nn = log_prob.nrows();
    let mut llik = 0.0;

    for i in 0..nn {
        let mut row = log_prob.row_mut(i);
        let max_val = row.max();
        let lse = if max_val.is_finite() {
            max_val + row.map(|v| (v - max_val).exp()).sum().ln()
        } else {
            max_val
        };
        row.add_scalar_mut(-lse);
        llik += lse;
    }

    Ok((log_prob, llik / nn.max(1) as f64))
}

fn m_step(data: &DMatrix<f64>, resp: &DMatrix<f64>, args: &GmmArgs) -> anyhow::Result<GmmFit> {
    let (nn, dd, kk) = (data.nrows(), data.ncols(), resp.ncols());

    // keep empty components from dividing by zero
    let nk: DVector<f64> = resp.row_sum().transpose().add_scalar(10.0 * f64::EPSILON);
    let weights = &nk / nn as f64;

    // k x d
    let mut means = resp.transpose() * data;
    for k in 0..kk {
        means.row_mut(k).unscale_mut(nk[k]);
    }

    let covariances = match args.covariance {
        CovarianceType::Diagonal => {
            let mut var_kd = DMatrix::<f64>::zeros(kk, dd);
            for k in 0..kk {
                for j in 0..dd {
                    let ss: f64 = (0..nn)
                        .map(|i| {
                            let diff = data[(i, j)] - means[(k, j)];
                            resp[(i, k)] * diff * diff
                        })
                        .sum();
                    var_kd[(k, j)] = ss / nk[k] + args.reg_covar;
                }
            }
            Covariances::Diagonal(var_kd)
        }
        CovarianceType::Full => {
            let cov_k = (0..kk)
                .map(|k| {
                    let mut cov = DMatrix::<f64>::zeros(dd, dd);
                    for i in 0..nn {
                        let diff: DVector<f64> = (data.row(i) - means.row(k)).transpose();
                        cov += (&diff * diff.transpose()) * resp[(i, k)];
                    }
                    cov.unscale_mut(nk[k]);
                    for j in 0..dd {
                        cov[(j, j)] += args.reg_covar;
                    }
                    cov
                })
                .collect();
            Covariances::Full(cov_k)
        }
    };

    Ok(GmmFit {
        weights,
        means,
        covariances,
        log_likelihood: f64::NEG_INFINITY,
        num_iter: 0,
    })
}
