use candle_core::{Result, Tensor};

/// ln(2π)
pub const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// log-variances are clamped into `[MIN_LN_VAR, MAX_LN_VAR]` before
/// exponentiation
pub const MIN_LN_VAR: f64 = -10.;
pub const MAX_LN_VAR: f64 = 10.;

/// probabilities are floored before taking logs
pub const PROB_FLOOR: f64 = 1e-10;

fn check_same_shape(a: &Tensor, b: &Tensor, what: &str) -> Result<()> {
    if a.dims() != b.dims() {
        candle_core::bail!("{}: shape {:?} vs. {:?}", what, a.dims(), b.dims());
    }
    Ok(())
}

/// Log-density of each row under the unit Gaussian
///
/// llik(i) = -0.5 * D * log(2π) - 0.5 * sum_d z(i,d)^2
///
/// * `z_nd` - samples (n x d)
///
pub fn unit_gaussian_log_likelihood(z_nd: &Tensor) -> Result<Tensor> {
    let last = z_nd.rank() - 1;
    let dd = z_nd.dim(last)? as f64;
    (z_nd.sqr()?.sum(last)? * (-0.5))? - 0.5 * dd * LN_2PI
}

/// Log-density of each row under a diagonal Gaussian
///
/// llik(i) = -0.5 * D * log(2π)
///           - sum_d [ 0.5 * (x(i,d) - μ(i,d))^2 / exp(lnvar(i,d)) + 0.5 * lnvar(i,d) ]
///
/// `lnvar` is clamped into `[MIN_LN_VAR, MAX_LN_VAR]` so the result
/// stays finite for any finite input.
///
/// * `x_nd` - samples (n x d)
/// * `mu_nd` - mean (n x d)
/// * `lnvar_nd` - log variance (n x d)
///
pub fn gaussian_log_likelihood(x_nd: &Tensor, mu_nd: &Tensor, lnvar_nd: &Tensor) -> Result<Tensor> {
    check_same_shape(x_nd, mu_nd, "gaussian mean")?;
    check_same_shape(x_nd, lnvar_nd, "gaussian log-variance")?;

    let last = x_nd.rank() - 1;
    let dd = x_nd.dim(last)? as f64;
    let lnvar_nd = lnvar_nd.clamp(MIN_LN_VAR, MAX_LN_VAR)?;

    let maha_nd = x_nd.sub(mu_nd)?.sqr()?.div(&lnvar_nd.exp()?)?;
    let term_n = (maha_nd + &lnvar_nd)?.sum(last)?;
    (term_n * (-0.5))? - 0.5 * dd * LN_2PI
}

/// Bernoulli log-likelihood of binary data
///
/// llik(i) = sum_d x(i,d) * log p(i,d) + (1 - x(i,d)) * log(1 - p(i,d))
///
/// Both `p` and `1 - p` are floored at `PROB_FLOOR`.
///
/// * `x_nd` - data tensor (observed data)
/// * `p_nd` - probability tensor (reconstruction)
///
pub fn bernoulli_log_likelihood(x_nd: &Tensor, p_nd: &Tensor) -> Result<Tensor> {
    check_same_shape(x_nd, p_nd, "bernoulli probability")?;

    let last = x_nd.rank() - 1;
    let log_p = p_nd.maximum(PROB_FLOOR)?.log()?;
    let log_1mp = p_nd.affine(-1., 1.)?.maximum(PROB_FLOOR)?.log()?;

    (x_nd.mul(&log_p)? + x_nd.affine(-1., 1.)?.mul(&log_1mp)?)?.sum(last)
}
