use crate::mixture::GmmView;
use candle_core::{Result, Tensor};
use candle_util::candle_loss_functions::LN_2PI;

/// added to every unnormalized score before normalization
pub const SCORE_FLOOR: f64 = 1e-10;

fn check_latent(z_nd: &Tensor, view: &GmmView) -> Result<()> {
    let dd = view.dim_latent()?;
    match z_nd.dims() {
        [_, d] if *d == dd => Ok(()),
        dims => candle_core::bail!("latent codes of shape {:?}, expected (n, {})", dims, dd),
    }
}

/// Log of the weighted component densities
///
/// ln θ(k) - sum_d [ 0.5 * ln(2π λ(d,k)) + (z(n,d) - u(d,k))^2 / (2 λ(d,k)) ]
///
/// * `z_nd` - latent codes (n x d)
///
/// Returns an n x k matrix.
pub fn log_weighted_density(z_nd: &Tensor, view: &GmmView) -> Result<Tensor> {
    check_latent(z_nd, view)?;

    let z_nd1 = z_nd.unsqueeze(2)?;
    let u_1dk = view.u_dk.unsqueeze(0)?;
    let lambda_1dk = view.lambda_dk.unsqueeze(0)?;
    let ln_lambda_1dk = view.ln_lambda_dk.unsqueeze(0)?;

    let maha_ndk = z_nd1
        .broadcast_sub(&u_1dk)?
        .sqr()?
        .broadcast_div(&(lambda_1dk * 2.)?)?;
    let ln_norm_1dk = ((ln_lambda_1dk + LN_2PI)? * 0.5)?;

    let neg_ln_dens_nk = maha_ndk.broadcast_add(&ln_norm_1dk)?.sum(1)?;
    view.ln_theta_k.unsqueeze(0)?.broadcast_sub(&neg_ln_dens_nk)
}

/// Soft cluster assignment (gamma) of each latent code
///
/// score(n,k) = θ(k) * N(z(n) | u(k), diag λ(k)) + 1e-10,
/// gamma(n,k) = score(n,k) / sum_k' score(n,k')
///
/// If every score underflows, the row is uniform over clusters.
///
/// * `z_nd` - latent codes (n x d)
///
/// Returns an n x k matrix whose rows sum to one.
pub fn responsibility(z_nd: &Tensor, view: &GmmView) -> Result<Tensor> {
    let score_nk = (log_weighted_density(z_nd, view)?.exp()? + SCORE_FLOOR)?;
    score_nk.broadcast_div(&score_nk.sum_keepdim(1)?)
}

/// Row-wise argmax of an n x k score or responsibility matrix
pub fn hard_assignment(score_nk: &Tensor) -> Result<Vec<usize>> {
    Ok(score_nk
        .argmax(1)?
        .to_vec1::<u32>()?
        .into_iter()
        .map(|k| k as usize)
        .collect())
}

/// Most probable component of each latent code. Taken from the log
/// densities, so it agrees with the argmax of gamma and still picks
/// the nearest component where every score fell under the floor.
pub fn most_likely_component(z_nd: &Tensor, view: &GmmView) -> Result<Vec<usize>> {
    hard_assignment(&log_weighted_density(z_nd, view)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};

    fn two_cluster_view(dev: &Device) -> Result<GmmView> {
        let theta = Tensor::new(&[0.5f32, 0.5], dev)?;
        let u = Tensor::new(&[[-3f32, 3.], [0., 0.]], dev)?;
        let lambda = Tensor::ones((2, 2), DType::F32, dev)?;
        GmmView::from_raw(&theta, &u, &lambda)
    }

    #[test]
    fn rows_sum_to_one() -> Result<()> {
        let dev = Device::Cpu;
        let view = two_cluster_view(&dev)?;
        let z = Tensor::randn(0f32, 4f32, (50, 2), &dev)?;
        let gamma = responsibility(&z, &view)?;
        assert_eq!(gamma.dims(), &[50, 2]);
        for row in gamma.to_vec2::<f32>()? {
            let tot: f32 = row.iter().sum();
            assert_abs_diff_eq!(tot, 1.0, epsilon = 1e-6);
            assert!(row.iter().all(|&g| (0.0..=1.0).contains(&g)));
        }
        Ok(())
    }

    #[test]
    fn nearest_component_wins() -> Result<()> {
        let dev = Device::Cpu;
        let view = two_cluster_view(&dev)?;
        let z = Tensor::new(&[[-3f32, 0.], [3., 0.], [-2.5, 1.]], &dev)?;
        let gamma = responsibility(&z, &view)?;
        assert_eq!(hard_assignment(&gamma)?, vec![0, 1, 0]);
        Ok(())
    }

    #[test]
    fn underflow_degrades_to_uniform() -> Result<()> {
        let dev = Device::Cpu;
        let view = two_cluster_view(&dev)?;
        let z = Tensor::new(&[[1e4f32, 1e4]], &dev)?;
        let gamma = responsibility(&z, &view)?.to_vec2::<f32>()?;
        assert_abs_diff_eq!(gamma[0][0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(gamma[0][1], 0.5, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn far_codes_still_go_to_the_nearest_component() -> Result<()> {
        let dev = Device::Cpu;
        let view = two_cluster_view(&dev)?;
        let z = Tensor::new(&[[200f32, 0.], [-200., 0.], [-2.5, 1.]], &dev)?;
        let gamma = responsibility(&z, &view)?.to_vec2::<f32>()?;
        assert_abs_diff_eq!(gamma[0][0], 0.5, epsilon = 1e-6);
        assert_eq!(most_likely_component(&z, &view)?, vec![1, 0, 0]);
        Ok(())
    }

    #[test]
    fn wrong_latent_width() -> Result<()> {
        let dev = Device::Cpu;
        let view = two_cluster_view(&dev)?;
        let z = Tensor::zeros((4, 3), DType::F32, &dev)?;
        assert!(responsibility(&z, &view).is_err());
        Ok(())
    }
}
