use candle_core::{Result, Tensor};

pub trait EncoderModuleT {
    /// An encoder that spits out the parameters of a diagonal
    /// Gaussian posterior over the latent space
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x d)
    /// * `train` - whether to use dropout/batchnorm or not
    ///
    /// # Returns `(z_mean_nk, z_lnvar_nk)`
    /// * `z_mean_nk` - posterior mean (n x k)
    /// * `z_lnvar_nk` - posterior log variance (n x k)
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait DecoderModuleT {
    /// A decoder that spits out reconstruction parameters
    ///
    /// # Returns `(x_mean_nd, x_lnvar_nd)`
    /// * `x_mean_nd` - reconstruction mean (n x d), or probability
    ///   for binary output
    /// * `x_lnvar_nd` - reconstruction log variance (n x d)
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<(Tensor, Tensor)>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

/// Fail fast if `x` is not a matrix with `expected` columns
pub fn check_matrix_width(x: &Tensor, expected: usize, what: &str) -> Result<()> {
    match x.dims() {
        [_, d] if *d == expected => Ok(()),
        [_, d] => candle_core::bail!("{}: expected {} columns, got {}", what, expected, d),
        dims => candle_core::bail!("{}: expected a matrix, got shape {:?}", what, dims),
    }
}
