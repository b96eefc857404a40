use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{Bernoulli, Distribution, Normal};

/// Synthetic data with known cluster labels
pub struct SimulatedData {
    pub data_nd: DMatrix<f32>,
    pub labels: Vec<usize>,
}

/// Binary vectors from `k` Bernoulli clusters. Features are split
/// into `k` contiguous blocks; members of cluster `c` switch on the
/// features of block `c` with probability `p_on` and all others with
/// probability `1 - p_on`. Labels cycle through the clusters.
pub fn bernoulli_clusters<R: Rng>(
    n: usize,
    d: usize,
    k: usize,
    p_on: f64,
    rng: &mut R,
) -> anyhow::Result<SimulatedData> {
    if k == 0 || d < k {
        anyhow::bail!("need 0 < k <= d, got k = {}, d = {}", k, d);
    }
    let on = Bernoulli::new(p_on)?;
    let off = Bernoulli::new(1.0 - p_on)?;
    let block = d.div_ceil(k);

    let labels: Vec<usize> = (0..n).map(|i| i % k).collect();
    let mut data_nd = DMatrix::<f32>::zeros(n, d);
    for (i, &c) in labels.iter().enumerate() {
        for j in 0..d {
            let bit = if j / block == c {
                on.sample(rng)
            } else {
                off.sample(rng)
            };
            data_nd[(i, j)] = if bit { 1.0 } else { 0.0 };
        }
    }
    Ok(SimulatedData { data_nd, labels })
}

/// Continuous vectors from `k` isotropic Gaussian clusters with
/// centers drawn from N(0, separation^2)
pub fn gaussian_clusters<R: Rng>(
    n: usize,
    d: usize,
    k: usize,
    separation: f64,
    rng: &mut R,
) -> anyhow::Result<SimulatedData> {
    if k == 0 || d == 0 {
        anyhow::bail!("need positive k and d, got k = {}, d = {}", k, d);
    }
    let centers = Normal::new(0.0, separation)?;
    let noise = Normal::new(0.0, 1.0)?;
    let mu_kd = DMatrix::<f64>::from_fn(k, d, |_, _| centers.sample(rng));

    let labels: Vec<usize> = (0..n).map(|i| i % k).collect();
    let data_nd = DMatrix::<f32>::from_fn(n, d, |i, j| {
        (mu_kd[(labels[i], j)] + noise.sample(rng)) as f32
    });
    Ok(SimulatedData { data_nd, labels })
}
