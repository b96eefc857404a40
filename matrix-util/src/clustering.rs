//! K-means clustering traits for matrices
//!
//! Provides traits for clustering rows of matrices using the
//! `clustering` crate.

use nalgebra::DMatrix;
use num_traits::ToPrimitive;

/// Arguments for k-means clustering
#[derive(Debug, Clone)]
pub struct KmeansArgs {
    /// Number of clusters
    pub num_clusters: usize,
    /// Maximum number of iterations
    pub max_iter: usize,
    /// Number of restarts; the partition with the smallest
    /// within-cluster sum of squares wins
    pub num_init: usize,
}

impl Default for KmeansArgs {
    fn default() -> Self {
        Self {
            num_clusters: 1,
            max_iter: 100,
            num_init: 1,
        }
    }
}

impl KmeansArgs {
    /// Create args with specified number of clusters
    pub fn with_clusters(num_clusters: usize) -> Self {
        Self {
            num_clusters,
            ..Default::default()
        }
    }

    pub fn with_restarts(mut self, num_init: usize) -> Self {
        self.num_init = num_init.max(1);
        self
    }
}

/// Trait for k-means clustering on matrices
pub trait Kmeans {
    /// Cluster rows and return membership vector
    ///
    /// # Arguments
    /// * `args` - Clustering parameters
    ///
    /// # Returns
    /// Vector of cluster assignments, one per row
    fn kmeans_rows(&self, args: KmeansArgs) -> Vec<usize>;
}

impl<T> Kmeans for DMatrix<T>
where
    T: nalgebra::Scalar + ToPrimitive + Copy + Sync + Send,
    Vec<T>: clustering::Elem,
{
    fn kmeans_rows(&self, args: KmeansArgs) -> Vec<usize> {
        if args.num_clusters <= 1 || self.nrows() == 0 {
            return vec![0; self.nrows()];
        }

        let data: Vec<Vec<T>> = self
            .row_iter()
            .map(|x| x.iter().cloned().collect())
            .collect();

        (0..args.num_init.max(1))
            .map(|_| {
                let clust = clustering::kmeans(args.num_clusters, &data, args.max_iter);
                let wss = within_cluster_sum_of_squares(self, &clust.membership);
                (wss, clust.membership)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, membership)| membership)
            .unwrap_or_else(|| vec![0; self.nrows()])
    }
}

/// Total squared distance between each row and the centroid of its
/// cluster
pub fn within_cluster_sum_of_squares<T>(data: &DMatrix<T>, membership: &[usize]) -> f64
where
    T: nalgebra::Scalar + ToPrimitive + Copy,
{
    let x = data.map(|v| v.to_f64().unwrap_or(f64::NAN));
    let k = membership.iter().max().map(|m| m + 1).unwrap_or(0);

    let mut centroids = DMatrix::<f64>::zeros(k, x.ncols());
    let mut counts = vec![0usize; k];
    for (i, &c) in membership.iter().enumerate() {
        let mut row = centroids.row_mut(c);
        row += x.row(i);
        counts[c] += 1;
    }
    for (c, &n) in counts.iter().enumerate() {
        if n > 0 {
            centroids.row_mut(c).unscale_mut(n as f64);
        }
    }

    membership
        .iter()
        .enumerate()
        .map(|(i, &c)| (x.row(i) - centroids.row(c)).norm_squared())
        .sum()
}
