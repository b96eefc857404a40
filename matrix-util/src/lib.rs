pub mod clustering;
pub mod clustering_metrics;
pub mod common_io;
pub mod dmatrix_io;
pub mod gmm;
pub mod traits;
