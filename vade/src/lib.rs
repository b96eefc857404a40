pub mod cluster_log;
pub mod elbo;
pub mod evaluate;
pub mod gmm_init;
pub mod mixture;
pub mod model;
pub mod responsibility;
pub mod simulate;
pub mod train;
