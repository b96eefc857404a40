use crate::gmm_init::embed_all;
use crate::model::{Prediction, Vade};

use candle_util::candle_data_loader::DataLoader;
use log::info;
use matrix_util::clustering::{Kmeans, KmeansArgs};
use matrix_util::clustering_metrics::ClusterScores;
use matrix_util::gmm::{GaussianMixtureOps, GmmArgs};

/// Scores of two independent clusterings of the same embedding
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingReport {
    pub gmm: ClusterScores,
    pub kmeans: ClusterScores,
}

impl std::fmt::Display for EmbeddingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "gmm:    {}", self.gmm)?;
        write!(f, "kmeans: {}", self.kmeans)
    }
}

/// Re-embed the data, then fit a full-covariance mixture and a
/// k-means partition on the embedding and score both against
/// `labels`. For monitoring only; the model is not touched.
pub fn evaluate_embedding<D>(
    model: &Vade,
    data: &mut D,
    labels: &[usize],
    batch_size: usize,
) -> anyhow::Result<EmbeddingReport>
where
    D: DataLoader,
{
    if labels.len() != data.num_data() {
        anyhow::bail!("{} labels for {} samples", labels.len(), data.num_data());
    }

    let z_nd = embed_all(model, data, batch_size)?;
    let k = model.config().n_clusters;

    let fit = z_nd.fit_gmm_rows(&GmmArgs::full(k))?;
    let gmm_pred = fit.predict(&z_nd)?;

    let km_pred = z_nd.kmeans_rows(KmeansArgs::with_clusters(k).with_restarts(10));

    let report = EmbeddingReport {
        gmm: ClusterScores::evaluate(&gmm_pred, labels)?,
        kmeans: ClusterScores::evaluate(&km_pred, labels)?,
    };
    info!("GMM on embedding: {}", report.gmm);
    info!("k-means on embedding: {}", report.kmeans);
    Ok(report)
}

/// Gamma and hard assignment of every observation in the loader's
/// order, computed batch by batch in evaluation mode
pub fn predict_all<D>(model: &Vade, data: &mut D, batch_size: usize) -> anyhow::Result<Prediction>
where
    D: DataLoader,
{
    data.ordered_minibatch(batch_size)?;
    let mut chunks = Vec::with_capacity(data.num_minibatch());
    let mut membership = Vec::with_capacity(data.num_data());
    for b in 0..data.num_minibatch() {
        let mb = data.minibatch_data(b, model.device())?;
        let pred = model.predict(&mb.input)?;
        chunks.push(pred.gamma_nk);
        membership.extend(pred.membership);
    }
    let gamma_nk = candle_core::Tensor::cat(&chunks, 0)?;
    Ok(Prediction {
        gamma_nk,
        membership,
    })
}
