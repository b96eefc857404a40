use crate::cluster_log::*;
use crate::gmm_init::{initialize_mixture, MixtureEstimator};
use crate::model::Vade;

use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use candle_util::candle_data_loader::DataLoader;
use candle_util::candle_inference::TrainConfig;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use matrix_util::clustering_metrics::ClusterScores;

/// Loss traces of a full run
pub struct TrainSummary {
    pub pretrain_loss: Vec<f32>,
    pub loss_trace: Vec<f32>,
    pub records: Vec<ClusterRecord>,
}

/// Adam without weight decay over every variable of the model
pub fn build_optimizer(model: &Vade, learning_rate: f64) -> candle_core::Result<AdamW> {
    AdamW::new(
        model.varmap().all_vars(),
        ParamsAdamW {
            lr: learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        },
    )
}

fn progress_bar(len: usize, config: &TrainConfig) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if !config.show_progress || config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    pb
}

/// Reconstruction-only training, encoder mean straight into the
/// decoder; returns the mean minibatch loss of each epoch
pub fn pretrain_autoencoder<D>(
    model: &Vade,
    data: &mut D,
    config: &TrainConfig,
) -> anyhow::Result<Vec<f32>>
where
    D: DataLoader,
{
    let mut adam = build_optimizer(model, config.learning_rate as f64)?;
    let pb = progress_bar(config.num_pretrain_epochs, config);
    let mut trace = Vec::with_capacity(config.num_pretrain_epochs);

    if config.num_pretrain_epochs > 0 {
        info!("Pretraining the autoencoder...");
    }

    for epoch in 0..config.num_pretrain_epochs {
        data.shuffle_minibatch(config.batch_size)?;
        let mut loss_tot = 0f32;
        for b in 0..data.num_minibatch() {
            let mb = data.minibatch_data(b, &config.device)?;
            let loss = model.autoencoder_loss(&mb.input, true)?;
            adam.backward_step(&loss)?;
            loss_tot += loss.to_scalar::<f32>()?;
        }
        let loss = loss_tot / data.num_minibatch() as f32;
        trace.push(loss);
        pb.inc(1);
        if config.verbose {
            info!("[pretrain {}] reconstruction loss: {}", epoch + 1, loss);
        }
    }
    pb.finish_and_clear();
    Ok(trace)
}

/// Run the whole data set in evaluation mode: sample-weighted mean
/// loss, most probable cluster and, with labels, ACC/NMI/ARI
pub fn evaluate_epoch<D>(
    model: &Vade,
    data: &mut D,
    config: &TrainConfig,
    epoch: usize,
) -> anyhow::Result<ClusterRecord>
where
    D: DataLoader,
{
    data.ordered_minibatch(config.batch_size)?;

    let mut loss_tot = 0f64;
    let mut pred = Vec::with_capacity(data.num_data());
    let mut truth = Vec::with_capacity(data.num_data());
    let mut has_labels = true;

    for b in 0..data.num_minibatch() {
        let mb = data.minibatch_data(b, &config.device)?;
        let out = model.loss(&mb.input, false)?;
        let nb = mb.input.dim(0)?;
        loss_tot += out.loss_value()? as f64 * nb as f64;
        pred.extend(model.predict(&mb.input)?.membership);
        match mb.labels {
            Some(y) => truth.extend(y),
            None => has_labels = false,
        }
    }

    let loss = loss_tot / pred.len().max(1) as f64;
    let scores = if has_labels {
        ClusterScores::evaluate(&pred, &truth)?
    } else {
        ClusterScores {
            accuracy: f64::NAN,
            nmi: f64::NAN,
            ari: f64::NAN,
        }
    };

    Ok(ClusterRecord {
        epoch,
        accuracy: scores.accuracy,
        nmi: scores.nmi,
        ari: scores.ari,
        loss,
    })
}

/// End-to-end minibatch training on the negative ELBO. Records go to
/// `sink` at every evaluation epoch. Returns the mean minibatch loss
/// of each epoch.
pub fn train_vade<D, S>(
    model: &Vade,
    data: &mut D,
    config: &TrainConfig,
    sink: &mut S,
) -> anyhow::Result<Vec<f32>>
where
    D: DataLoader,
    S: ClusterLogSink,
{
    let mut adam = build_optimizer(model, config.learning_rate as f64)?;
    let pb = progress_bar(config.num_epochs, config);
    let mut trace = Vec::with_capacity(config.num_epochs);

    info!("Start training VaDE...");

    for epoch in 0..config.num_epochs {
        adam.set_learning_rate(config.learning_rate_at(epoch));
        data.shuffle_minibatch(config.batch_size)?;

        let mut loss_tot = 0f32;
        for b in 0..data.num_minibatch() {
            let mb = data.minibatch_data(b, &config.device)?;
            let out = model.loss(&mb.input, true)?;
            adam.backward_step(&out.loss)?;
            loss_tot += out.loss_value()?;
        }

        let loss = loss_tot / data.num_minibatch() as f32;
        if !loss.is_finite() {
            anyhow::bail!("loss diverged at epoch {}: {}", epoch, loss);
        }
        trace.push(loss);
        pb.inc(1);

        if config.verbose {
            info!("[{}] loss: {}", epoch + 1, loss);
        }

        if config.is_eval_epoch(epoch) {
            let record = evaluate_epoch(model, data, config, epoch)?;
            info!("{}", record);
            sink.append(&record)?;
        }
    }

    pb.finish_and_clear();
    info!("done model training");
    Ok(trace)
}

/// Pretrain, seed the mixture prior once, then train end to end
pub fn fit<D, E, S>(
    model: &Vade,
    data: &mut D,
    estimator: &E,
    config: &TrainConfig,
    sink: &mut S,
) -> anyhow::Result<TrainSummary>
where
    D: DataLoader,
    E: MixtureEstimator,
    S: ClusterLogSink,
{
    let pretrain_loss = pretrain_autoencoder(model, data, config)?;
    initialize_mixture(model, data, estimator, config.batch_size)?;

    let mut records = vec![];
    let mut tee = TeeSink {
        inner: sink,
        records: &mut records,
    };
    let loss_trace = train_vade(model, data, config, &mut tee)?;

    Ok(TrainSummary {
        pretrain_loss,
        loss_trace,
        records,
    })
}

struct TeeSink<'a, S> {
    inner: &'a mut S,
    records: &'a mut Vec<ClusterRecord>,
}

impl<S: ClusterLogSink> ClusterLogSink for TeeSink<'_, S> {
    fn append(&mut self, record: &ClusterRecord) -> anyhow::Result<()> {
        self.records.push(*record);
        self.inner.append(record)
    }
}
