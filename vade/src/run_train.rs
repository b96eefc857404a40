use crate::common::*;

use candle_util::candle_data_loader::InMemoryData;
use candle_util::candle_inference::TrainConfig;
use clap::Args;
use log::info;
use matrix_util::common_io::read_labels;
use vade::cluster_log::CsvClusterLog;
use vade::gmm_init::DiagonalGmm;
use vade::model::*;
use vade::train::fit;

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(long, required = true, help = "Data file (sample x feature)")]
    data: Box<str>,

    #[arg(
        long,
        help = "True cluster labels",
        long_help = "True cluster labels, one per line.\n\
		     Used for monitoring only, never for the loss."
    )]
    labels: Option<Box<str>>,

    #[arg(long, default_value_t = 10, help = "Latent dimension")]
    latent_dim: usize,

    #[arg(long, short = 'k', required = true, help = "Number of clusters")]
    n_clusters: usize,

    #[arg(
        long,
        default_value_t = false,
        help = "Binary data (Bernoulli likelihood)",
        long_help = "Treat data as binary with a Bernoulli likelihood.\n\
		     Otherwise a diagonal Gaussian likelihood is used."
    )]
    binary: bool,

    #[arg(
        long,
        value_delimiter(','),
        default_values_t = vec![500, 500, 2000],
        help = "Encoder hidden layers"
    )]
    encoder_layers: Vec<usize>,

    #[arg(
        long,
        value_delimiter(','),
        default_values_t = vec![2000, 500, 500],
        help = "Decoder hidden layers"
    )]
    decoder_layers: Vec<usize>,

    #[arg(long, value_enum, default_value = "relu", help = "Hidden-layer activation")]
    activation: ActivationKind,

    #[arg(long, default_value_t = 0.0, help = "Dropout probability")]
    dropout: f32,

    #[arg(long, default_value_t = 0.002, help = "Learning rate")]
    learning_rate: f32,

    #[arg(long, default_value_t = 0.0002, help = "Floor of the annealed learning rate")]
    min_learning_rate: f32,

    #[arg(
        long,
        default_value_t = false,
        help = "Anneal the learning rate",
        long_help = "Decay the learning rate by 0.9 every 10 epochs,\n\
		     never below `--min-learning-rate`."
    )]
    anneal: bool,

    #[arg(long, default_value_t = 100, help = "Minibatch size")]
    batch_size: usize,

    #[arg(long, default_value_t = 50, help = "Training epochs")]
    epochs: usize,

    #[arg(long, default_value_t = 0, help = "Autoencoder pretraining epochs")]
    pretrain_epochs: usize,

    #[arg(long, default_value_t = 10, help = "Evaluate every this many epochs")]
    eval_interval: usize,

    #[arg(
        long,
        help = "Initial parameters",
        long_help = "Start from parameters in `{prefix}.safetensors`.\n\
		     Unknown names are skipped; missing ones stay as initialized."
    )]
    init_from: Option<Box<str>>,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\
		     - {out}.safetensors\n\
		     - {out}.config.json\n\
		     - {out}.cluster_log.csv\n"
    )]
    out: Box<str>,

    #[arg(long, value_enum, default_value = "cpu", help = "Compute device")]
    device: ComputeDevice,

    #[arg(long, short, default_value_t = false, help = "Verbosity")]
    verbose: bool,
}

pub fn fit_vade(args: &TrainArgs) -> anyhow::Result<()> {
    let dev = args.device.to_device()?;

    let x_nd = read_data_file(&args.data)?;
    let labels = args.labels.as_deref().map(read_labels).transpose()?;

    let mut config = VadeConfig::new(x_nd.ncols(), args.latent_dim, args.n_clusters, args.binary)
        .with_layers(&args.encoder_layers, &args.decoder_layers);
    config.activation = args.activation;
    config.dropout = args.dropout;

    let model = Vade::new(config, &dev)?;

    if let Some(prefix) = args.init_from.as_deref() {
        model.load_parameters(&format!("{}.safetensors", prefix))?;
    }

    let mut data = match labels.as_deref() {
        Some(y) => InMemoryData::new_with_labels(&x_nd, y)?,
        None => InMemoryData::new(&x_nd)?,
    };

    let train_config = TrainConfig {
        learning_rate: args.learning_rate,
        batch_size: args.batch_size,
        num_epochs: args.epochs,
        num_pretrain_epochs: args.pretrain_epochs,
        eval_interval: args.eval_interval,
        anneal_lr: args.anneal,
        min_learning_rate: args.min_learning_rate,
        device: dev.clone(),
        verbose: args.verbose,
        show_progress: true,
    };

    let mut sink = CsvClusterLog::create(&format!("{}.cluster_log.csv", args.out))?;
    let summary = fit(&model, &mut data, &DiagonalGmm::default(), &train_config, &mut sink)?;

    if let Some(last) = summary.records.last() {
        info!("last evaluation: {}", last);
    }

    info!("Writing down the model parameters");
    model.save(&args.out)?;

    info!("Done");
    Ok(())
}
