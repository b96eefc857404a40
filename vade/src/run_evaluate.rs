use crate::common::*;

use candle_util::candle_data_loader::InMemoryData;
use clap::Args;
use matrix_util::clustering_metrics::ClusterScores;
use matrix_util::common_io::read_labels;
use vade::evaluate::{evaluate_embedding, predict_all};
use vade::model::Vade;

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    #[arg(long, required = true, help = "Data file (sample x feature)")]
    data: Box<str>,

    #[arg(long, required = true, help = "True cluster labels, one per line")]
    labels: Box<str>,

    #[arg(long, required = true, help = "Model header (`{model}.safetensors`, `{model}.config.json`)")]
    model: Box<str>,

    #[arg(long, default_value_t = 100, help = "Minibatch size")]
    batch_size: usize,

    #[arg(long, value_enum, default_value = "cpu", help = "Compute device")]
    device: ComputeDevice,
}

pub fn evaluate_model(args: &EvaluateArgs) -> anyhow::Result<()> {
    let dev = args.device.to_device()?;
    let model = Vade::load(&args.model, &dev)?;

    let x_nd = read_data_file(&args.data)?;
    let labels = read_labels(&args.labels)?;
    let mut data = InMemoryData::new_with_labels(&x_nd, &labels)?;

    let pred = predict_all(&model, &mut data, args.batch_size)?;
    let report = evaluate_embedding(&model, &mut data, &labels, args.batch_size)?;

    println!("vade:   {}", ClusterScores::evaluate(&pred.membership, &labels)?);
    println!("{}", report);
    Ok(())
}
