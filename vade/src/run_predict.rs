use crate::common::*;

use candle_util::candle_data_loader::InMemoryData;
use clap::Args;
use log::info;
use matrix_util::common_io::write_types;
use matrix_util::dmatrix_io::*;
use matrix_util::traits::{ConvertMatOps, IoOps};
use vade::evaluate::predict_all;
use vade::model::Vade;

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[arg(long, required = true, help = "Data file (sample x feature)")]
    data: Box<str>,

    #[arg(long, required = true, help = "Model header (`{model}.safetensors`, `{model}.config.json`)")]
    model: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\
		     - {out}.gamma.tsv.gz (sample x cluster probabilities)\n\
		     - {out}.membership.txt (most probable cluster)\n"
    )]
    out: Box<str>,

    #[arg(long, default_value_t = 100, help = "Minibatch size")]
    batch_size: usize,

    #[arg(long, value_enum, default_value = "cpu", help = "Compute device")]
    device: ComputeDevice,
}

pub fn predict_clusters(args: &PredictArgs) -> anyhow::Result<()> {
    let dev = args.device.to_device()?;
    let model = Vade::load(&args.model, &dev)?;

    let x_nd = read_data_file(&args.data)?;
    let mut data = InMemoryData::new(&x_nd)?;

    let pred = predict_all(&model, &mut data, args.batch_size)?;

    let gamma_file = format!("{}.gamma.tsv.gz", args.out);
    DMatrix::<f32>::from_tensor(&pred.gamma_nk)?.to_tsv(&gamma_file)?;
    info!("Wrote {}", gamma_file);

    let membership_file = format!("{}.membership.txt", args.out);
    write_types(&pred.membership, &membership_file)?;
    info!("Wrote {}", membership_file);
    Ok(())
}
