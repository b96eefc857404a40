use clap::Args;
use log::info;
use matrix_util::common_io::write_types;
use matrix_util::traits::IoOps;
use vade::simulate::*;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[arg(long, short, default_value_t = 1000, help = "Number of samples")]
    n: usize,

    #[arg(long, short, default_value_t = 8, help = "Number of features")]
    d: usize,

    #[arg(long, short, default_value_t = 3, help = "Number of clusters")]
    k: usize,

    #[arg(
        long,
        default_value_t = false,
        help = "Binary data from Bernoulli clusters",
        long_help = "Binary data from Bernoulli clusters.\n\
		     Otherwise isotropic Gaussian clusters."
    )]
    binary: bool,

    #[arg(
        long,
        default_value_t = 0.9,
        help = "Bernoulli on-probability within the cluster's block"
    )]
    p_on: f64,

    #[arg(long, default_value_t = 5.0, help = "Spread of Gaussian cluster centers")]
    separation: f64,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\
		     - {out}.data.tsv.gz\n\
		     - {out}.labels.txt\n"
    )]
    out: Box<str>,
}

pub fn simulate_data(args: &SimulateArgs) -> anyhow::Result<()> {
    let mut rng = rand::rng();
    let sim = if args.binary {
        bernoulli_clusters(args.n, args.d, args.k, args.p_on, &mut rng)?
    } else {
        gaussian_clusters(args.n, args.d, args.k, args.separation, &mut rng)?
    };

    let data_file = format!("{}.data.tsv.gz", args.out);
    sim.data_nd.to_tsv(&data_file)?;
    let labels_file = format!("{}.labels.txt", args.out);
    write_types(&sim.labels, &labels_file)?;

    info!("Wrote {} and {}", data_file, labels_file);
    Ok(())
}
