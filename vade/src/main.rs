mod common;
mod run_evaluate;
mod run_predict;
mod run_simulate;
mod run_train;

use clap::{Parser, Subcommand};
use run_evaluate::*;
use run_predict::*;
use run_simulate::*;
use run_train::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "VaDE",
    long_about = "Variational Deep Embedding\n\
		  Clustering with a variational autoencoder whose latent prior\n\
		  is a Gaussian mixture. Data files are delimited text\n\
		  (`.tsv`, `.csv`, optionally `.gz`), one sample per row."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Train a model",
        long_about = "Train a model in three stages: \n\
		      (1) Optionally pretrain the encoder and decoder as an autoencoder\n\
		      (2) Seed the mixture prior by a Gaussian mixture on the embedding\n\
		      (3) Train everything end to end on the negative ELBO.\n"
    )]
    Train(TrainArgs),

    #[command(
        about = "Cluster a trained embedding by GMM and k-means",
        long_about = "Embed the data with a trained encoder, fit a full-covariance\n\
		      Gaussian mixture and k-means on the embedding,\n\
		      and score both against the true labels.\n"
    )]
    Evaluate(EvaluateArgs),

    #[command(about = "Soft cluster assignments of new data")]
    Predict(PredictArgs),

    #[command(about = "Simulate clustered data for testing")]
    Simulate(SimulateArgs),
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.commands {
        Commands::Train(args) => {
            fit_vade(args)?;
        }
        Commands::Evaluate(args) => {
            evaluate_model(args)?;
        }
        Commands::Predict(args) => {
            predict_clusters(args)?;
        }
        Commands::Simulate(args) => {
            simulate_data(args)?;
        }
    }

    Ok(())
}
