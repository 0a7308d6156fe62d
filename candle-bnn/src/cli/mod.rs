pub mod kl_check;

use clap::{Parser, Subcommand};

pub use kl_check::{ComputeDevice, KlCheckArgs};

#[derive(Parser)]
#[command(name = "candle-bnn")]
#[command(about = "Variational Bayesian layers on candle")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a dense variational layer and check that its KL does not
    /// depend on the number of samples
    KlCheck(KlCheckArgs),
}
