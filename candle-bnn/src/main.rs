use anyhow::Result;
use candle_bnn::cli::{kl_check, Cli, Commands};
use clap::Parser;

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::KlCheck(args) => {
            kl_check::run(args)?;
        }
    }

    Ok(())
}
