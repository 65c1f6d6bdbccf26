// usi-broker: session broker for USI shogi engine processes

// Declare modules
pub mod autoplay;
pub mod config;
pub mod engine;
pub mod session;
pub mod web;

use anyhow::Result;
use clap::Parser;

use config::{Cli, Command};

/// Parse the command line, set up logging and run the chosen command
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    match cli.command {
        Command::Serve(config) => web::serve(config).await,
        Command::Autoplay(args) => {
            let record = autoplay::run_autoplay(args).await?;
            println!("{}", record.to_usi());
            Ok(())
        }
    }
}
