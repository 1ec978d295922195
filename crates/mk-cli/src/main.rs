mod cli;
mod start;

use clap::Parser;
use mk_observe::{LoggerConfig, logger_init};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log = LoggerConfig::default()
        .with_format(cli.log_format)
        .with_level(cli.log_level.clone());
    logger_init(&log)?;

    match cli.command {
        Command::Start(args) => start::run(args).await,
    }
}
