//! vimsicles command-line entry point.

mod cli;
mod config;
mod receive;
mod send;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load()?,
    };
    tracing::debug!(?config, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Receive(args) => rt.block_on(receive::run(config, args)),
        Command::Send(args) => rt.block_on(send::run(config, args)),
    }
}
