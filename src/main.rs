use anyhow::Context;
use clap::Parser;
use steward::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(cli.verbose >= 2))
        .init();

    cli.execute().await.context("steward failed")
}
