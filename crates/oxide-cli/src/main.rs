//! Oxide CI CLI entrypoint.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod handlers;
mod plan;


use commands::Commands;

#[derive(Parser)]
#[command(name = "oxide")]
#[command(author, version, about = "Oxide CI stage scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => handlers::validate(&path)?,
        Commands::Simulate {
            path,
            config,
            timeout_secs,
            json,
        } => handlers::simulate(&path, config.as_deref(), timeout_secs, json).await?,
    }

    Ok(())
}
