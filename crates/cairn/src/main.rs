//! Cairn daemon - runs the background memory workers

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cairn::config::Config;
use cairn::engine::Cairn;
use cairn::error::Result;
use cairn::workers::Workers;

/// Cairn - Reflective memory and decision engine for AI agents
#[derive(Parser)]
#[command(name = "cairn")]
#[command(about = "A reflective memory and decision engine for AI agents")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the background workers (default command)
    #[command(name = "serve")]
    Serve,

    /// Validate the configuration and print it
    #[command(name = "check-config")]
    CheckConfig,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config).await,
        Some(Command::CheckConfig) => check_config(cli.config),
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cairn=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn check_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path)?;
    config.validate()?;
    println!("{config:#?}");
    Ok(())
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting Cairn daemon");

    let config = Config::load(config_path)?;
    tracing::debug!("Config loaded: {:?}", config);

    if config.workers.tenants.is_empty() {
        tracing::warn!("No tenants configured, workers will idle");
    }

    let workers_config = config.workers.clone();
    let cairn = Arc::new(Cairn::in_memory(config)?);
    let workers = Workers::spawn(cairn, &workers_config);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    workers.shutdown().await;

    Ok(())
}
