//! # Mural Node
//!
//! The main entry point for running a Mural message-server replica.

use anyhow::Result;
use clap::Parser;
use mural_node::{Replica, ReplicaConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Mural Node - replicated bulletin-board message server
#[derive(Parser, Debug)]
#[command(name = "mural-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Unique server name (overrides file and environment)
    #[arg(long)]
    name: Option<String>,

    /// Data directory (overrides file and environment)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // File, then environment, then flags.
    let mut config = if args.config.exists() {
        ReplicaConfig::from_file(&args.config)?
    } else {
        ReplicaConfig::default()
    };
    config.merge_env()?;
    if let Some(name) = args.name {
        config.server_name = name;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    config.validate_config()?;

    init_logging(&config.logging.level, config.logging.format == "json");

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %config.server_name,
        "Starting Mural node"
    );

    let replica = Replica::start(config).await?;

    tracing::info!("Mural node running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    replica.shutdown().await;

    Ok(())
}

fn init_logging(level: &str, json_format: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("mural={level}").into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
