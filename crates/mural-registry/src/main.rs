//! # Mural Registry Server
//!
//! Standalone entry point for the reference registry.

use anyhow::Result;
use clap::Parser;
use mural_registry::RegistryServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Mural registry - rank assignment and liveness tracking
#[derive(Parser, Debug)]
#[command(name = "mural-registry")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:7000")]
    addr: SocketAddr,

    /// Data directory for registry.json
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("mural={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    std::fs::create_dir_all(&args.data_dir)?;

    // A failed bind is fatal: exit non-zero.
    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    tracing::info!(addr = %args.addr, "Starting Mural registry");

    let registry = RegistryServer::open(Some(args.data_dir.join("registry.json")));
    let (stop_tx, stop_rx) = watch::channel(false);
    let server = tokio::spawn(registry.serve(listener, stop_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    let _ = stop_tx.send(true);
    let _ = server.await;

    Ok(())
}
