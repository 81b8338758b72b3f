//! # Rendezvous Server
//!
//! Signaling relay for peers negotiating direct WebRTC connections.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (port 3000)
//! rendezvous
//!
//! # Run with custom config
//! rendezvous --config /path/to/rendezvous.toml
//!
//! # Run with environment variables
//! RENDEZVOUS_PORT=8080 RENDEZVOUS_HOST=0.0.0.0 rendezvous
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rendezvous")]
#[command(about = "WebRTC signaling relay", long_about = None, version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long, short)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rendezvous=debug,rendezvous_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    tracing::info!("Starting Rendezvous on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
