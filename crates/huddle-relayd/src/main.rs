//! Huddle relay daemon
//!
//! Runs the reference UDP allocation relay.

mod config;

use clap::Parser;
use huddle_relay::UdpRelayServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use config::RelaydConfig;

/// Allocation relay for Huddle sessions
#[derive(Parser)]
#[command(name = "huddle-relayd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Maximum concurrent allocations, overrides the config file
    #[arg(long)]
    max_allocations: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RelaydConfig::load(path)?,
        None => RelaydConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(max) = cli.max_allocations {
        config.max_allocations = max;
    }
    if cli.verbose {
        config.log_filter = "debug".to_string();
    }
    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let server =
        Arc::new(UdpRelayServer::bind_with_config(config.bind_addr, config.server_config()).await?);
    tracing::info!(addr = %server.local_addr()?, max_allocations = config.max_allocations, "relay listening");

    let runner = Arc::clone(&server);
    tokio::select! {
        result = runner.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(allocations = server.allocation_count().await, "shutting down");
        }
    }

    Ok(())
}
