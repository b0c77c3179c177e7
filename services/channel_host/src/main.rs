//! Channel host entry point

use anyhow::Context;
use channel_host::{logging, ChannelHost, HostConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the management bind address
    #[arg(long)]
    bind_address: Option<String>,

    /// Override the management port
    #[arg(short, long)]
    port: Option<u16>,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_tracing(args.log_json);

    info!("Starting channel host");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = HostConfig::load(args.config.as_deref())?;
    if let Some(bind_address) = args.bind_address {
        config.bind_address = bind_address;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    info!(channels = config.channels.len(), "Configuration loaded");

    let host = ChannelHost::build(config).context("Failed to build channels")?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    };

    host.run(shutdown).await.context("Channel host failed")?;
    Ok(())
}
