//! UdsVault Server Binary
//!
//! Main entry point for the UdsVault Unix socket server

use clap::Parser;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use udsvault::{Result, ServerConfig, UdsVaultServer};

#[derive(Parser, Debug)]
#[command(author, version, about = "Key-value store served over a Unix socket", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Socket path, overrides the configuration file
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Maximum number of stored keys, overrides the configuration file
    #[arg(long)]
    capacity: Option<usize>,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn load_config(args: Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    if let Some(capacity) = args.capacity {
        config.store.capacity = capacity;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = load_config(Args::parse())?;
    let server = UdsVaultServer::bind(config).inspect_err(|e| error!(error = %e, "failed to start server"))?;

    // SIGINT or SIGTERM stops the accept loop
    let shutdown = server.shutdown_handle();
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "failed to listen for Ctrl+C");
                    return;
                }
                info!("received SIGINT, initiating graceful shutdown");
            }
            _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
        }
        if let Err(e) = shutdown.shutdown() {
            error!(error = %e, "failed to initiate shutdown");
        }
    });

    server.run().await.inspect_err(|e| error!(error = %e, "server terminated"))?;

    Ok(())
}
