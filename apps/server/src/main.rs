//! Keygate server binary

use anyhow::{Context, Result};
use clap::Parser;
use keygate_core::KeygateCore;
use keygate_server::DownloadServer;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

/// Keygate - secret-key gated downloads
#[derive(Parser, Debug)]
#[command(name = "keygate-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory holding the Keygate database
    #[arg(long, env = "KEYGATE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Bind address (overrides the stored setting)
    #[arg(long, env = "KEYGATE_BIND")]
    bind: Option<IpAddr>,

    /// Port (overrides the stored setting)
    #[arg(short, long, env = "KEYGATE_PORT")]
    port: Option<u16>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    keygate_server::init_logging(&args.log_level);

    let data_dir = args.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .map(|d| d.join("keygate"))
            .unwrap_or_else(|| PathBuf::from(".keygate"))
    });

    let core = KeygateCore::new(data_dir.clone())
        .await
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))?;

    let settings = core.get_settings().await;
    let bind = match args.bind {
        Some(ip) => ip,
        None => settings
            .bind_address
            .parse()
            .with_context(|| format!("invalid bind address {:?}", settings.bind_address))?,
    };
    let addr = SocketAddr::new(bind, args.port.unwrap_or(settings.port));

    tracing::info!(
        data_dir = %data_dir.display(),
        mode = ?settings.mode,
        track_clients = settings.track_clients,
        "Keygate initialized"
    );

    let server = Arc::new(DownloadServer::new(core, addr));
    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            signal_server.stop();
        }
    });

    server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("server error: {}", e))
}
