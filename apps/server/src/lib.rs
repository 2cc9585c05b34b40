//! Keygate Server
//!
//! HTTP front end for the Keygate core.

mod client_ip;
mod render;
mod server;

pub use server::{router, DownloadServer, ErrorResponse, ServerState};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging; `RUST_LOG` overrides `default_level`
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}
