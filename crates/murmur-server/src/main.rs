//! # murmur
//!
//! Realtime chat relay speaking the Socket.IO WebSocket transport.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (port 3000)
//! murmur
//!
//! # Pick the port through the conventional PORT variable
//! PORT=8080 murmur
//!
//! # Override any setting, nested keys separated by `__`
//! MURMUR_HOST=127.0.0.1 MURMUR_HEARTBEAT__PING_INTERVAL_MS=10000 murmur
//! ```

use anyhow::Result;
use murmur_server::{config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "murmur_server=debug,murmur_core=info,murmur_transport=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting murmur on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
