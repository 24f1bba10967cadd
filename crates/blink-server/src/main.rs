//! # BlinkRoom Server
//!
//! Realtime multi-room chat server with presence, read receipts, vanishing
//! messages, and view-once FlashPics.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! blinkroom
//!
//! # Run with environment variables
//! BLINK_PORT=3000 BLINK_HOST=0.0.0.0 blinkroom
//! ```
//!
//! Configuration is read from `blink.toml` when present.

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blinkroom=debug,blink_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting BlinkRoom server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
