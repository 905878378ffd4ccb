//! # Ember Server
//!
//! Realtime private-messaging relay with burn-after-reading messages.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! ember
//!
//! # Run with a specific config file
//! EMBER_CONFIG=/path/to/ember.toml ember
//!
//! # Run with environment variables
//! EMBER_PORT=8080 EMBER_HOST=0.0.0.0 ember
//! ```

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
                .unwrap_or_else(|_| "ember=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        burn_policy = ?config.burn.policy,
        routing = ?config.routing.mode,
        "Starting Ember server on {}:{}",
        config.host,
        config.port
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
