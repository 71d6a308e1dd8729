//! # rtc-relay
//!
//! Presence, direct-message and WebRTC call-signaling relay.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a config file in the working directory
//! RTC_AUTH__JWT_SECRET=change-me rtc-relay
//!
//! # Run with an explicit config file
//! rtc-relay --config /path/to/rtc-relay.toml
//! RTC_CONFIG=/path/to/rtc-relay.toml rtc-relay
//!
//! # Override single values from the environment
//! RTC_PORT=8080 RTC_HOST=0.0.0.0 rtc-relay
//!
//! # Print the effective configuration and exit
//! rtc-relay --print-config
//! ```

use anyhow::Result;
use clap::Parser;
use rtc_server::{handlers, metrics, Cli};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "rtc_relay=debug,rtc_server=debug,rtc_core=debug,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = cli.load_config()?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    tracing::info!("Starting rtc-relay on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
