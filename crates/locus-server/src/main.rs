//! Locus server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default port
//! locus-server --bind 0.0.0.0:8080
//!
//! # Short-lived sessions for a demo booth
//! locus-server --session-ttl-secs 600 --max-players 4
//! ```

use std::time::Duration;

use clap::Parser;
use locus_server::{DriverConfig, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Locus shared-AR session server
#[derive(Parser, Debug)]
#[command(name = "locus-server")]
#[command(about = "Locus shared-AR session server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Session idle TTL in seconds
    #[arg(long, default_value = "3600")]
    session_ttl_secs: u64,

    /// Default participant cap per session
    #[arg(long, default_value = "10")]
    max_players: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Locus server starting");
    tracing::info!("Binding to {}", args.bind);

    let mut driver = DriverConfig::default();
    driver.registry.session_ttl = Duration::from_secs(args.session_ttl_secs);
    driver.default_max_players = args.max_players;

    let config = ServerRuntimeConfig { bind_address: args.bind, driver };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
