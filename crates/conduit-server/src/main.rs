//! Conduit Control Plane - binary entry point.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conduit_server::{server, AppState, ServerConfig};

/// Conduit Control Plane: node registry, slot allocation, heartbeat ingestion.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bind address
    #[arg(long, default_value = "0.0.0.0", env = "CONDUIT_BIND")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "CONDUIT_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(long, default_value = "conduit.db", env = "CONDUIT_DB")]
    db: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let filter = if args.debug {
        "debug,conduit_server=trace"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Conduit Control Plane v{}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", args.db);

    let state = AppState::new(&args.db)
        .await
        .context("Failed to initialize control-plane database")?;

    let config = ServerConfig {
        host: args.bind,
        port: args.port,
        db_path: args.db,
    };

    server::run_server(config, state).await
}
