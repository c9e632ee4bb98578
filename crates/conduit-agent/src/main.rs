//! Conduit Node Agent binary.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conduit_agent::adapter::{PacketProxyAdapter, TunnelAdapter};
use conduit_agent::{Cli, ControlPlaneClient, Reconciler};
use conduit_core::model::{NodeKind, TunnelProtocol};
use conduit_core::wire::RegisterRequest;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize logging
    let filter = if args.debug {
        "debug,conduit_agent=trace"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.token.is_empty() {
        anyhow::bail!("Node token cannot be empty");
    }

    info!("🛰️  Conduit Node Agent v{}", env!("CARGO_PKG_VERSION"));
    info!("   kind: {}", args.kind.as_str());
    info!("   control plane: {}", args.url);
    info!("   work dir: {}", args.work_dir.display());

    std::fs::create_dir_all(&args.work_dir)
        .with_context(|| format!("Failed to create work dir {}", args.work_dir.display()))?;

    let client = ControlPlaneClient::new(&args.url, &args.token, args.kind);

    // One registration attempt; a dead control plane at boot is fatal so
    // the init system restarts us with backoff.
    let registration = client
        .register(&match args.kind {
            NodeKind::PacketProxy => RegisterRequest {
                socks_port: Some(args.socks_port),
                http_port: Some(args.http_port),
            },
            NodeKind::Tunnel => RegisterRequest::default(),
        })
        .await
        .context("Registration with the control plane failed")?;

    info!("✓ Registered as node {}", registration.node_id);

    match args.kind {
        NodeKind::PacketProxy => {
            let adapter = PacketProxyAdapter::new(
                args.daemon_bin.clone(),
                args.work_dir.clone(),
                args.log_path.clone(),
                args.socks_port,
                args.http_port,
                args.max_connections,
            );
            Reconciler::new(client, adapter, registration.node_id, args.poll_interval())
                .run()
                .await;
        }
        NodeKind::Tunnel => {
            let protocol = registration.protocol.unwrap_or(TunnelProtocol::Vless);
            let port = registration.port.unwrap_or(443);
            let adapter = TunnelAdapter::new(
                args.daemon_bin.clone(),
                args.work_dir.clone(),
                protocol,
                port,
            );
            Reconciler::new(client, adapter, registration.node_id, args.poll_interval())
                .run()
                .await;
        }
    }

    Ok(())
}
