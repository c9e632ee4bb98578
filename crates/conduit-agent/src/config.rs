//! Agent configuration: CLI flags with environment fallbacks.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use conduit_core::model::NodeKind;

fn parse_node_kind(s: &str) -> Result<NodeKind, String> {
    NodeKind::parse(s).ok_or_else(|| format!("unknown node kind {s:?} (packet-proxy or tunnel)"))
}

/// Conduit Node Agent - supervises the local proxy/tunnel daemon against
/// control-plane desired state.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Control-plane base URL
    #[arg(long, env = "CONDUIT_URL")]
    pub url: String,

    /// Per-node bearer token (shared secret with the control plane)
    #[arg(long, env = "CONDUIT_NODE_TOKEN")]
    pub token: String,

    /// Daemon kind this node runs
    #[arg(long, env = "CONDUIT_NODE_KIND", value_parser = parse_node_kind)]
    pub kind: NodeKind,

    /// Directory for generated config, credential and TLS files
    #[arg(long, env = "CONDUIT_WORK_DIR", default_value = "/var/lib/conduit-agent")]
    pub work_dir: PathBuf,

    /// Path to the daemon binary
    #[arg(long, env = "CONDUIT_DAEMON_BIN")]
    pub daemon_bin: PathBuf,

    /// Accounting log path (packet-proxy kind only)
    #[arg(long, env = "CONDUIT_LOG_PATH", default_value = "/var/log/conduit-daemon.log")]
    pub log_path: PathBuf,

    /// SOCKS5 listener port (packet-proxy kind only)
    #[arg(long, env = "CONDUIT_SOCKS_PORT", default_value = "1080")]
    pub socks_port: u16,

    /// HTTP proxy listener port (packet-proxy kind only)
    #[arg(long, env = "CONDUIT_HTTP_PORT", default_value = "3128")]
    pub http_port: u16,

    /// Global max-connections ceiling for the proxy daemon
    #[arg(long, env = "CONDUIT_MAX_CONNECTIONS", default_value = "500")]
    pub max_connections: u32,

    /// Poll interval in seconds
    #[arg(long, env = "CONDUIT_POLL_INTERVAL", default_value = "60")]
    pub poll_interval: u64,

    /// Enable debug logging
    #[arg(short, long, env = "CONDUIT_DEBUG")]
    pub debug: bool,
}

impl Cli {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval.max(1))
    }
}
