//! Daemon adapters: one capability interface, two daemon kinds.
//!
//! The reconcile loop is daemon-agnostic; everything kind-specific lives
//! behind [`DaemonAdapter`]: rendering a config artifact from the
//! desired slot set, starting/stopping the daemon, and turning one
//! accounting-log line into a usage delta.

pub mod packet_proxy;
pub mod tunnel;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use conduit_core::wire::DesiredState;

use crate::error::AgentResult;
use crate::process::{self, DaemonHandle};

pub use packet_proxy::PacketProxyAdapter;
pub use tunnel::TunnelAdapter;

/// One rendered file of a config artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub path: PathBuf,
    pub contents: String,
}

/// A fully rendered daemon configuration plus the command to run it.
///
/// Nothing touches the filesystem until [`DaemonAdapter::start`] writes
/// the files, so a failed build leaves the previous configuration (and
/// the running daemon) untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigArtifact {
    pub files: Vec<RenderedFile>,
    pub command: PathBuf,
    pub args: Vec<String>,
    pub workdir: PathBuf,
}

impl ConfigArtifact {
    fn write_files(&self) -> std::io::Result<()> {
        for file in &self.files {
            if let Some(parent) = file.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&file.path, &file.contents)?;
        }
        Ok(())
    }
}

/// Usage extracted from one accounting-log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageDelta {
    pub credential: String,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Capability interface implemented per daemon kind.
#[async_trait]
pub trait DaemonAdapter: Send + Sync {
    /// Render the configuration artifact for the desired state. Config
    /// files are never written here (only [`DaemonAdapter::start`] does
    /// that); durable side material such as TLS certificates may be
    /// ensured during the build.
    fn build_config(&self, desired: &DesiredState) -> AgentResult<ConfigArtifact>;

    /// Accounting log to tail, if this daemon kind meters usage.
    fn accounting_log(&self) -> Option<&Path> {
        None
    }

    /// Parse one log line into a usage delta. `None` means the line is
    /// informational noise and is silently skipped.
    fn parse_log_line(&self, line: &str) -> Option<UsageDelta>;

    /// Write the artifact's files and start the daemon.
    async fn start(&self, artifact: &ConfigArtifact) -> AgentResult<DaemonHandle> {
        artifact.write_files()?;
        process::spawn_daemon(&artifact.command, &artifact.args, &artifact.workdir).await
    }

    /// Gracefully stop a daemon instance (bounded wait, forced kill on
    /// timeout).
    async fn stop(&self, handle: DaemonHandle) {
        process::stop_daemon(handle).await;
    }
}
