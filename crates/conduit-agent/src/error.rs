//! Agent error taxonomy.
//!
//! Startup is fatal only on failed registration; missing configuration
//! is rejected by the CLI parser before any of this applies. Everything
//! that can go wrong in steady state is logged by the reconcile loop and
//! retried implicitly on the next tick.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// A daemon config artifact could not be generated (malformed
    /// template, missing managed inbound). Aborts the tick; nothing is
    /// written and the previous daemon keeps running.
    #[error("config generation failed: {0}")]
    ConfigGeneration(String),

    /// Transport-level HTTP failure talking to the control plane.
    #[error("control plane request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The control plane answered with a non-success status.
    #[error("control plane returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The daemon process failed to spawn.
    #[error("failed to spawn daemon: {0}")]
    Spawn(String),

    /// Self-signed certificate material could not be produced.
    #[error("TLS material error: {0}")]
    Tls(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
