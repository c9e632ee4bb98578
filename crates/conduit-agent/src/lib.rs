//! Conduit Node Agent - daemon supervision against control-plane state.
//!
//! The agent registers its node, then runs a reconcile loop forever:
//! fetch the desired slot set, regenerate the daemon configuration when
//! it changed, restart the daemon, tail the accounting log, and report a
//! heartbeat. All daemon-kind specifics (config rendering, log formats)
//! live behind [`adapter::DaemonAdapter`].

pub mod adapter;
pub mod client;
pub mod config;
pub mod error;
pub mod meter;
pub mod process;
pub mod reconciler;
pub mod session;
pub mod signature;
pub mod tls;

pub use client::ControlPlaneClient;
pub use config::Cli;
pub use error::{AgentError, AgentResult};
pub use reconciler::Reconciler;
