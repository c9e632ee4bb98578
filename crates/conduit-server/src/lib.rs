//! Conduit Server - Control Plane
//!
//! Headless API for the Conduit fleet: node self-registration,
//! desired-state fetch, heartbeat ingestion, and the allocation endpoint
//! that places purchased slots across eligible nodes. Built with Axum
//! over SQLite (sqlx).

pub mod error;
pub mod ops;
pub mod server;
pub mod state;

pub use error::ServerError;
pub use state::AppState;

/// Configuration for the control-plane server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            db_path: "conduit.db".to_string(),
        }
    }
}
