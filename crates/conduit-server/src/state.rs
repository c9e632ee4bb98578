//! Global application state for the control plane.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Shared state across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
}

impl AppState {
    /// Open (creating if needed) the control-plane database and ensure
    /// the schema exists.
    pub async fn new(db_path: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path)).await?;
        init_schema(&pool).await?;
        Ok(AppState { pool })
    }

    /// In-memory state for tests. A single connection keeps every query
    /// on the same memory database.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        init_schema(&pool).await?;
        Ok(AppState { pool })
    }
}

/// Create the control-plane tables. Timestamps are Unix epoch seconds;
/// embedded lists (tariff allow-list) are JSON-array TEXT columns.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            host TEXT NOT NULL DEFAULT '',
            token TEXT NOT NULL UNIQUE,
            capacity INTEGER,
            status TEXT NOT NULL DEFAULT 'online',
            protocol TEXT,
            port INTEGER,
            socks_port INTEGER,
            http_port INTEGER,
            custom_config TEXT,
            updated_at INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clients (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tariffs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            slot_count INTEGER NOT NULL,
            duration_days INTEGER NOT NULL,
            traffic_limit_bytes INTEGER,
            connection_limit INTEGER,
            enabled BOOLEAN NOT NULL DEFAULT 1,
            node_ids_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS slots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            node_id INTEGER NOT NULL,
            client_id INTEGER NOT NULL,
            tariff_id INTEGER NOT NULL,
            login TEXT NOT NULL,
            secret TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            traffic_limit_bytes INTEGER,
            traffic_used_bytes INTEGER NOT NULL DEFAULT 0,
            last_reported_bytes INTEGER NOT NULL DEFAULT 0,
            connection_limit INTEGER,
            status TEXT NOT NULL DEFAULT 'active',
            created_at INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("Control-plane schema ready");
    Ok(())
}
