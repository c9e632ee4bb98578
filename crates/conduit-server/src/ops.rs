//! Database-backed operations behind the HTTP handlers.
//!
//! Handlers in [`crate::server`] are thin wrappers around these
//! functions, which keeps the allocation and ingestion logic testable
//! against an in-memory pool without any HTTP plumbing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use conduit_core::model::{Node, NodeKind, NodeStatus, Tariff, TunnelProtocol};
use conduit_core::wire::{
    DesiredState, HeartbeatReport, RegisterRequest, RegisterResponse, SlotSpec,
};
use conduit_core::{plan_batch, AllocationError};

use crate::error::{ServerError, ServerResult};

/// Body of `POST /api/allocations`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllocationRequest {
    pub tariff_id: Option<i64>,
    pub client_id: Option<i64>,
}

/// Response of `POST /api/allocations`.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationResponse {
    pub slot_ids: Vec<i64>,
}

/// Register (or re-register) a node by its bearer token.
///
/// The token identifies the node: the first registration creates the row,
/// later ones refresh the declared ports and liveness. Tunnel nodes get
/// their authoritative protocol/port assigned here (operator may adjust
/// the row afterwards; the agent re-reads it on every fetch).
pub async fn register_node(
    pool: &SqlitePool,
    kind: NodeKind,
    token: &str,
    req: &RegisterRequest,
    now: DateTime<Utc>,
) -> ServerResult<RegisterResponse> {
    if token.is_empty() {
        return Err(ServerError::Unauthorized);
    }

    let existing = sqlx::query("SELECT id, kind, protocol, port FROM nodes WHERE token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await?;

    let (node_id, protocol, port) = match existing {
        Some(row) => {
            let row_kind: String = row.get(1);
            if NodeKind::parse(&row_kind) != Some(kind) {
                return Err(ServerError::Unauthorized);
            }
            let protocol: Option<String> = row.get(2);
            let port: Option<i64> = row.get(3);

            sqlx::query(
                "UPDATE nodes SET socks_port = ?, http_port = ?, status = 'online', updated_at = ? WHERE id = ?",
            )
            .bind(req.socks_port.map(i64::from))
            .bind(req.http_port.map(i64::from))
            .bind(now.timestamp())
            .bind(row.get::<i64, _>(0))
            .execute(pool)
            .await?;

            (row.get::<i64, _>(0), protocol, port)
        }
        None => {
            // Tunnel nodes are born with a default protocol/port; the
            // packet-proxy columns stay NULL for them and vice versa.
            let (protocol, port) = match kind {
                NodeKind::Tunnel => (Some(TunnelProtocol::Vless.as_str().to_string()), Some(443i64)),
                NodeKind::PacketProxy => (None, None),
            };

            let result = sqlx::query(
                r#"
                INSERT INTO nodes (kind, token, protocol, port, socks_port, http_port, status, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, 'online', ?)
                "#,
            )
            .bind(kind.as_str())
            .bind(token)
            .bind(&protocol)
            .bind(port)
            .bind(req.socks_port.map(i64::from))
            .bind(req.http_port.map(i64::from))
            .bind(now.timestamp())
            .execute(pool)
            .await?;

            info!("Registered new {} node {}", kind.as_str(), result.last_insert_rowid());
            (result.last_insert_rowid(), protocol, port)
        }
    };

    let protocol = protocol.as_deref().and_then(TunnelProtocol::parse);
    Ok(RegisterResponse {
        node_id,
        protocol,
        port: port.map(|p| p as u16),
        tls: protocol.map(|p| p.requires_tls()),
    })
}

/// Desired state for one node: its active, unexpired slots plus the
/// tunnel parameters and any operator-supplied config template.
pub async fn desired_state_for(
    pool: &SqlitePool,
    kind: NodeKind,
    node_id: i64,
    token: &str,
    now: DateTime<Utc>,
) -> ServerResult<DesiredState> {
    let node = authorize_node(pool, kind, node_id, token).await?;

    let rows = sqlx::query(
        "SELECT id, login, secret FROM slots WHERE node_id = ? AND status = 'active' AND expires_at > ? ORDER BY id",
    )
    .bind(node_id)
    .bind(now.timestamp())
    .fetch_all(pool)
    .await?;

    let slots = rows
        .iter()
        .map(|row| SlotSpec {
            id: row.get(0),
            login: row.get(1),
            secret: row.get(2),
        })
        .collect();

    Ok(DesiredState {
        slots,
        protocol: node.protocol,
        port: node.port,
        custom_config_json: node.custom_config,
    })
}

/// Ingest one heartbeat: refresh node liveness and apply usage.
///
/// Wire byte counters are cumulative for the agent process; ingestion is
/// delta-based. A reported value below the last recorded one means the
/// agent restarted and its counters reset, in which case the full
/// reported value is the delta. Past-expiry slots are lazily marked
/// `expired` here so the next desired-state fetch drops them.
pub async fn ingest_heartbeat(
    pool: &SqlitePool,
    kind: NodeKind,
    node_id: i64,
    token: &str,
    report: &HeartbeatReport,
    now: DateTime<Utc>,
) -> ServerResult<()> {
    authorize_node(pool, kind, node_id, token).await?;

    sqlx::query("UPDATE nodes SET status = 'online', updated_at = ? WHERE id = ?")
        .bind(now.timestamp())
        .bind(node_id)
        .execute(pool)
        .await?;

    for usage in &report.slots {
        let last: Option<i64> =
            sqlx::query_scalar("SELECT last_reported_bytes FROM slots WHERE id = ? AND node_id = ?")
                .bind(usage.slot_id)
                .bind(node_id)
                .fetch_optional(pool)
                .await?;

        let Some(last) = last else {
            warn!("Heartbeat from node {} references unknown slot {}", node_id, usage.slot_id);
            continue;
        };

        let reported = usage.bytes as i64;
        let delta = if reported >= last { reported - last } else { reported };

        sqlx::query(
            "UPDATE slots SET traffic_used_bytes = traffic_used_bytes + ?, last_reported_bytes = ? WHERE id = ?",
        )
        .bind(delta)
        .bind(reported)
        .bind(usage.slot_id)
        .execute(pool)
        .await?;
    }

    let expired = sqlx::query(
        "UPDATE slots SET status = 'expired' WHERE node_id = ? AND status = 'active' AND expires_at <= ?",
    )
    .bind(node_id)
    .bind(now.timestamp())
    .execute(pool)
    .await?;

    if expired.rows_affected() > 0 {
        debug!("Expired {} slots on node {}", expired.rows_affected(), node_id);
    }

    Ok(())
}

/// Place one purchased batch of slots and persist it atomically.
///
/// Validation order matches the error taxonomy: linkage, tariff, client,
/// then placement. The multi-row insert runs in one transaction so the
/// batch is all-or-nothing.
pub async fn allocate(
    pool: &SqlitePool,
    req: &AllocationRequest,
    now: DateTime<Utc>,
) -> ServerResult<AllocationResponse> {
    let tariff_id = req.tariff_id.ok_or(AllocationError::LinkageMissing)?;
    let client_id = req.client_id.ok_or(AllocationError::LinkageMissing)?;

    let tariff = load_tariff(pool, tariff_id)
        .await?
        .ok_or(AllocationError::TariffNotFoundOrDisabled)?;

    let client: Option<i64> = sqlx::query_scalar("SELECT id FROM clients WHERE id = ?")
        .bind(client_id)
        .fetch_optional(pool)
        .await?;
    if client.is_none() {
        return Err(AllocationError::ClientNotFound.into());
    }

    let pool_snapshot = load_node_pool(pool).await?;
    let drafts = plan_batch(&tariff, client_id, &pool_snapshot, now)?;

    let mut tx = pool.begin().await?;
    let mut slot_ids = Vec::with_capacity(drafts.len());
    for draft in &drafts {
        let result = sqlx::query(
            r#"
            INSERT INTO slots (node_id, client_id, tariff_id, login, secret, expires_at,
                               traffic_limit_bytes, connection_limit, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)
            "#,
        )
        .bind(draft.node_id)
        .bind(draft.client_id)
        .bind(draft.tariff_id)
        .bind(&draft.credential.login)
        .bind(&draft.credential.secret)
        .bind(draft.expires_at.timestamp())
        .bind(draft.traffic_limit_bytes)
        .bind(draft.connection_limit)
        .bind(now.timestamp())
        .execute(&mut *tx)
        .await?;
        slot_ids.push(result.last_insert_rowid());
    }
    tx.commit().await?;

    info!(
        "Allocated {} slot(s) for tariff {} / client {}",
        slot_ids.len(),
        tariff_id,
        client_id
    );
    Ok(AllocationResponse { slot_ids })
}

struct AuthorizedNode {
    protocol: Option<TunnelProtocol>,
    port: Option<u16>,
    custom_config: Option<String>,
}

async fn authorize_node(
    pool: &SqlitePool,
    kind: NodeKind,
    node_id: i64,
    token: &str,
) -> ServerResult<AuthorizedNode> {
    let row = sqlx::query("SELECT kind, token, protocol, port, custom_config FROM nodes WHERE id = ?")
        .bind(node_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServerError::NodeNotFound(node_id))?;

    let row_kind: String = row.get(0);
    let row_token: String = row.get(1);
    if row_token != token || NodeKind::parse(&row_kind) != Some(kind) {
        return Err(ServerError::Unauthorized);
    }

    let protocol: Option<String> = row.get(2);
    let port: Option<i64> = row.get(3);
    Ok(AuthorizedNode {
        protocol: protocol.as_deref().and_then(TunnelProtocol::parse),
        port: port.map(|p| p as u16),
        custom_config: row.get(4),
    })
}

async fn load_tariff(pool: &SqlitePool, tariff_id: i64) -> ServerResult<Option<Tariff>> {
    let row = sqlx::query(
        "SELECT id, slot_count, duration_days, traffic_limit_bytes, connection_limit, enabled, node_ids_json FROM tariffs WHERE id = ?",
    )
    .bind(tariff_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else { return Ok(None) };

    let enabled: bool = row.get(5);
    if !enabled {
        return Ok(None);
    }

    let node_ids_json: String = row.get(6);
    let node_ids: Vec<i64> = serde_json::from_str(&node_ids_json).unwrap_or_default();

    Ok(Some(Tariff {
        id: row.get(0),
        slot_count: row.get::<i64, _>(1) as u32,
        duration_days: row.get(2),
        traffic_limit_bytes: row.get(3),
        connection_limit: row.get(4),
        enabled,
        node_ids,
    }))
}

async fn load_node_pool(pool: &SqlitePool) -> ServerResult<Vec<Node>> {
    let rows = sqlx::query(
        "SELECT id, kind, host, token, capacity, status, protocol, port, socks_port, http_port, updated_at FROM nodes",
    )
    .fetch_all(pool)
    .await?;

    let mut nodes = Vec::with_capacity(rows.len());
    for row in rows {
        let kind_str: String = row.get(1);
        let Some(kind) = NodeKind::parse(&kind_str) else {
            warn!("Skipping node {} with unknown kind {:?}", row.get::<i64, _>(0), kind_str);
            continue;
        };
        let status_str: String = row.get(5);
        let protocol: Option<String> = row.get(6);

        nodes.push(Node {
            id: row.get(0),
            kind,
            host: row.get(2),
            token: row.get(3),
            capacity: row.get::<Option<i64>, _>(4).map(|c| c as u32),
            status: NodeStatus::parse(&status_str).unwrap_or(NodeStatus::Disabled),
            updated_at: DateTime::from_timestamp(row.get(10), 0).unwrap_or_default(),
            protocol: protocol.as_deref().and_then(TunnelProtocol::parse),
            port: row.get::<Option<i64>, _>(7).map(|p| p as u16),
            socks_port: row.get::<Option<i64>, _>(8).map(|p| p as u16),
            http_port: row.get::<Option<i64>, _>(9).map(|p| p as u16),
        });
    }
    Ok(nodes)
}
