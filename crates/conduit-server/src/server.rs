//! Axum router and HTTP handlers for the node API.
//!
//! Handlers stay thin: extract the node token, call into [`crate::ops`],
//! map [`ServerError`] to its status. The per-node token travels in the
//! `x-node-token` header on every agent request.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use conduit_core::model::NodeKind;
use conduit_core::wire::{DesiredState, HeartbeatReport, RegisterRequest, RegisterResponse};

use crate::error::ServerError;
use crate::ops::{self, AllocationRequest, AllocationResponse};
use crate::state::AppState;
use crate::ServerConfig;

/// Header carrying the per-node bearer token.
pub const NODE_TOKEN_HEADER: &str = "x-node-token";

fn node_token(headers: &HeaderMap) -> String {
    headers
        .get(NODE_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn reject(err: ServerError) -> (StatusCode, String) {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!("{}", err);
    } else {
        tracing::warn!("{}", err);
    }
    (status, err.to_string())
}

async fn register_packet_proxy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, (StatusCode, String)> {
    let token = node_token(&headers);
    ops::register_node(&state.pool, NodeKind::PacketProxy, &token, &req, Utc::now())
        .await
        .map(Json)
        .map_err(reject)
}

async fn register_tunnel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, (StatusCode, String)> {
    let token = node_token(&headers);
    ops::register_node(&state.pool, NodeKind::Tunnel, &token, &req, Utc::now())
        .await
        .map(Json)
        .map_err(reject)
}

async fn packet_proxy_slots(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(node_id): Path<i64>,
) -> Result<Json<DesiredState>, (StatusCode, String)> {
    let token = node_token(&headers);
    ops::desired_state_for(&state.pool, NodeKind::PacketProxy, node_id, &token, Utc::now())
        .await
        .map(Json)
        .map_err(reject)
}

async fn tunnel_slots(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(node_id): Path<i64>,
) -> Result<Json<DesiredState>, (StatusCode, String)> {
    let token = node_token(&headers);
    ops::desired_state_for(&state.pool, NodeKind::Tunnel, node_id, &token, Utc::now())
        .await
        .map(Json)
        .map_err(reject)
}

async fn packet_proxy_heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(node_id): Path<i64>,
    Json(report): Json<HeartbeatReport>,
) -> Result<StatusCode, (StatusCode, String)> {
    let token = node_token(&headers);
    ops::ingest_heartbeat(
        &state.pool,
        NodeKind::PacketProxy,
        node_id,
        &token,
        &report,
        Utc::now(),
    )
    .await
    .map(|_| StatusCode::NO_CONTENT)
    .map_err(reject)
}

async fn tunnel_heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(node_id): Path<i64>,
    Json(report): Json<HeartbeatReport>,
) -> Result<StatusCode, (StatusCode, String)> {
    let token = node_token(&headers);
    ops::ingest_heartbeat(&state.pool, NodeKind::Tunnel, node_id, &token, &report, Utc::now())
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(reject)
}

async fn create_allocation(
    State(state): State<AppState>,
    Json(req): Json<AllocationRequest>,
) -> Result<Json<AllocationResponse>, (StatusCode, String)> {
    ops::allocate(&state.pool, &req, Utc::now())
        .await
        .map(Json)
        .map_err(reject)
}

/// Build the control-plane router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Node API
        .route("/api/packet-proxy-nodes/register", post(register_packet_proxy))
        .route("/api/tunnel-nodes/register", post(register_tunnel))
        .route("/api/packet-proxy-nodes/:id/slots", get(packet_proxy_slots))
        .route("/api/tunnel-nodes/:id/slots", get(tunnel_slots))
        .route("/api/packet-proxy-nodes/:id/heartbeat", post(packet_proxy_heartbeat))
        .route("/api/tunnel-nodes/:id/heartbeat", post(tunnel_heartbeat))
        // Allocation (invoked by the purchase webhook layer)
        .route("/api/allocations", post(create_allocation))
        // Health check
        .route(
            "/api/health",
            get(|| async {
                Json(serde_json::json!({
                    "status": "ok",
                    "service": "conduit-server",
                }))
            }),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the control-plane server until the process is stopped.
pub async fn run_server(config: ServerConfig, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Conduit control plane listening on http://{}", addr);
    tracing::info!("   Node API: http://{}/api/{{kind}}-nodes/...", addr);
    tracing::info!("   Health:   http://{}/api/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
