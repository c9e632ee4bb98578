//! Thin HTTP boundary to the control plane.
//!
//! Three operations: registration, desired-state fetch, heartbeat. No
//! retries here; the reconcile loop retries implicitly on its next tick.

use tracing::debug;

use conduit_core::model::NodeKind;
use conduit_core::wire::{DesiredState, HeartbeatReport, RegisterRequest, RegisterResponse};

use crate::error::{AgentError, AgentResult};

/// Header carrying the per-node bearer token.
const NODE_TOKEN_HEADER: &str = "x-node-token";

pub struct ControlPlaneClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    kind: NodeKind,
}

impl ControlPlaneClient {
    pub fn new(base_url: &str, token: &str, kind: NodeKind) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            kind,
        }
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/api/{}-nodes{}", self.base_url, self.kind.route_segment(), tail)
    }

    pub async fn register(&self, req: &RegisterRequest) -> AgentResult<RegisterResponse> {
        let url = self.url("/register");
        debug!("POST {}", url);
        let resp = self
            .http
            .post(&url)
            .header(NODE_TOKEN_HEADER, &self.token)
            .json(req)
            .send()
            .await?;
        expect_success(resp).await?.json().await.map_err(Into::into)
    }

    pub async fn fetch_desired(&self, node_id: i64) -> AgentResult<DesiredState> {
        let url = self.url(&format!("/{node_id}/slots"));
        debug!("GET {}", url);
        let resp = self
            .http
            .get(&url)
            .header(NODE_TOKEN_HEADER, &self.token)
            .send()
            .await?;
        expect_success(resp).await?.json().await.map_err(Into::into)
    }

    pub async fn heartbeat(&self, node_id: i64, report: &HeartbeatReport) -> AgentResult<()> {
        let url = self.url(&format!("/{node_id}/heartbeat"));
        debug!("POST {}", url);
        let resp = self
            .http
            .post(&url)
            .header(NODE_TOKEN_HEADER, &self.token)
            .json(report)
            .send()
            .await?;
        expect_success(resp).await.map(|_| ())
    }
}

async fn expect_success(resp: reqwest::Response) -> AgentResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(AgentError::Api {
        status: status.as_u16(),
        body: truncate_body(&body),
    })
}

fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 200;
    if body.len() <= LIMIT {
        body.to_string()
    } else {
        format!("{}...", &body[..LIMIT])
    }
}
