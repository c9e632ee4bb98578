//! Wire DTOs exchanged between the control plane and node agents.
//!
//! The node API has three operations: registration, desired-state fetch,
//! and heartbeat. Both sides serialize these with serde, so the shapes
//! live here rather than in either binary.

use serde::{Deserialize, Serialize};

use crate::model::TunnelProtocol;

/// Body of `POST /api/{kind}-nodes/register`.
///
/// Packet-proxy nodes declare their listener ports; tunnel nodes send an
/// empty body because their protocol/port are assigned by the control
/// plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socks_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,
}

/// Response to registration: the assigned identity, plus the
/// authoritative tunnel parameters for tunnel nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub node_id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<TunnelProtocol>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,
}

/// One slot as seen by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub id: i64,
    pub login: String,
    pub secret: String,
}

/// Desired state for one node, returned by
/// `GET /api/{kind}-nodes/{id}/slots`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub slots: Vec<SlotSpec>,

    /// Tunnel nodes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<TunnelProtocol>,

    /// Tunnel nodes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Operator-supplied daemon config template, spliced by the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_config_json: Option<String>,
}

/// Per-slot usage within one heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotUsage {
    pub slot_id: i64,

    /// Cumulative bytes for this credential since the agent process
    /// started.
    pub bytes: u64,

    /// Connections observed since the last successful heartbeat.
    pub connections: u64,
}

/// Body of `POST /api/{kind}-nodes/{id}/heartbeat`.
///
/// Byte counters are cumulative for the agent process lifetime and reset
/// to zero when the agent restarts; connection counters are scoped to the
/// reporting interval. The control plane ingests byte counters as deltas
/// with backwards-counter detection, so restarts neither lose nor
/// double-count usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    /// Connections observed since the last successful heartbeat, all
    /// credentials combined.
    pub connections: u64,

    pub bytes_in: u64,
    pub bytes_out: u64,

    pub slots: Vec<SlotUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desired_state_tunnel_fields_optional() {
        let json = r#"{"slots":[{"id":1,"login":"alice","secret":"s3cret"}]}"#;
        let state: DesiredState = serde_json::from_str(json).unwrap();
        assert_eq!(state.slots.len(), 1);
        assert!(state.protocol.is_none());
        assert!(state.custom_config_json.is_none());
    }

    #[test]
    fn desired_state_tunnel_roundtrip() {
        let state = DesiredState {
            slots: vec![SlotSpec {
                id: 9,
                login: "bob".into(),
                secret: "d9b1b1a2-33cc-4f6e-9f2a-6a1f6f1a2b3c".into(),
            }],
            protocol: Some(TunnelProtocol::Vless),
            port: Some(443),
            custom_config_json: None,
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: DesiredState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn heartbeat_report_shape() {
        let report = HeartbeatReport {
            connections: 4,
            bytes_in: 1024,
            bytes_out: 2048,
            slots: vec![SlotUsage {
                slot_id: 3,
                bytes: 3072,
                connections: 4,
            }],
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"bytes_in\":1024"));
        let back: HeartbeatReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
