//! Entity model shared by the control plane and the node agent.
//!
//! Three entities matter to the allocator: [`Node`] (a fleet member
//! running one daemon kind), [`Tariff`] (what a purchase entitles the
//! client to), and [`Slot`] (one issued credential bound to exactly one
//! node). The agent never sees these directly; it works from the wire
//! DTOs in [`crate::wire`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which daemon a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// SOCKS5/HTTP proxy daemon with per-credential accounting.
    PacketProxy,

    /// Multi-protocol VPN tunnel daemon.
    Tunnel,
}

impl NodeKind {
    /// String representation (matches the database column).
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::PacketProxy => "packet_proxy",
            NodeKind::Tunnel => "tunnel",
        }
    }

    /// URL path segment used by the node API (`/api/{segment}-nodes/...`).
    pub fn route_segment(&self) -> &'static str {
        match self {
            NodeKind::PacketProxy => "packet-proxy",
            NodeKind::Tunnel => "tunnel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "packet_proxy" | "packet-proxy" => Some(NodeKind::PacketProxy),
            "tunnel" => Some(NodeKind::Tunnel),
            _ => None,
        }
    }
}

/// Tunnel daemon protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelProtocol {
    Vless,
    Vmess,
    Trojan,
    Shadowsocks,
}

impl TunnelProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelProtocol::Vless => "vless",
            TunnelProtocol::Vmess => "vmess",
            TunnelProtocol::Trojan => "trojan",
            TunnelProtocol::Shadowsocks => "shadowsocks",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vless" => Some(TunnelProtocol::Vless),
            "vmess" => Some(TunnelProtocol::Vmess),
            "trojan" => Some(TunnelProtocol::Trojan),
            "shadowsocks" => Some(TunnelProtocol::Shadowsocks),
            _ => None,
        }
    }

    /// Whether the inbound listener needs TLS transport material.
    pub fn requires_tls(&self) -> bool {
        matches!(self, TunnelProtocol::Vless | TunnelProtocol::Trojan)
    }

    /// Whether user entries carry a UUID id instead of a plain password.
    pub fn uuid_secret(&self) -> bool {
        matches!(self, TunnelProtocol::Vless | TunnelProtocol::Vmess)
    }
}

/// Node health/eligibility status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Disabled,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(NodeStatus::Online),
            "disabled" => Some(NodeStatus::Disabled),
            _ => None,
        }
    }
}

/// A fleet member running one daemon kind.
///
/// Created at node self-registration; `status` and `updated_at` are
/// refreshed by heartbeat ingestion. `updated_at` doubles as the
/// allocation tie-break (ascending), so it must round-trip exactly
/// through the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub kind: NodeKind,
    pub host: String,

    /// Per-node bearer token presented on every agent request.
    pub token: String,

    /// Upper bound on slots placed per allocation batch. `None` = unbounded.
    pub capacity: Option<u32>,

    pub status: NodeStatus,
    pub updated_at: DateTime<Utc>,

    /// Tunnel nodes only: authoritative protocol and listen port.
    pub protocol: Option<TunnelProtocol>,
    pub port: Option<u16>,

    /// Packet-proxy nodes only: declared listener ports.
    pub socks_port: Option<u16>,
    pub http_port: Option<u16>,
}

impl Node {
    pub fn is_online(&self) -> bool {
        self.status == NodeStatus::Online
    }
}

/// What one purchase entitles the client to. Read-only input to the
/// allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tariff {
    pub id: i64,

    /// Slots to allocate per purchase.
    pub slot_count: u32,

    pub duration_days: i64,

    /// `None` = unlimited traffic.
    pub traffic_limit_bytes: Option<i64>,

    /// `None` = unlimited concurrent connections.
    pub connection_limit: Option<i64>,

    pub enabled: bool,

    /// Explicit node allow-list. Empty = all ONLINE nodes are eligible.
    pub node_ids: Vec<i64>,
}

/// One login/secret pair. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub login: String,
    pub secret: String,
}

/// Slot lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Active,
    Expired,
    Revoked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Active => "active",
            SlotStatus::Expired => "expired",
            SlotStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SlotStatus::Active),
            "expired" => Some(SlotStatus::Expired),
            "revoked" => Some(SlotStatus::Revoked),
            _ => None,
        }
    }
}

/// A slot as planned by the allocator, before it has a database id.
///
/// The node reference is set once here and never reassigned; if the node
/// later goes offline the slot stays put (no retroactive migration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotDraft {
    pub node_id: i64,
    pub client_id: i64,
    pub tariff_id: i64,
    pub credential: Credential,
    pub expires_at: DateTime<Utc>,
    pub traffic_limit_bytes: Option<i64>,
    pub connection_limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kind_route_segments() {
        assert_eq!(NodeKind::PacketProxy.route_segment(), "packet-proxy");
        assert_eq!(NodeKind::Tunnel.route_segment(), "tunnel");
    }

    #[test]
    fn node_kind_parse_roundtrip() {
        for kind in [NodeKind::PacketProxy, NodeKind::Tunnel] {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(NodeKind::parse("packet-proxy"), Some(NodeKind::PacketProxy));
        assert_eq!(NodeKind::parse("ssh"), None);
    }

    #[test]
    fn tunnel_protocol_tls_and_secret_shape() {
        assert!(TunnelProtocol::Vless.requires_tls());
        assert!(TunnelProtocol::Trojan.requires_tls());
        assert!(!TunnelProtocol::Vmess.requires_tls());
        assert!(!TunnelProtocol::Shadowsocks.requires_tls());

        assert!(TunnelProtocol::Vless.uuid_secret());
        assert!(TunnelProtocol::Vmess.uuid_secret());
        assert!(!TunnelProtocol::Trojan.uuid_secret());
        assert!(!TunnelProtocol::Shadowsocks.uuid_secret());
    }

    #[test]
    fn status_parse_roundtrip() {
        for status in [SlotStatus::Active, SlotStatus::Expired, SlotStatus::Revoked] {
            assert_eq!(SlotStatus::parse(status.as_str()), Some(status));
        }
        for status in [NodeStatus::Online, NodeStatus::Disabled] {
            assert_eq!(NodeStatus::parse(status.as_str()), Some(status));
        }
    }
}
