//! Adapter for the multi-protocol tunnel daemon.
//!
//! The daemon consumes one JSON config document. Without an operator
//! template the adapter synthesizes a minimal one: a single inbound
//! tagged `managed` carrying the user list, one direct outbound, and a
//! catch-all route. With a template, only the managed inbound is
//! rewritten (users, port, TLS material); everything else is preserved
//! byte-for-byte through the JSON round trip.
//!
//! Usage metering via log tailing is not implemented for this daemon
//! kind; `parse_log_line` always returns `None` and heartbeats report
//! zero usage.

use std::path::PathBuf;

use serde_json::{json, Value};

use conduit_core::model::TunnelProtocol;
use conduit_core::wire::{DesiredState, SlotSpec};

use crate::adapter::{ConfigArtifact, DaemonAdapter, RenderedFile, UsageDelta};
use crate::error::{AgentError, AgentResult};
use crate::tls::{self, TlsMaterial};

/// Tag of the single inbound the agent is permitted to rewrite.
pub const MANAGED_INBOUND_TAG: &str = "managed";

const CONFIG_FILE: &str = "config.json";
const TLS_DIR: &str = "tls";

/// Cipher written for shadowsocks user entries.
const SHADOWSOCKS_METHOD: &str = "aes-256-gcm";

pub struct TunnelAdapter {
    daemon_bin: PathBuf,
    work_dir: PathBuf,

    /// Fallbacks from registration, used when the desired state omits
    /// protocol/port.
    default_protocol: TunnelProtocol,
    default_port: u16,
}

impl TunnelAdapter {
    pub fn new(
        daemon_bin: PathBuf,
        work_dir: PathBuf,
        default_protocol: TunnelProtocol,
        default_port: u16,
    ) -> Self {
        Self {
            daemon_bin,
            work_dir,
            default_protocol,
            default_port,
        }
    }

    fn config_path(&self) -> PathBuf {
        self.work_dir.join(CONFIG_FILE)
    }
}

#[async_trait::async_trait]
impl DaemonAdapter for TunnelAdapter {
    fn build_config(&self, desired: &DesiredState) -> AgentResult<ConfigArtifact> {
        let protocol = desired.protocol.unwrap_or(self.default_protocol);
        let port = desired.port.unwrap_or(self.default_port);

        let tls = if protocol.requires_tls() {
            Some(tls::ensure_certificate(&self.work_dir.join(TLS_DIR))?)
        } else {
            None
        };

        let clients = client_entries(protocol, &desired.slots);

        let doc = match &desired.custom_config_json {
            Some(template) => splice_template(template, protocol, port, clients, tls.as_ref())?,
            None => default_config(protocol, port, clients, tls.as_ref()),
        };

        let contents = serde_json::to_string_pretty(&doc)
            .map_err(|e| AgentError::ConfigGeneration(e.to_string()))?;

        Ok(ConfigArtifact {
            files: vec![RenderedFile {
                path: self.config_path(),
                contents,
            }],
            command: self.daemon_bin.clone(),
            args: vec!["run".to_string(), "-c".to_string(), self.config_path().display().to_string()],
            workdir: self.work_dir.clone(),
        })
    }

    fn parse_log_line(&self, _line: &str) -> Option<UsageDelta> {
        None
    }
}

/// One user entry per slot, shaped for the protocol.
fn client_entries(protocol: TunnelProtocol, slots: &[SlotSpec]) -> Value {
    let entries: Vec<Value> = slots
        .iter()
        .map(|slot| match protocol {
            TunnelProtocol::Vless | TunnelProtocol::Vmess => json!({
                "id": slot.secret,
                "email": slot.login,
            }),
            TunnelProtocol::Trojan => json!({
                "password": slot.secret,
                "email": slot.login,
            }),
            TunnelProtocol::Shadowsocks => json!({
                "password": slot.secret,
                "email": slot.login,
                "method": SHADOWSOCKS_METHOD,
            }),
        })
        .collect();
    Value::Array(entries)
}

fn managed_inbound(protocol: TunnelProtocol, port: u16, clients: Value, tls: Option<&TlsMaterial>) -> Value {
    let mut inbound = json!({
        "tag": MANAGED_INBOUND_TAG,
        "port": port,
        "protocol": protocol.as_str(),
        "settings": { "clients": clients },
    });
    if let Some(tls) = tls {
        inbound["streamSettings"] = tls_stream_settings(tls);
    }
    inbound
}

fn tls_stream_settings(tls: &TlsMaterial) -> Value {
    json!({
        "security": "tls",
        "tlsSettings": {
            "certificates": [{
                "certificateFile": tls.cert_path.display().to_string(),
                "keyFile": tls.key_path.display().to_string(),
            }]
        }
    })
}

/// Minimal default document: managed inbound, direct outbound, catch-all
/// route.
fn default_config(protocol: TunnelProtocol, port: u16, clients: Value, tls: Option<&TlsMaterial>) -> Value {
    json!({
        "log": { "loglevel": "warning" },
        "inbounds": [managed_inbound(protocol, port, clients, tls)],
        "outbounds": [{ "protocol": "freedom", "tag": "direct" }],
        "routing": {
            "rules": [{ "type": "field", "network": "tcp,udp", "outboundTag": "direct" }]
        }
    })
}

/// Rewrite the managed inbound inside an operator template, leaving all
/// other content untouched.
fn splice_template(
    template: &str,
    protocol: TunnelProtocol,
    port: u16,
    clients: Value,
    tls: Option<&TlsMaterial>,
) -> AgentResult<Value> {
    let mut doc: Value = serde_json::from_str(template)
        .map_err(|e| AgentError::ConfigGeneration(format!("template is not valid JSON: {e}")))?;

    let inbounds = doc
        .get_mut("inbounds")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| AgentError::ConfigGeneration("template lacks an inbounds collection".into()))?;

    let inbound = inbounds
        .iter_mut()
        .find(|entry| entry.get("tag").and_then(Value::as_str) == Some(MANAGED_INBOUND_TAG))
        .ok_or_else(|| {
            AgentError::ConfigGeneration(format!(
                "template has no inbound tagged {MANAGED_INBOUND_TAG:?}"
            ))
        })?;

    let entry = inbound.as_object_mut().ok_or_else(|| {
        AgentError::ConfigGeneration("managed inbound entry is not an object".into())
    })?;

    entry.insert("port".into(), json!(port));
    entry.insert("protocol".into(), json!(protocol.as_str()));

    let settings = entry.entry("settings").or_insert_with(|| json!({}));
    if !settings.is_object() {
        *settings = json!({});
    }
    settings["clients"] = clients;

    if let Some(tls) = tls {
        entry.insert("streamSettings".into(), tls_stream_settings(tls));
    }

    Ok(doc)
}
