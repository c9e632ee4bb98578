//! Mutable per-process agent state.
//!
//! Everything the reconcile loop mutates lives in one [`AgentSession`]
//! value passed through each tick, not in ambient globals. The session's
//! lifetime is the agent process's lifetime: counters and offsets reset
//! to zero when the agent restarts (the control plane ingests byte
//! counters as deltas for exactly this reason).

use std::collections::HashMap;

use conduit_core::wire::{DesiredState, HeartbeatReport, SlotUsage};

use crate::adapter::UsageDelta;
use crate::process::DaemonHandle;

#[derive(Debug, Default)]
pub struct AgentSession {
    pub node_id: i64,

    /// Signature of the last successfully applied desired state.
    pub last_signature: Option<String>,

    /// Last known-good desired state. Retained across failed fetches so
    /// a transient control-plane outage never reconfigures a live daemon
    /// down to zero users.
    pub last_desired: Option<DesiredState>,

    /// Zero or one live daemon process.
    pub daemon: Option<DaemonHandle>,

    /// Accounting-log read offset.
    pub log_offset: u64,

    /// Cumulative byte counters for the process lifetime. Never reset
    /// while the process lives.
    pub bytes_in_total: u64,
    pub bytes_out_total: u64,
    pub credential_bytes: HashMap<String, u64>,

    /// Interval-scoped connection counters, reset after each successful
    /// heartbeat.
    pub interval_connections: u64,
    pub credential_connections: HashMap<String, u64>,
}

impl AgentSession {
    pub fn new(node_id: i64) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    /// Fold one accounting-log entry into the counters. Each matched
    /// line is one finished connection.
    pub fn record_usage(&mut self, delta: &UsageDelta) {
        self.bytes_in_total += delta.bytes_in;
        self.bytes_out_total += delta.bytes_out;
        *self.credential_bytes.entry(delta.credential.clone()).or_insert(0) +=
            delta.bytes_in + delta.bytes_out;

        self.interval_connections += 1;
        *self
            .credential_connections
            .entry(delta.credential.clone())
            .or_insert(0) += 1;
    }

    /// Called after a successful heartbeat. Cumulative byte counters are
    /// deliberately left untouched.
    pub fn reset_interval_counters(&mut self) {
        self.interval_connections = 0;
        self.credential_connections.clear();
    }

    /// Assemble the heartbeat body for the current desired slot set.
    pub fn build_report(&self, desired: &DesiredState) -> HeartbeatReport {
        let slots = desired
            .slots
            .iter()
            .map(|slot| SlotUsage {
                slot_id: slot.id,
                bytes: self.credential_bytes.get(&slot.login).copied().unwrap_or(0),
                connections: self
                    .credential_connections
                    .get(&slot.login)
                    .copied()
                    .unwrap_or(0),
            })
            .collect();

        HeartbeatReport {
            connections: self.interval_connections,
            bytes_in: self.bytes_in_total,
            bytes_out: self.bytes_out_total,
            slots,
        }
    }
}
