//! Stable fingerprint of desired configuration.
//!
//! The signature covers `(protocol, port, ordered credential list,
//! custom config text)`. Equal inputs always hash identically; changing
//! any single field changes the digest. The reconciler compares it
//! against the last applied signature to suppress unnecessary daemon
//! restarts.

use sha2::{Digest, Sha256};

use conduit_core::wire::DesiredState;

/// Field separator; cannot appear in any hashed component.
const SEP: [u8; 1] = [0u8];

pub fn desired_signature(desired: &DesiredState) -> String {
    let mut hasher = Sha256::new();

    if let Some(protocol) = desired.protocol {
        hasher.update(protocol.as_str().as_bytes());
    }
    hasher.update(SEP);

    if let Some(port) = desired.port {
        hasher.update(port.to_be_bytes());
    }
    hasher.update(SEP);

    for slot in &desired.slots {
        hasher.update(slot.login.as_bytes());
        hasher.update(SEP);
        hasher.update(slot.secret.as_bytes());
        hasher.update(SEP);
    }
    hasher.update(SEP);

    if let Some(custom) = &desired.custom_config_json {
        hasher.update(custom.as_bytes());
    }

    hex::encode(hasher.finalize())
}
