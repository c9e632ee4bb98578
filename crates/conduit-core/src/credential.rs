//! Random, filesystem- and config-safe credential generation.
//!
//! Logins and secrets are drawn independently from a fixed block of
//! cryptographically random bytes, URL-safe base64 encoded, stripped to
//! alphanumerics, and truncated to their documented bounds. No uniqueness
//! check is performed against existing credentials: collision probability
//! at these lengths is treated as accepted risk, not enforced.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use rand::RngCore;
use uuid::Uuid;

use crate::model::{Credential, TunnelProtocol};

/// Upper bound on generated login length.
pub const LOGIN_MAX_LEN: usize = 20;

/// Upper bound on generated secret length.
pub const SECRET_MAX_LEN: usize = 16;

/// Random bytes drawn per token before encoding.
const ENTROPY_BYTES: usize = 24;

/// Stateless credential factory.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialGenerator;

impl CredentialGenerator {
    /// Generate a plain login/secret pair.
    pub fn generate(&self) -> Credential {
        Credential {
            login: random_token(LOGIN_MAX_LEN),
            secret: random_token(SECRET_MAX_LEN),
        }
    }

    /// Generate a credential shaped for the given protocol.
    ///
    /// UUID-secret protocols (VLESS, VMess) get a v4 UUID secret; every
    /// other protocol, and packet-proxy nodes (`None`), get a random
    /// password secret.
    pub fn generate_for(&self, protocol: Option<TunnelProtocol>) -> Credential {
        match protocol {
            Some(p) if p.uuid_secret() => Credential {
                login: random_token(LOGIN_MAX_LEN),
                secret: Uuid::new_v4().to_string(),
            },
            _ => self.generate(),
        }
    }
}

fn random_token(max_len: usize) -> String {
    let mut block = [0u8; ENTROPY_BYTES];
    rand::rng().fill_bytes(&mut block);

    let token: String = URL_SAFE_NO_PAD
        .encode(block)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(max_len)
        .collect();

    if token.is_empty() {
        // Degenerate case: every encoded char was '-' or '_'.
        fallback_token(max_len)
    } else {
        token
    }
}

/// Deterministic-but-unique fallback derived from the current timestamp.
fn fallback_token(max_len: usize) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut token = format!("u{nanos}");
    token.truncate(max_len);
    token
}
