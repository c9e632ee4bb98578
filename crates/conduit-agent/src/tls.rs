//! Durable self-signed TLS material for tunnel protocols.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{AgentError, AgentResult};

const CERT_FILE: &str = "cert.pem";
const KEY_FILE: &str = "key.pem";

/// Certificate/key paths inside the TLS directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Ensure a self-signed certificate/key pair exists in `dir`.
///
/// Generated once on first need and reused across daemon restarts, so
/// clients pinning the certificate keep working. Generation failure is
/// reported as a TLS error and aborts the cycle non-fatally.
pub fn ensure_certificate(dir: &Path) -> AgentResult<TlsMaterial> {
    let material = TlsMaterial {
        cert_path: dir.join(CERT_FILE),
        key_path: dir.join(KEY_FILE),
    };

    if material.cert_path.exists() && material.key_path.exists() {
        return Ok(material);
    }

    fs::create_dir_all(dir)?;

    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| AgentError::Tls(e.to_string()))?;

    fs::write(&material.cert_path, certified.cert.pem())?;
    fs::write(&material.key_path, certified.key_pair.serialize_pem())?;

    info!("Generated self-signed certificate at {}", material.cert_path.display());
    Ok(material)
}
