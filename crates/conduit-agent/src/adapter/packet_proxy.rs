//! Adapter for the SOCKS5/HTTP packet-proxy daemon.
//!
//! One credential is one `login:CL:secret` line in the credential file.
//! The main config pins upstream DNS resolvers, connection timeouts, a
//! global max-connections ceiling, and binds one SOCKS5 and one HTTP
//! listener. The daemon's accounting log is configured to emit
//! `ACCT <user> <bytes_in> <bytes_out>` per finished connection, which
//! [`PacketProxyAdapter::parse_log_line`] picks back up for metering.

use std::path::{Path, PathBuf};

use regex::Regex;

use conduit_core::wire::DesiredState;

use crate::error::AgentResult;
use crate::adapter::{ConfigArtifact, DaemonAdapter, RenderedFile, UsageDelta};

/// Literal prefix token of an accounting line.
pub const ACCOUNTING_PREFIX: &str = "ACCT";

const CREDENTIALS_FILE: &str = "users.conf";
const CONFIG_FILE: &str = "daemon.cfg";

/// Upstream resolvers written into every generated config.
const DNS_SERVERS: [&str; 2] = ["8.8.8.8", "1.1.1.1"];

pub struct PacketProxyAdapter {
    daemon_bin: PathBuf,
    work_dir: PathBuf,
    log_path: PathBuf,
    socks_port: u16,
    http_port: u16,
    max_connections: u32,
    accounting_line: Regex,
}

impl PacketProxyAdapter {
    pub fn new(
        daemon_bin: PathBuf,
        work_dir: PathBuf,
        log_path: PathBuf,
        socks_port: u16,
        http_port: u16,
        max_connections: u32,
    ) -> Self {
        let accounting_line = Regex::new(r"^ACCT\s+(\S+)\s+(\d+)\s+(\d+)\s*$")
            .expect("accounting pattern is valid");
        Self {
            daemon_bin,
            work_dir,
            log_path,
            socks_port,
            http_port,
            max_connections,
            accounting_line,
        }
    }

    fn credentials_path(&self) -> PathBuf {
        self.work_dir.join(CREDENTIALS_FILE)
    }

    fn config_path(&self) -> PathBuf {
        self.work_dir.join(CONFIG_FILE)
    }
}

#[async_trait::async_trait]
impl DaemonAdapter for PacketProxyAdapter {
    fn build_config(&self, desired: &DesiredState) -> AgentResult<ConfigArtifact> {
        let mut credentials = String::new();
        for slot in &desired.slots {
            credentials.push_str(&format!("{}:CL:{}\n", slot.login, slot.secret));
        }

        let mut config = String::new();
        for server in DNS_SERVERS {
            config.push_str(&format!("nserver {server}\n"));
        }
        config.push_str("nscache 65536\n");
        config.push_str("timeouts 1 5 30 60 180 1800 15 60\n");
        config.push_str(&format!("users ${}\n", self.credentials_path().display()));
        config.push_str(&format!("log {} D\n", self.log_path.display()));
        config.push_str(&format!("logformat \"{ACCOUNTING_PREFIX} %U %I %O\"\n"));
        config.push_str("auth strong\n");
        config.push_str(&format!("maxconn {}\n", self.max_connections));
        config.push_str(&format!("socks -p{}\n", self.socks_port));
        config.push_str(&format!("proxy -p{}\n", self.http_port));

        Ok(ConfigArtifact {
            files: vec![
                RenderedFile {
                    path: self.credentials_path(),
                    contents: credentials,
                },
                RenderedFile {
                    path: self.config_path(),
                    contents: config,
                },
            ],
            command: self.daemon_bin.clone(),
            args: vec![self.config_path().display().to_string()],
            workdir: self.work_dir.clone(),
        })
    }

    fn accounting_log(&self) -> Option<&Path> {
        Some(&self.log_path)
    }

    fn parse_log_line(&self, line: &str) -> Option<UsageDelta> {
        let captures = self.accounting_line.captures(line)?;
        Some(UsageDelta {
            credential: captures[1].to_string(),
            // Counters that overflow u64 in a log line are daemon bugs;
            // treat unparseable numbers as noise.
            bytes_in: captures[2].parse().ok()?,
            bytes_out: captures[3].parse().ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::wire::SlotSpec;

    fn adapter() -> PacketProxyAdapter {
        PacketProxyAdapter::new(
            PathBuf::from("/usr/bin/3proxy"),
            PathBuf::from("/var/lib/conduit"),
            PathBuf::from("/var/log/conduit-daemon.log"),
            1080,
            3128,
            500,
        )
    }

    fn desired() -> DesiredState {
        DesiredState {
            slots: vec![
                SlotSpec { id: 1, login: "alice".into(), secret: "pw1".into() },
                SlotSpec { id: 2, login: "bob".into(), secret: "pw2".into() },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn credential_file_is_colon_delimited() {
        let artifact = adapter().build_config(&desired()).unwrap();
        let creds = &artifact.files[0];
        assert!(creds.path.ends_with("users.conf"));
        assert_eq!(creds.contents, "alice:CL:pw1\nbob:CL:pw2\n");
    }

    #[test]
    fn config_pins_listeners_and_limits() {
        let artifact = adapter().build_config(&desired()).unwrap();
        let config = &artifact.files[1].contents;

        assert!(config.contains("nserver 8.8.8.8"));
        assert!(config.contains("nserver 1.1.1.1"));
        assert!(config.contains("maxconn 500"));
        assert!(config.contains("socks -p1080"));
        assert!(config.contains("proxy -p3128"));
        assert!(config.contains("auth strong"));
        assert!(config.contains("logformat \"ACCT %U %I %O\""));
        assert_eq!(artifact.command, PathBuf::from("/usr/bin/3proxy"));
    }

    #[test]
    fn empty_slot_set_renders_empty_credentials() {
        let artifact = adapter().build_config(&DesiredState::default()).unwrap();
        assert_eq!(artifact.files[0].contents, "");
    }

    #[test]
    fn parses_accounting_lines() {
        let a = adapter();
        let delta = a.parse_log_line("ACCT alice 1024 2048").unwrap();
        assert_eq!(delta.credential, "alice");
        assert_eq!(delta.bytes_in, 1024);
        assert_eq!(delta.bytes_out, 2048);
    }

    #[test]
    fn noise_lines_silently_skipped() {
        let a = adapter();
        assert!(a.parse_log_line("").is_none());
        assert!(a.parse_log_line("starting daemon v0.9").is_none());
        assert!(a.parse_log_line("ACCT alice").is_none());
        assert!(a.parse_log_line("ACCT alice ten twenty").is_none());
        assert!(a.parse_log_line("XACCT alice 1 2").is_none());
    }

    #[test]
    fn accounting_log_exposed_for_metering() {
        let a = adapter();
        assert_eq!(
            a.accounting_log(),
            Some(Path::new("/var/log/conduit-daemon.log"))
        );
    }
}
