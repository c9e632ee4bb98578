//! The reconcile loop: poll, converge, meter, report.
//!
//! Each tick fetches the desired slot set from the control plane,
//! restarts the daemon only when the effective configuration actually
//! changed, tails the accounting log, and ships a heartbeat. A failed
//! fetch retains the last known-good desired state so a control-plane
//! outage never disturbs a healthy daemon.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use conduit_core::wire::DesiredState;

use crate::adapter::DaemonAdapter;
use crate::client::ControlPlaneClient;
use crate::meter;
use crate::session::AgentSession;
use crate::signature;

/// Pause between stopping the old daemon and starting its replacement,
/// letting listener sockets free up.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

pub struct Reconciler<A: DaemonAdapter> {
    client: ControlPlaneClient,
    adapter: A,
    session: AgentSession,
    poll_interval: Duration,
    settle_delay: Duration,
}

impl<A: DaemonAdapter> Reconciler<A> {
    pub fn new(client: ControlPlaneClient, adapter: A, node_id: i64, poll_interval: Duration) -> Self {
        Self {
            client,
            adapter,
            session: AgentSession::new(node_id),
            poll_interval,
            settle_delay: SETTLE_DELAY,
        }
    }

    /// Run ticks forever. A slow tick delays the next one rather than
    /// bunching up.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.run_tick().await;
        }
    }

    pub async fn run_tick(&mut self) {
        match self.client.fetch_desired(self.session.node_id).await {
            Ok(desired) => self.session.last_desired = Some(desired),
            Err(e) => {
                warn!("Desired-state fetch failed, keeping last known state: {}", e);
            }
        }

        let Some(desired) = self.session.last_desired.clone() else {
            // Nothing ever fetched; nothing to converge toward yet.
            return;
        };

        self.apply_desired(&desired).await;
        self.meter();
        self.report(&desired).await;
    }

    /// Converge the daemon to `desired`. A signature match is a no-op
    /// (no respawn happens outside a signature change). A failed build
    /// leaves the previous daemon and its signature untouched; once the
    /// old daemon has been stopped, the signature is cleared, so a
    /// failed start forces a rebuild on a later tick.
    pub async fn apply_desired(&mut self, desired: &DesiredState) {
        let sig = signature::desired_signature(desired);
        if self.session.last_signature.as_deref() == Some(sig.as_str()) {
            return;
        }

        let artifact = match self.adapter.build_config(desired) {
            Ok(artifact) => artifact,
            Err(e) => {
                error!("Config generation failed, keeping previous daemon: {}", e);
                return;
            }
        };

        if let Some(handle) = self.session.daemon.take() {
            // The applied signature describes a daemon that no longer
            // runs; if the start below fails, any future desired state
            // must trigger a rebuild rather than match a ghost.
            self.session.last_signature = None;
            self.adapter.stop(handle).await;
            tokio::time::sleep(self.settle_delay).await;
        }

        match self.adapter.start(&artifact).await {
            Ok(handle) => {
                info!(
                    "Applied desired state: {} slot(s), pid {:?}",
                    desired.slots.len(),
                    handle.pid()
                );
                self.session.daemon = Some(handle);
                self.session.last_signature = Some(sig);
            }
            Err(e) => {
                error!("Daemon start failed: {}", e);
            }
        }
    }

    /// Drain new accounting-log lines into the session counters.
    pub fn meter(&mut self) {
        let Some(path) = self.adapter.accounting_log() else {
            return;
        };
        let path = path.to_path_buf();
        match meter::read_new_lines(&path, self.session.log_offset) {
            Ok((lines, offset)) => {
                self.session.log_offset = offset;
                for line in &lines {
                    if let Some(delta) = self.adapter.parse_log_line(line) {
                        self.session.record_usage(&delta);
                    }
                }
            }
            Err(e) => warn!("Reading accounting log {} failed: {}", path.display(), e),
        }
    }

    /// Ship a heartbeat; interval counters reset only on success so a
    /// dropped report is re-sent next tick.
    pub async fn report(&mut self, desired: &DesiredState) {
        let report = self.session.build_report(desired);
        match self.client.heartbeat(self.session.node_id, &report).await {
            Ok(()) => self.session.reset_interval_counters(),
            Err(e) => warn!("Heartbeat failed: {}", e),
        }
    }

    #[cfg(test)]
    fn session(&mut self) -> &mut AgentSession {
        &mut self.session
    }

    #[cfg(test)]
    fn set_settle_delay(&mut self, delay: Duration) {
        self.settle_delay = delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};

    use conduit_core::model::NodeKind;
    use conduit_core::wire::SlotSpec;

    use crate::adapter::{ConfigArtifact, RenderedFile, UsageDelta};
    use crate::error::{AgentError, AgentResult};

    struct FakeAdapter {
        dir: PathBuf,
        log: Option<PathBuf>,
        fail_build: AtomicBool,
        fail_start: AtomicBool,
    }

    impl FakeAdapter {
        fn new(dir: &Path) -> Self {
            Self {
                dir: dir.to_path_buf(),
                log: None,
                fail_build: AtomicBool::new(false),
                fail_start: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl DaemonAdapter for FakeAdapter {
        fn build_config(&self, desired: &DesiredState) -> AgentResult<ConfigArtifact> {
            if self.fail_build.load(Ordering::SeqCst) {
                return Err(AgentError::ConfigGeneration("forced failure".into()));
            }
            let command = if self.fail_start.load(Ordering::SeqCst) {
                PathBuf::from("/nonexistent/daemon")
            } else {
                PathBuf::from("/bin/sleep")
            };
            Ok(ConfigArtifact {
                files: vec![RenderedFile {
                    path: self.dir.join("state.txt"),
                    contents: format!("{} slots", desired.slots.len()),
                }],
                command,
                args: vec!["30".to_string()],
                workdir: self.dir.clone(),
            })
        }

        fn accounting_log(&self) -> Option<&Path> {
            self.log.as_deref()
        }

        fn parse_log_line(&self, line: &str) -> Option<UsageDelta> {
            let mut parts = line.split_whitespace();
            Some(UsageDelta {
                credential: parts.next()?.to_string(),
                bytes_in: parts.next()?.parse().ok()?,
                bytes_out: parts.next()?.parse().ok()?,
            })
        }
    }

    fn reconciler(adapter: FakeAdapter) -> Reconciler<FakeAdapter> {
        let client = ControlPlaneClient::new("http://127.0.0.1:1", "tok", NodeKind::PacketProxy);
        let mut r = Reconciler::new(client, adapter, 1, Duration::from_secs(60));
        r.set_settle_delay(Duration::ZERO);
        r
    }

    fn desired(slots: &[(&str, &str)]) -> DesiredState {
        DesiredState {
            slots: slots
                .iter()
                .enumerate()
                .map(|(i, (login, secret))| SlotSpec {
                    id: i as i64 + 1,
                    login: login.to_string(),
                    secret: secret.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unchanged_desired_state_keeps_daemon_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = reconciler(FakeAdapter::new(dir.path()));

        let d = desired(&[("alice", "s1")]);
        r.apply_desired(&d).await;
        let pid = r.session().daemon.as_ref().unwrap().pid();
        assert!(pid.is_some());

        r.apply_desired(&d).await;
        assert_eq!(r.session().daemon.as_ref().unwrap().pid(), pid);
    }

    #[tokio::test]
    async fn changed_desired_state_restarts_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = reconciler(FakeAdapter::new(dir.path()));

        r.apply_desired(&desired(&[("alice", "s1")])).await;
        let first_pid = r.session().daemon.as_ref().unwrap().pid();

        r.apply_desired(&desired(&[("alice", "s1"), ("bob", "s2")])).await;
        let second_pid = r.session().daemon.as_ref().unwrap().pid();
        assert_ne!(first_pid, second_pid);

        // Rendered files reflect the new state.
        let rendered = std::fs::read_to_string(dir.path().join("state.txt")).unwrap();
        assert_eq!(rendered, "2 slots");
    }

    #[tokio::test]
    async fn build_failure_preserves_daemon_and_signature() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = reconciler(FakeAdapter::new(dir.path()));

        r.apply_desired(&desired(&[("alice", "s1")])).await;
        let pid = r.session().daemon.as_ref().unwrap().pid();
        let sig = r.session().last_signature.clone();

        r.adapter.fail_build.store(true, Ordering::SeqCst);
        r.apply_desired(&desired(&[("bob", "s2")])).await;

        assert_eq!(r.session().daemon.as_ref().unwrap().pid(), pid);
        assert_eq!(r.session().last_signature, sig);
    }

    #[tokio::test]
    async fn failed_start_clears_signature_so_reverted_state_reapplies() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = reconciler(FakeAdapter::new(dir.path()));

        let original = desired(&[("alice", "s1")]);
        r.apply_desired(&original).await;
        assert!(r.session().daemon.is_some());

        // The old daemon is stopped, then the replacement fails to start.
        r.adapter.fail_start.store(true, Ordering::SeqCst);
        r.apply_desired(&desired(&[("bob", "s2")])).await;
        assert!(r.session().daemon.is_none());
        assert!(r.session().last_signature.is_none());

        // Control plane reverts to the original state: it must be
        // re-applied, not skipped as already converged.
        r.adapter.fail_start.store(false, Ordering::SeqCst);
        r.apply_desired(&original).await;
        assert!(r.session().daemon.is_some());
    }

    #[tokio::test]
    async fn metering_folds_log_lines_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("acct.log");
        std::fs::write(&log, "alice 100 50\nnoise\nbob 1 2\n").unwrap();

        let mut adapter = FakeAdapter::new(dir.path());
        adapter.log = Some(log.clone());
        let mut r = reconciler(adapter);

        r.meter();
        assert_eq!(r.session().bytes_in_total, 101);
        assert_eq!(r.session().bytes_out_total, 52);
        assert_eq!(r.session().interval_connections, 2);

        // Re-metering without new lines changes nothing.
        r.meter();
        assert_eq!(r.session().bytes_in_total, 101);

        // Appended lines count once.
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(f, "alice 9 1").unwrap();
        r.meter();
        assert_eq!(r.session().bytes_in_total, 110);
        assert_eq!(r.session().credential_bytes["alice"], 160);
    }
}
