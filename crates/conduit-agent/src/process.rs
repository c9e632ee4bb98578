//! Daemon child-process supervision.
//!
//! The agent owns at most one daemon child at any instant. Stops are
//! graceful with a bounded wait: SIGTERM first, SIGKILL if the process
//! has not exited within the grace period.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{AgentError, AgentResult};

/// How long a daemon gets to exit after SIGTERM.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Handle to the one live daemon instance.
#[derive(Debug)]
pub struct DaemonHandle {
    child: Child,
    pid: Option<u32>,
}

impl DaemonHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Spawn the daemon binary with the given arguments.
pub async fn spawn_daemon(bin: &Path, args: &[String], workdir: &Path) -> AgentResult<DaemonHandle> {
    let child = Command::new(bin)
        .args(args)
        .current_dir(workdir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AgentError::Spawn(format!("{}: {e}", bin.display())))?;

    let pid = child.id();
    debug!("Spawned daemon {} (pid {:?})", bin.display(), pid);
    Ok(DaemonHandle { child, pid })
}

/// Stop a daemon: SIGTERM, bounded wait, SIGKILL escalation. Idempotent
/// with respect to already-exited children.
pub async fn stop_daemon(mut handle: DaemonHandle) {
    let pid = handle.pid;

    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            // Usually ESRCH: the child already exited.
            debug!("SIGTERM to pid {} failed: {}", pid, e);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = handle.child.start_kill();
    }

    match tokio::time::timeout(STOP_GRACE, handle.child.wait()).await {
        Ok(Ok(status)) => debug!("Daemon (pid {:?}) exited: {}", pid, status),
        Ok(Err(e)) => warn!("Waiting for daemon (pid {:?}) failed: {}", pid, e),
        Err(_) => {
            warn!("Daemon (pid {:?}) ignored SIGTERM, killing", pid);
            if let Err(e) = handle.child.kill().await {
                warn!("Force kill failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sleep_bin() -> PathBuf {
        PathBuf::from("/bin/sleep")
    }

    #[tokio::test]
    async fn spawn_and_stop_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn_daemon(&sleep_bin(), &["30".to_string()], dir.path())
            .await
            .unwrap();
        assert!(handle.pid().is_some());
        stop_daemon(handle).await;
    }

    #[tokio::test]
    async fn stop_after_natural_exit_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn_daemon(&sleep_bin(), &["0".to_string()], dir.path())
            .await
            .unwrap();
        // Give the child time to exit on its own.
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop_daemon(handle).await;
    }

    #[tokio::test]
    async fn spawn_missing_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = spawn_daemon(Path::new("/nonexistent/daemon"), &[], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Spawn(_)));
    }
}
