//! Child-process supervision: spawn a manager by re-invoking the daemon's
//! own executable with a subcommand, track its pid, and tear it down with a
//! `SIGTERM` → grace timeout → `SIGKILL` sequence on request.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::error::{DaemonError, Result};

/// The three manager tiers a daemon can supervise. Re-exported by name
/// rather than by numeric code since that's what the subcommand and the
/// REST path segment both spell out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerKind {
    Node,
    DataIsland,
    Master,
}

impl ManagerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerKind::Node => "node",
            ManagerKind::DataIsland => "dataisland",
            ManagerKind::Master => "master",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "node" => Some(ManagerKind::Node),
            "dataisland" => Some(ManagerKind::DataIsland),
            "master" => Some(ManagerKind::Master),
            _ => None,
        }
    }
}

impl std::fmt::Display for ManagerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the daemon's status endpoint reports for one manager kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub kind: ManagerKind,
    pub running: bool,
    pub pid: Option<u32>,
}

/// Owns every child manager process the daemon has started. One instance
/// per daemon; shared behind an `Arc` with the REST handlers.
pub struct Supervisor {
    config: DaemonConfig,
    children: Mutex<HashMap<ManagerKind, Child>>,
}

impl Supervisor {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn `kind` as a child process, recording its pid. Refuses a
    /// duplicate start if the pid file names a still-live process, even one
    /// left over from a previous daemon instance.
    pub async fn start(&self, kind: ManagerKind) -> Result<u32> {
        if let Some(pid) = self.live_pid(kind)? {
            return Err(DaemonError::AlreadyRunning(kind.to_string(), pid));
        }

        fs::create_dir_all(&self.config.pid_dir)?;
        fs::create_dir_all(&self.config.log_dir)?;

        let exe = std::env::current_exe().map_err(|e| DaemonError::SpawnFailed(kind.to_string(), e.to_string()))?;
        let log_path = self.config.log_file(kind);
        let log_file = fs::File::create(&log_path)?;
        let log_file_err = log_file.try_clone()?;

        let child = Command::new(exe)
            .arg(kind.as_str())
            .env("DROPGRAPH_DISCOVERY_ENABLED", self.config.discovery_enabled.to_string())
            .env("DROPGRAPH_DISCOVERY_HOST", &self.config.discovery_host)
            .env("DROPGRAPH_NODE_MANAGER_PORT", self.config.node_manager_port.to_string())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| DaemonError::SpawnFailed(kind.to_string(), e.to_string()))?;

        let pid = child.id().ok_or_else(|| DaemonError::SpawnFailed(kind.to_string(), "child exited before reporting a pid".into()))?;
        fs::write(self.config.pid_file(kind), pid.to_string())?;
        info!(kind = %kind, pid, "manager started");

        self.children.lock().await.insert(kind, child);
        Ok(pid)
    }

    /// `SIGTERM`, wait up to the configured grace period, then `SIGKILL` any
    /// survivor. Joins unconditionally either way.
    pub async fn stop(&self, kind: ManagerKind) -> Result<()> {
        let mut children = self.children.lock().await;
        let Some(mut child) = children.remove(&kind) else {
            drop(children);
            return self.stop_untracked(kind).await;
        };
        drop(children);

        let pid = child.id();
        if let Some(pid) = pid {
            send_sigterm(pid).await;
        }

        match tokio::time::timeout(self.config.shutdown_grace(), child.wait()).await {
            Ok(_) => debug!(kind = %kind, "manager exited after sigterm"),
            Err(_) => {
                warn!(kind = %kind, "manager did not exit within grace period, sending sigkill");
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }

        let _ = fs::remove_file(self.config.pid_file(kind));
        info!(kind = %kind, "manager stopped");
        Ok(())
    }

    /// Stop a manager this daemon instance didn't itself spawn (its pid
    /// file survived a daemon restart). Best-effort: no `Child` handle to
    /// `wait()` on, so this polls liveness instead of blocking on exit.
    async fn stop_untracked(&self, kind: ManagerKind) -> Result<()> {
        let Some(pid) = self.live_pid(kind)? else {
            return Err(DaemonError::NotRunning(kind.to_string()));
        };
        send_sigterm(pid).await;

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace();
        while tokio::time::Instant::now() < deadline {
            if !is_pid_alive(pid) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        if is_pid_alive(pid) {
            warn!(kind = %kind, pid, "untracked manager did not exit within grace period, sending sigkill");
            send_sigkill(pid).await;
        }
        let _ = fs::remove_file(self.config.pid_file(kind));
        Ok(())
    }

    pub fn status(&self, kind: ManagerKind) -> Result<ManagerStatus> {
        let pid = self.live_pid(kind)?;
        Ok(ManagerStatus { kind, running: pid.is_some(), pid })
    }

    /// `SIGTERM` every running child, grace timeout, `SIGKILL` survivors.
    /// Called once, from the daemon's own shutdown path.
    pub async fn shutdown_all(&self) {
        for kind in [ManagerKind::Node, ManagerKind::DataIsland, ManagerKind::Master] {
            if self.status(kind).map(|s| s.running).unwrap_or(false) {
                if let Err(e) = self.stop(kind).await {
                    warn!(kind = %kind, error = %e, "error stopping manager during daemon shutdown");
                }
            }
        }
    }

    /// The pid recorded for `kind`, if its pid file exists and the process
    /// it names is still alive (a stale file from a killed-without-cleanup
    /// process is treated as not running).
    fn live_pid(&self, kind: ManagerKind) -> Result<Option<u32>> {
        let path = self.config.pid_file(kind);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        let pid: u32 = contents
            .trim()
            .parse()
            .map_err(|_| DaemonError::CorruptPidFile(kind.to_string(), contents.clone()))?;
        if is_pid_alive(pid) {
            Ok(Some(pid))
        } else {
            let _ = fs::remove_file(&path);
            Ok(None)
        }
    }
}

fn is_pid_alive(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

async fn send_sigterm(pid: u32) {
    send_signal(pid, "-TERM").await;
}

async fn send_sigkill(pid: u32) {
    send_signal(pid, "-KILL").await;
}

/// Rust's standard library can only deliver `SIGKILL` to a child it owns
/// (`Child::kill`); sending `SIGTERM`, and sending any signal to a pid this
/// process didn't spawn, goes through the `kill(1)` utility instead.
async fn send_signal(pid: u32, signal: &str) {
    let _ = Command::new("kill").arg(signal).arg(pid.to_string()).stdout(Stdio::null()).stderr(Stdio::null()).status().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> DaemonConfig {
        DaemonConfig {
            pid_dir: dir.join("run"),
            log_dir: dir.join("log"),
            ..DaemonConfig::default()
        }
    }

    #[test]
    fn manager_kind_round_trips_through_its_string_form() {
        for kind in [ManagerKind::Node, ManagerKind::DataIsland, ManagerKind::Master] {
            assert_eq!(ManagerKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ManagerKind::parse("nonsense"), None);
    }

    #[tokio::test]
    async fn status_reports_not_running_when_no_pid_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(test_config(dir.path()));

        let status = supervisor.status(ManagerKind::Node).unwrap();
        assert!(!status.running);
        assert_eq!(status.pid, None);
    }

    #[tokio::test]
    async fn status_reports_not_running_and_cleans_up_a_stale_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        fs::create_dir_all(&config.pid_dir).unwrap();
        // pid 1 is always alive (init), but no real process will ever have
        // this absurdly high pid, so it stands in for "dead".
        let stale_pid_file = config.pid_file(ManagerKind::Node);
        fs::write(&stale_pid_file, "999999999").unwrap();

        let supervisor = Supervisor::new(config);
        let status = supervisor.status(ManagerKind::Node).unwrap();

        assert!(!status.running);
        assert!(!stale_pid_file.exists());
    }

    #[tokio::test]
    async fn corrupt_pid_file_is_reported_as_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        fs::create_dir_all(&config.pid_dir).unwrap();
        fs::write(config.pid_file(ManagerKind::Master), "not-a-pid").unwrap();

        let supervisor = Supervisor::new(config);
        let err = supervisor.status(ManagerKind::Master).unwrap_err();

        assert!(matches!(err, DaemonError::CorruptPidFile(_, _)));
    }

    #[tokio::test]
    async fn stopping_a_manager_with_no_recorded_pid_is_not_running_error() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(test_config(dir.path()));

        let err = supervisor.stop(ManagerKind::DataIsland).await.unwrap_err();
        assert!(matches!(err, DaemonError::NotRunning(_)));
    }
}
