//! Typed configuration for the daemon process.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a [`crate::supervisor::Supervisor`] and its REST surface.
/// Deserializable from a config file the caller loads, falling back to
/// these defaults for anything missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Address the daemon's own REST surface binds to.
    pub bind_addr: String,
    /// Directory holding one `<kind>.pid` file per running manager.
    pub pid_dir: PathBuf,
    /// Directory holding one log file per manager kind.
    pub log_dir: PathBuf,
    /// How long a child manager gets between `SIGTERM` and `SIGKILL`.
    pub shutdown_grace_secs: u64,
    /// Whether to advertise/subscribe via mDNS on manager start.
    pub discovery_enabled: bool,
    /// Host a Node Manager child advertises itself under.
    pub discovery_host: String,
    /// Port a Node Manager child advertises itself under.
    pub node_manager_port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8001".to_string(),
            pid_dir: PathBuf::from("/tmp/dropgraph/run"),
            log_dir: PathBuf::from("/tmp/dropgraph/log"),
            shutdown_grace_secs: 10,
            discovery_enabled: true,
            discovery_host: "127.0.0.1".to_string(),
            node_manager_port: 8002,
        }
    }
}

impl DaemonConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn pid_file(&self, kind: crate::process::ManagerKind) -> PathBuf {
        self.pid_dir.join(format!("{}.pid", kind.as_str()))
    }

    pub fn log_file(&self, kind: crate::process::ManagerKind) -> PathBuf {
        self.log_dir.join(format!("{}.log", kind.as_str()))
    }
}
