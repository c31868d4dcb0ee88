//! Error type for the daemon's supervisory surface.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DaemonError>;

#[derive(Error, Debug)]
pub enum DaemonError {
    /// A manager of this kind is already running (its pid file is present
    /// and the pid is live).
    #[error("{0} manager is already running (pid {1})")]
    AlreadyRunning(String, u32),

    /// Stop was requested for a manager kind with no recorded pid.
    #[error("no {0} manager is running")]
    NotRunning(String),

    #[error("failed to spawn {0} manager: {1}")]
    SpawnFailed(String, String),

    #[error("pid file for {0} manager is corrupt: {1}")]
    CorruptPidFile(String, String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
