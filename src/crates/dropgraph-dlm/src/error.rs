//! Error type for the lifecycle manager.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DlmError>;

#[derive(Error, Debug)]
pub enum DlmError {
    /// No record exists for the given uid (already swept, or never added).
    #[error("no dlm record for uid '{0}'")]
    NoRecord(String),

    /// The configured replication hook returned an error.
    #[error("replication hook failed for '{0}': {1}")]
    ReplicationFailed(String, String),

    #[error(transparent)]
    Drop(#[from] dropgraph_core::DropError),
}
