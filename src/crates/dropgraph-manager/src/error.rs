//! Error type spanning the Node Manager and composite manager surfaces.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ManagerError>;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("session '{0}' already exists")]
    SessionAlreadyExists(String),

    #[error("no session with id '{0}'")]
    NoSession(String),

    #[error("no template named '{0}'")]
    NoTemplate(String),

    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("invalid state for '{subject}': {reason}")]
    InvalidState { subject: String, reason: String },

    /// One or more children failed a structural call; the composite has
    /// already attempted best-effort rollback on the children that
    /// succeeded before this error was raised.
    #[error("composite operation failed on {0} of {1} children: {2}")]
    PartialFailure(usize, usize, String),

    #[error(transparent)]
    Drop(#[from] dropgraph_core::DropError),
}

impl ManagerError {
    pub fn invalid_state(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}
