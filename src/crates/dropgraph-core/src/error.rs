//! Error types for drop graph construction, wiring and execution.

use thiserror::Error;

/// Convenience result type using [`DropError`].
pub type Result<T> = std::result::Result<T, DropError>;

/// Errors raised by the drop graph runtime.
///
/// Mirrors the error kinds an application author actually needs to branch
/// on: structural errors abort the triggering call synchronously, drop-level
/// errors (`InvalidState`, `Overflow`) are raised from the drop whose
/// contract was violated.
#[derive(Error, Debug)]
pub enum DropError {
    /// The graph spec failed validation (unknown `type`, dangling `oid`
    /// reference, or the constructed graph is not a DAG).
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// Adding an edge would create a cycle, or would give a data drop a
    /// second producer.
    #[error("invalid relationship between '{from}' and '{to}': {reason}")]
    InvalidRelationship {
        from: String,
        to: String,
        reason: String,
    },

    /// An operation was attempted while the drop or session was in a status
    /// that does not permit it (e.g. writing to a `COMPLETED` drop).
    #[error("invalid state for '{subject}': {reason}")]
    InvalidState { subject: String, reason: String },

    /// A dynamic library did not expose the expected native-app ABI.
    #[error("invalid library '{0}': {1}")]
    InvalidLibrary(String, String),

    #[error("no session with id '{0}'")]
    NoSession(String),

    #[error("session '{0}' already exists")]
    SessionAlreadyExists(String),

    #[error("no template named '{0}'")]
    NoTemplate(String),

    /// A size-bounded drop was written past its declared bound.
    #[error("write to '{0}' overflowed bound of {1} bytes")]
    Overflow(String, usize),

    #[error("operation on '{0}' timed out after {1:?}")]
    Timeout(String, std::time::Duration),

    /// A remote manager call failed in a way that could not be classified
    /// into one of the kinds above (network error, decode error, etc).
    #[error("remote call to '{0}' failed: {1}")]
    RemoteFailure(String, String),
}

impl DropError {
    pub fn invalid_relationship(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidRelationship {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}
