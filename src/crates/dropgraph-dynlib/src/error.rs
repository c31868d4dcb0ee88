//! Error type for the dynamic-library adapter.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DynlibError>;

#[derive(Error, Debug)]
pub enum DynlibError {
    /// `dlopen`/`LoadLibrary` itself failed (missing file, wrong platform).
    #[error("failed to load library at '{0}': {1}")]
    LoadFailed(String, String),

    /// The library loaded but is missing a required entry point, or an
    /// entry point returned a non-zero status.
    #[error("invalid library '{0}': {1}")]
    InvalidLibrary(String, String),

    /// An app descriptor references a drop that isn't a data drop, or an
    /// input/output name that doesn't resolve.
    #[error("invalid descriptor for app '{0}': {1}")]
    InvalidDescriptor(String, String),

    #[error(transparent)]
    Drop(#[from] dropgraph_core::DropError),
}

impl From<DynlibError> for dropgraph_core::DropError {
    fn from(e: DynlibError) -> Self {
        match e {
            DynlibError::Drop(inner) => inner,
            DynlibError::LoadFailed(path, reason) => dropgraph_core::DropError::InvalidLibrary(path, reason),
            DynlibError::InvalidLibrary(path, reason) => dropgraph_core::DropError::InvalidLibrary(path, reason),
            DynlibError::InvalidDescriptor(oid, reason) => dropgraph_core::DropError::invalid_state(oid, reason),
        }
    }
}
