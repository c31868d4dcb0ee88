//! Replication hook: the DLM records intent, a production mover does the
//! byte-moving.

use crate::record::DlmRecord;
use crate::error::Result;

/// Implemented by whatever component actually moves bytes between nodes.
/// The DLM itself never opens a socket or reads a payload — it only tracks
/// desired replica count and the URIs it has been told about.
pub trait DlmHooks: Send + Sync {
    /// Called by the sweeper when a drop's replica count is under-satisfied.
    /// The default implementation (`NoopHooks`) does nothing and is what a
    /// single-node deployment uses.
    fn replicate(&self, record: &DlmRecord) -> Result<()>;
}

/// The do-nothing replication hook: records are kept, nothing is ever
/// copied. Used when a deployment has no remote mover configured.
pub struct NoopHooks;

impl DlmHooks for NoopHooks {
    fn replicate(&self, _record: &DlmRecord) -> Result<()> {
        Ok(())
    }
}
