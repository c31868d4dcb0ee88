//! Application drops: the active nodes that consume inputs and produce
//! outputs by running user code.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::error::{DropError, Result};
use crate::status::ExecStatus;

/// How an app drop reads its inputs, named after the two behaviors the data
/// model distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppKind {
    /// Runs once, after all `inputs` have reached `COMPLETED`.
    Barrier,
    /// Runs continuously, invoked once per chunk arriving on a
    /// `streaming_input`, independent of the barrier inputs' completion.
    Streaming,
}

/// An application drop: tracks [`ExecStatus`] and enforces at-most-once
/// firing for barrier apps. The actual user code is invoked by
/// [`crate::engine::Engine`]; this type only owns the state machine.
#[derive(Debug)]
pub struct AppDrop {
    pub kind: AppKind,
    /// Shared-object path for a native-library app (C9). `None` for apps run
    /// by an in-process `AppExecutor` that doesn't need one.
    pub lib_path: Option<String>,
    /// Key/value init parameters handed to the native library's `init`, in
    /// the order the graph spec declared them.
    pub init_params: HashMap<String, String>,
    exec_status: RwLock<ExecStatus>,
    fired: RwLock<bool>,
    /// Count of `ExecutionMode::External` trigger calls observed so far.
    /// The engine fires the app once this reaches its input arity; it is
    /// never consulted for `ExecutionMode::Drop` apps.
    trigger_count: AtomicUsize,
}

impl AppDrop {
    pub fn new(kind: AppKind) -> Self {
        Self {
            kind,
            lib_path: None,
            init_params: HashMap::new(),
            exec_status: RwLock::new(ExecStatus::NotRun),
            fired: RwLock::new(false),
            trigger_count: AtomicUsize::new(0),
        }
    }

    /// Attach native-library metadata for the dynamic-library adapter (the
    /// `dropgraph-dynlib` crate owns loading and invocation; this type only
    /// remembers where to find the library and what to hand its `init`).
    pub fn with_library(mut self, lib_path: String, init_params: HashMap<String, String>) -> Self {
        self.lib_path = Some(lib_path);
        self.init_params = init_params;
        self
    }

    pub fn exec_status(&self) -> ExecStatus {
        *self.exec_status.read()
    }

    fn set_exec_status(&self, next: ExecStatus, subject: &str) -> Result<()> {
        let mut status = self.exec_status.write();
        if !status.can_transition(next) {
            return Err(DropError::invalid_state(
                subject,
                format!("cannot move exec status from {:?} to {:?}", *status, next),
            ));
        }
        *status = next;
        Ok(())
    }

    /// Claim the single firing slot for a barrier app. Returns `true` if this
    /// call won the race and should actually invoke the app; subsequent
    /// callers (e.g. redundant completion events from more than one input)
    /// get `false`.
    pub fn try_claim_fire(&self) -> bool {
        let mut fired = self.fired.write();
        if *fired {
            return false;
        }
        *fired = true;
        true
    }

    /// Record one externally-driven trigger call, returning the new count.
    pub fn record_trigger(&self) -> usize {
        self.trigger_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn start(&self, subject: &str) -> Result<()> {
        self.set_exec_status(ExecStatus::Running, subject)
    }

    pub fn finish(&self, subject: &str) -> Result<()> {
        self.set_exec_status(ExecStatus::Finished, subject)
    }

    pub fn fail(&self, subject: &str) -> Result<()> {
        self.set_exec_status(ExecStatus::Error, subject)
    }

    pub fn cancel(&self, subject: &str) -> Result<()> {
        self.set_exec_status(ExecStatus::Cancelled, subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrier_fires_at_most_once() {
        let app = AppDrop::new(AppKind::Barrier);
        assert!(app.try_claim_fire());
        assert!(!app.try_claim_fire());
    }

    #[test]
    fn exec_status_cannot_rewind() {
        let app = AppDrop::new(AppKind::Barrier);
        app.start("a").unwrap();
        app.finish("a").unwrap();
        assert!(app.start("a").is_err());
    }

    #[test]
    fn trigger_count_increments_each_call() {
        let app = AppDrop::new(AppKind::Barrier);
        assert_eq!(app.record_trigger(), 1);
        assert_eq!(app.record_trigger(), 2);
    }
}
