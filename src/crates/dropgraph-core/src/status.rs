//! Drop and app state machines.
//!
//! Data drops move through `INITIALIZED -> WRITING -> COMPLETED ->
//! EXPIRED -> DELETED`, with `ERROR` reachable as a sink from any
//! non-terminal state. App drops move through `NOT_RUN -> RUNNING ->
//! FINISHED`, with `ERROR`/`CANCELLED` as terminal sinks.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a data drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DropStatus {
    Initialized,
    Writing,
    Completed,
    Expired,
    Deleted,
    Error,
}

impl DropStatus {
    /// Whether `self -> next` is an allowed transition. Monotonic towards
    /// terminal states; `ERROR` is reachable from anywhere non-terminal.
    pub fn can_transition(self, next: DropStatus) -> bool {
        use DropStatus::*;
        match (self, next) {
            (Initialized, Writing) => true,
            (Initialized, Completed) => true, // zero-byte drop closed immediately
            (Writing, Completed) => true,
            (Completed, Expired) => true,
            (Expired, Deleted) => true,
            (Completed, Deleted) => true, // explicit eviction without expiry
            (s, Error) => !s.is_terminal(),
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DropStatus::Deleted | DropStatus::Error)
    }

    pub fn is_readable(self) -> bool {
        matches!(self, DropStatus::Completed)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, DropStatus::Initialized | DropStatus::Writing)
    }
}

/// Execution status of an application drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecStatus {
    NotRun,
    Running,
    Finished,
    Error,
    Cancelled,
}

impl ExecStatus {
    pub fn can_transition(self, next: ExecStatus) -> bool {
        use ExecStatus::*;
        match (self, next) {
            (NotRun, Running) => true,
            (Running, Finished) => true,
            (NotRun, Error) | (Running, Error) => true,
            (NotRun, Cancelled) | (Running, Cancelled) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecStatus::Finished | ExecStatus::Error | ExecStatus::Cancelled)
    }
}

/// Whether an app is fired by the data-driven engine or by an external
/// driver that calls `appTriggered` explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionMode {
    /// Completion of producer(s) triggers the consumer app directly.
    Drop,
    /// An external driver observes completions and calls `appTriggered`.
    External,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Drop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_status_is_monotonic() {
        assert!(DropStatus::Initialized.can_transition(DropStatus::Writing));
        assert!(DropStatus::Writing.can_transition(DropStatus::Completed));
        assert!(DropStatus::Completed.can_transition(DropStatus::Expired));
        assert!(DropStatus::Expired.can_transition(DropStatus::Deleted));
        assert!(!DropStatus::Completed.can_transition(DropStatus::Writing));
        assert!(!DropStatus::Deleted.can_transition(DropStatus::Completed));
    }

    #[test]
    fn error_reachable_from_non_terminal_only() {
        assert!(DropStatus::Writing.can_transition(DropStatus::Error));
        assert!(!DropStatus::Deleted.can_transition(DropStatus::Error));
        assert!(!DropStatus::Error.can_transition(DropStatus::Error));
    }

    #[test]
    fn exec_status_finishes_at_most_once() {
        assert!(ExecStatus::NotRun.can_transition(ExecStatus::Running));
        assert!(ExecStatus::Running.can_transition(ExecStatus::Finished));
        assert!(!ExecStatus::Finished.can_transition(ExecStatus::Running));
        assert!(!ExecStatus::Finished.can_transition(ExecStatus::Finished));
    }
}
