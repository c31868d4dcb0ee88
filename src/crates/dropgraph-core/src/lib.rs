//! # dropgraph-core - the drop graph runtime
//!
//! `dropgraph-core` is the execution substrate for pipelines expressed as DAGs
//! of *drops*: typed nodes that are either **data** (files, in-memory blobs,
//! directories, containers) or **applications** (barrier or streaming
//! computations). It owns the per-drop state machines, the event mechanism
//! that propagates completions without introducing cycles, the execution
//! engine that fires application drops at most once, and the [`Session`]
//! that ties one graph instance to a lifecycle.
//!
//! ## Core Concepts
//!
//! - [`DropGraph`] is the arena that owns every drop in a session. Drops
//!   never own each other directly — edges are index lookups into the
//!   arena, which is what keeps producer/consumer back-references from
//!   creating reference cycles.
//! - [`GraphBuilder`] turns a [`spec::GraphSpec`] into a wired, validated
//!   `DropGraph`.
//! - [`Engine`] drives execution: data-driven firing on completion events,
//!   externally-driven firing via explicit triggers, at-most-once app
//!   execution, and `ERROR` propagation down the DAG.
//! - [`Session`] owns one `DropGraph` + `Engine` pair through
//!   `PRISTINE -> BUILDING -> DEPLOYING -> RUNNING -> FINISHED|CANCELLED`.
//!
//! ```rust
//! use dropgraph_core::prelude::*;
//!
//! # fn main() -> Result<(), DropError> {
//! let spec: GraphSpec = serde_json::from_value(serde_json::json!([
//!     {"oid": "A", "type": "data", "dropType": "memory"},
//!     {"oid": "App1", "type": "app", "appType": "barrier", "inputs": ["A"], "outputs": ["B"]},
//!     {"oid": "B", "type": "data", "dropType": "memory"},
//! ]))?;
//!
//! let mut session = Session::new("session-1");
//! session.add_graph_spec(spec)?;
//! assert_eq!(session.status(), SessionStatus::Building);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod drop;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod ids;
pub mod session;
pub mod spec;
pub mod status;

pub use builder::GraphBuilder;
pub use drop::{AppKind, DataKind, DropHandle, DropKind, DropNode};
pub use engine::{AppExecutor, Concurrency, Engine, ErrorListener};
pub use error::{DropError, Result};
pub use events::Topic;
pub use graph::{DropGraph, NodeIndex};
pub use ids::{Oid, Uid};
pub use session::{Session, SessionStatus};
pub use spec::GraphSpec;
pub use status::{DropStatus, ExecStatus, ExecutionMode};

/// Convenience re-export of the types most call sites need.
pub mod prelude {
    pub use crate::builder::GraphBuilder;
    pub use crate::drop::{AppKind, DataKind, DropKind};
    pub use crate::engine::{Concurrency, Engine};
    pub use crate::error::{DropError, Result};
    pub use crate::events::Topic;
    pub use crate::session::{Session, SessionStatus};
    pub use crate::spec::GraphSpec;
    pub use crate::status::{DropStatus, ExecStatus, ExecutionMode};
}
