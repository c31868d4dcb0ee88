//! The drop: a typed node in the graph, either data or application.
//!
//! A drop is represented as a [`DropNode`] behind an `Arc` (aliased as
//! [`DropHandle`]); the [`DropGraph`](crate::graph::DropGraph) arena owns
//! one `DropHandle` per node and edges are index lookups into that arena, so
//! drops never hold strong references to each other (see the "cyclic
//! owner/back-edges" design note).

mod app;
mod data;

pub use app::{AppDrop, AppKind};
pub use data::{DataDrop, DataKind, Descriptor, Payload};

use std::sync::Arc;

use parking_lot::RwLock;

use crate::events::EventBus;
use crate::graph::NodeIndex;
use crate::ids::{Oid, Uid};
use crate::status::ExecutionMode;

/// Arc-shared handle to a drop, the unit the graph arena stores.
pub type DropHandle = Arc<DropNode>;

/// Discriminates the two top-level drop kinds named in the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropKind {
    Data(DataKind),
    App(AppKind),
}

/// Adjacency lists for one drop. Only the fields meaningful for the drop's
/// kind are ever populated: a data drop has at most one `producer` and any
/// number of `consumers`/`streaming_consumers`; an app has `inputs`,
/// `streaming_inputs` and `outputs`.
#[derive(Debug, Default, Clone)]
pub struct Edges {
    pub producer: Option<NodeIndex>,
    pub consumers: Vec<NodeIndex>,
    pub streaming_consumers: Vec<NodeIndex>,
    pub inputs: Vec<NodeIndex>,
    pub streaming_inputs: Vec<NodeIndex>,
    pub outputs: Vec<NodeIndex>,
}

/// One node in the drop graph.
#[derive(Debug)]
pub struct DropNode {
    pub oid: Oid,
    pub uid: Uid,
    pub uri: String,
    pub execution_mode: ExecutionMode,
    /// `expireAfterUse` from the graph spec: whether `Session::destroy`
    /// should release this drop's payload as soon as the session tears down,
    /// independent of whether an `expiration_date` sweep ever caught it.
    pub expire_after_use: bool,
    /// Relative TTL in seconds from the graph spec, resolved into an
    /// absolute `expiration_date` at deploy time (the spec's wire format has
    /// no notion of wall-clock time before a graph is actually deployed).
    pub expire_after_secs: Option<i64>,
    /// Desired replica count handed to the DLM on registration; `0` means no
    /// replication is requested for this drop.
    pub desired_replicas: u32,
    pub expiration_date: RwLock<Option<chrono::DateTime<chrono::Utc>>>,
    pub events: EventBus,
    pub edges: RwLock<Edges>,
    pub variant: DropVariant,
}

#[derive(Debug)]
pub enum DropVariant {
    Data(DataDrop),
    App(AppDrop),
}

impl DropNode {
    pub fn new_data(oid: Oid, uid: Uid, data: DataDrop, execution_mode: ExecutionMode) -> DropHandle {
        Self::new_data_with_lifecycle(oid, uid, data, execution_mode, false, None, 0)
    }

    /// Like [`new_data`](Self::new_data) but also carries the spec-level
    /// `expireAfterUse`/TTL/replica hints the DLM and `Session::destroy`
    /// need. Kept as a separate constructor so call sites that don't care
    /// about lifecycle (most tests) stay terse.
    pub fn new_data_with_lifecycle(
        oid: Oid,
        uid: Uid,
        data: DataDrop,
        execution_mode: ExecutionMode,
        expire_after_use: bool,
        expire_after_secs: Option<i64>,
        desired_replicas: u32,
    ) -> DropHandle {
        Arc::new(DropNode {
            uri: format!("drop://{}/{}", oid, uid),
            oid,
            uid,
            execution_mode,
            expire_after_use,
            expire_after_secs,
            desired_replicas,
            expiration_date: RwLock::new(None),
            events: EventBus::new(),
            edges: RwLock::new(Edges::default()),
            variant: DropVariant::Data(data),
        })
    }

    pub fn new_app(oid: Oid, uid: Uid, app: AppDrop, execution_mode: ExecutionMode) -> DropHandle {
        Arc::new(DropNode {
            uri: format!("drop://{}/{}", oid, uid),
            oid,
            uid,
            execution_mode,
            expire_after_use: false,
            expire_after_secs: None,
            desired_replicas: 0,
            expiration_date: RwLock::new(None),
            events: EventBus::new(),
            edges: RwLock::new(Edges::default()),
            variant: DropVariant::App(app),
        })
    }

    pub fn kind(&self) -> DropKind {
        match &self.variant {
            DropVariant::Data(d) => DropKind::Data(d.kind),
            DropVariant::App(a) => DropKind::App(a.kind),
        }
    }

    pub fn as_data(&self) -> Option<&DataDrop> {
        match &self.variant {
            DropVariant::Data(d) => Some(d),
            DropVariant::App(_) => None,
        }
    }

    pub fn as_app(&self) -> Option<&AppDrop> {
        match &self.variant {
            DropVariant::App(a) => Some(a),
            DropVariant::Data(_) => None,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self.variant, DropVariant::Data(_))
    }

    pub fn is_app(&self) -> bool {
        matches!(self.variant, DropVariant::App(_))
    }
}
