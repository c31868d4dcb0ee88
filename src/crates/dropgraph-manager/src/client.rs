//! `ManagerClient`: the boundary a composite manager talks through.
//!
//! The networked implementation of this trait (talking to a real child
//! process over the REST façade) is outside this crate's scope (see the
//! purpose & scope notes on the manager hierarchy). What lives here is the
//! trait itself and an in-process implementation backed directly by an
//! `Arc<NodeManager>`, which is enough to exercise the fan-out, rollback and
//! status-aggregation logic in [`crate::composite::CompositeManager`]
//! without a network stack.

use std::sync::Arc;

use async_trait::async_trait;

use dropgraph_core::{GraphSpec, Oid, SessionStatus};

use crate::error::Result;
use crate::node_manager::{DropStatusSummary, LinkKind, NodeManager};

/// One child address from a composite manager's point of view: everything
/// the Node Manager surface exposes, callable async so a networked
/// implementation can do real I/O.
#[async_trait]
pub trait ManagerClient: Send + Sync {
    fn address(&self) -> &str;
    async fn create_session(&self, session_id: &str) -> Result<()>;
    async fn add_graph_spec(&self, session_id: &str, spec: GraphSpec) -> Result<()>;
    async fn link_graph_parts(&self, session_id: &str, from: Oid, to: Oid, link: LinkKind) -> Result<()>;
    async fn deploy_session(&self, session_id: &str, completed: &[Oid]) -> Result<()>;
    async fn get_graph_status(&self, session_id: &str) -> Result<Vec<DropStatusSummary>>;
    async fn get_session_status(&self, session_id: &str) -> Result<SessionStatus>;
    async fn destroy_session(&self, session_id: &str) -> Result<()>;
    /// Push a remote producer's completion onto this child's local proxy
    /// drop for an inter-node edge.
    async fn mark_proxy_completed(&self, session_id: &str, oid: &Oid) -> Result<()>;
}

/// A `ManagerClient` backed by a same-process `Arc<NodeManager>`. `address`
/// is an arbitrary label (no actual network address), used only for error
/// reporting and status-aggregation keys.
pub struct InProcessClient {
    address: String,
    manager: Arc<NodeManager>,
}

impl InProcessClient {
    pub fn new(address: impl Into<String>, manager: Arc<NodeManager>) -> Self {
        Self { address: address.into(), manager }
    }
}

#[async_trait]
impl ManagerClient for InProcessClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn create_session(&self, session_id: &str) -> Result<()> {
        self.manager.create_session(session_id)
    }

    async fn add_graph_spec(&self, session_id: &str, spec: GraphSpec) -> Result<()> {
        self.manager.add_graph_spec(session_id, spec)
    }

    async fn link_graph_parts(&self, session_id: &str, from: Oid, to: Oid, link: LinkKind) -> Result<()> {
        self.manager.link_graph_parts(session_id, from, to, link)
    }

    async fn deploy_session(&self, session_id: &str, completed: &[Oid]) -> Result<()> {
        self.manager.deploy_session(session_id, completed)
    }

    async fn get_graph_status(&self, session_id: &str) -> Result<Vec<DropStatusSummary>> {
        self.manager.get_graph_status(session_id)
    }

    async fn get_session_status(&self, session_id: &str) -> Result<SessionStatus> {
        self.manager.get_session_status(session_id)
    }

    async fn destroy_session(&self, session_id: &str) -> Result<()> {
        self.manager.destroy_session(session_id)
    }

    async fn mark_proxy_completed(&self, session_id: &str, oid: &Oid) -> Result<()> {
        self.manager.mark_proxy_completed(session_id, oid)
    }
}
