//! The Node Manager: hosts many sessions on one address space.

use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::info;

use dropgraph_core::{AppExecutor, Concurrency, GraphSpec, Oid, Session, SessionStatus};
use dropgraph_dlm::Dlm;

use crate::error::{ManagerError, Result};
use crate::template::TemplateRegistry;

/// Per-drop status entry returned by `getGraphStatus`, re-exported from the
/// session layer so REST/composite callers don't need to depend on
/// `dropgraph_core` directly for this one type.
pub use dropgraph_core::session::DropStatusSummary;
pub use dropgraph_core::session::GraphNodeDescriptor;
pub use dropgraph_core::session::LinkKind;

/// Hosts a map from `sessionId` to `Session`, enforcing single-writer
/// discipline: every mutation goes through one of this type's methods,
/// which take the sessions map's lock for the duration of the call.
pub struct NodeManager {
    sessions: Mutex<HashMap<String, Session>>,
    dlm: Arc<Dlm>,
    templates: TemplateRegistry,
    executor: Arc<dyn AppExecutor>,
    concurrency: Concurrency,
}

impl NodeManager {
    pub fn new(dlm: Arc<Dlm>, executor: Arc<dyn AppExecutor>, concurrency: Concurrency) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            dlm,
            templates: TemplateRegistry::with_builtins(),
            executor,
            concurrency,
        }
    }

    pub fn create_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock();
        match sessions.entry(session_id.to_string()) {
            MapEntry::Occupied(_) => Err(ManagerError::SessionAlreadyExists(session_id.to_string())),
            MapEntry::Vacant(slot) => {
                slot.insert(Session::new(session_id));
                info!(session = session_id, "session created");
                Ok(())
            }
        }
    }

    pub fn add_graph_spec(&self, session_id: &str, spec: GraphSpec) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ManagerError::NoSession(session_id.to_string()))?;
        session.add_graph_spec(spec)?;
        Ok(())
    }

    pub fn link_graph_parts(&self, session_id: &str, from: Oid, to: Oid, link: LinkKind) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ManagerError::NoSession(session_id.to_string()))?;
        session.link_graph_parts(from, to, link)?;
        Ok(())
    }

    /// Deploy a session, registering every one of its drops with the DLM
    /// along the way (breadth-first from the graph's roots, matching the
    /// order the original node manager walks a just-built graph).
    pub fn deploy_session(&self, session_id: &str, completed: &[Oid]) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ManagerError::NoSession(session_id.to_string()))?;
        session.deploy(self.executor.clone(), self.concurrency.clone(), completed)?;

        if let Some(graph) = session.graph() {
            for idx in graph.bfs_from_roots() {
                let node = graph.node(idx);
                self.dlm.add_drop(node, *node.expiration_date.read(), node.desired_replicas);
            }
        }
        info!(session = session_id, "session deployed and registered with dlm");
        Ok(())
    }

    pub fn get_graph(&self, session_id: &str) -> Result<Vec<GraphNodeDescriptor>> {
        let sessions = self.sessions.lock();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| ManagerError::NoSession(session_id.to_string()))?;
        Ok(session.graph_descriptor())
    }

    pub fn get_graph_status(&self, session_id: &str) -> Result<Vec<DropStatusSummary>> {
        let sessions = self.sessions.lock();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| ManagerError::NoSession(session_id.to_string()))?;
        Ok(session.graph_status())
    }

    pub fn get_session_status(&self, session_id: &str) -> Result<SessionStatus> {
        let sessions = self.sessions.lock();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| ManagerError::NoSession(session_id.to_string()))?;
        Ok(session.status())
    }

    pub fn get_session_ids(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    pub fn destroy_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let mut session = sessions
            .remove(session_id)
            .ok_or_else(|| ManagerError::NoSession(session_id.to_string()))?;
        session.destroy();
        info!(session = session_id, "session destroyed");
        Ok(())
    }

    pub fn get_templates(&self) -> Vec<(&str, &[crate::template::TemplateArg])> {
        self.templates.names()
    }

    /// Mark a local proxy drop as `COMPLETED`, the half of an inter-node
    /// edge that lives on this node reacting to the remote producer's
    /// completion. A no-op if the drop is already completed (the composite
    /// manager's bridging task may observe the same remote completion more
    /// than once).
    pub fn mark_proxy_completed(&self, session_id: &str, oid: &Oid) -> Result<()> {
        let sessions = self.sessions.lock();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| ManagerError::NoSession(session_id.to_string()))?;
        let graph = session
            .graph()
            .ok_or_else(|| ManagerError::invalid_state(session_id, "session has no graph yet"))?;
        let idx = graph
            .index_of(oid)
            .ok_or_else(|| ManagerError::invalid_state(oid.to_string(), "no such proxy drop in this session"))?;
        let node = graph.node(idx);
        if let Some(data) = node.as_data() {
            if data.status() != dropgraph_core::DropStatus::Completed {
                data.open(oid.as_str())?;
                data.close(oid.as_str())?;
                node.events.emit(&data.status_event(&node.oid, &node.uid, dropgraph_core::DropStatus::Completed));
            }
        }
        Ok(())
    }

    pub fn materialize_template(&self, name: &str, session_id: &str, params: &HashMap<String, Value>) -> Result<()> {
        let spec = self.templates.materialize(name, params)?;
        self.add_graph_spec(session_id, spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dropgraph_core::{DropGraph, NodeIndex};
    use dropgraph_dlm::DlmConfig;

    struct NoopExecutor;

    #[async_trait]
    impl AppExecutor for NoopExecutor {
        async fn execute(&self, _graph: &DropGraph, _app_idx: NodeIndex) -> dropgraph_core::Result<()> {
            Ok(())
        }
    }

    fn manager() -> NodeManager {
        NodeManager::new(Dlm::new(DlmConfig::default()), Arc::new(NoopExecutor), Concurrency::Inline)
    }

    fn chain_spec() -> GraphSpec {
        serde_json::from_value(serde_json::json!([
            {"oid": "A", "type": "data", "dropType": "memory"},
            {"oid": "App1", "type": "app", "appType": "barrier", "inputs": ["A"], "outputs": ["B"]},
            {"oid": "B", "type": "data", "dropType": "memory"},
        ]))
        .unwrap()
    }

    #[test]
    fn duplicate_session_id_is_rejected() {
        let mgr = manager();
        mgr.create_session("s1").unwrap();
        assert!(matches!(mgr.create_session("s1"), Err(ManagerError::SessionAlreadyExists(_))));
    }

    #[test]
    fn unknown_session_id_is_rejected() {
        let mgr = manager();
        assert!(matches!(mgr.add_graph_spec("missing", chain_spec()), Err(ManagerError::NoSession(_))));
    }

    #[tokio::test]
    async fn deploy_registers_drops_with_dlm() {
        let mgr = manager();
        mgr.create_session("s1").unwrap();
        mgr.add_graph_spec("s1", chain_spec()).unwrap();
        mgr.deploy_session("s1", &[]).unwrap();
        assert_eq!(mgr.dlm.len(), 3);
    }

    #[test]
    fn get_graph_exposes_edges_by_oid() {
        let mgr = manager();
        mgr.create_session("s1").unwrap();
        mgr.add_graph_spec("s1", chain_spec()).unwrap();
        mgr.deploy_session("s1", &[]).unwrap();

        let nodes = mgr.get_graph("s1").unwrap();
        assert_eq!(nodes.len(), 3);
        let app = nodes.iter().find(|n| n.oid.as_str() == "App1").unwrap();
        assert!(app.is_app);
        assert_eq!(app.inputs.iter().map(|o| o.as_str()).collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(app.outputs.iter().map(|o| o.as_str()).collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn get_graph_on_unknown_session_is_rejected() {
        let mgr = manager();
        assert!(matches!(mgr.get_graph("missing"), Err(ManagerError::NoSession(_))));
    }

    #[test]
    fn materialize_unknown_template_fails() {
        let mgr = manager();
        mgr.create_session("s1").unwrap();
        assert!(mgr.materialize_template("nope", "s1", &HashMap::new()).is_err());
    }
}
