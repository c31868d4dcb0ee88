//! A session: one graph instance and its engine, carried through a fixed
//! lifecycle.
//!
//! Mirrors the three-call shape a node manager drives a session through:
//! accumulate graph spec fragments (`add_graph_spec`, `link_graph_parts`),
//! then `deploy` once the whole graph has arrived. Splitting spec arrival
//! from deployment is what lets a composite manager fan a graph spec out
//! across several node-local sessions before any of them starts running.

use std::sync::Arc;

use tracing::{info, warn};

use crate::builder::GraphBuilder;
use crate::engine::{AppExecutor, Concurrency, Engine};
use crate::error::{DropError, Result};
use crate::graph::DropGraph;
use crate::ids::Oid;
use crate::spec::{GraphSpec, NodeDescriptor};
use crate::status::{DropStatus, ExecStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pristine,
    Building,
    Deploying,
    Running,
    Finished,
    Cancelled,
}

impl SessionStatus {
    fn can_transition(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pristine, Building)
                | (Building, Building)
                | (Building, Deploying)
                | (Deploying, Running)
                | (Running, Finished)
                | (Pristine, Cancelled)
                | (Building, Cancelled)
                | (Deploying, Cancelled)
                | (Running, Cancelled)
        )
    }
}

/// Per-oid execution summary returned by `graph_status`, the session-level
/// analogue of walking every drop and reading its status.
#[derive(Debug, Clone)]
pub struct DropStatusSummary {
    pub oid: Oid,
    pub drop_status: Option<DropStatus>,
    pub exec_status: Option<ExecStatus>,
}

/// One node's shape in the graph returned by `getGraph`: identity, kind, and
/// its edges by oid. Unlike [`DropStatusSummary`] this carries no runtime
/// state — it is the structure a caller walks to render or re-derive a DAG.
#[derive(Debug, Clone)]
pub struct GraphNodeDescriptor {
    pub oid: Oid,
    pub is_app: bool,
    pub producer: Option<Oid>,
    pub consumers: Vec<Oid>,
    pub streaming_consumers: Vec<Oid>,
    pub inputs: Vec<Oid>,
    pub streaming_inputs: Vec<Oid>,
    pub outputs: Vec<Oid>,
}

/// One session: a session id, an accumulating graph spec, and — once
/// deployed — the built graph and its engine.
pub struct Session {
    id: String,
    status: SessionStatus,
    pending_spec: GraphSpec,
    graph: Option<Arc<DropGraph>>,
    engine: Option<Arc<Engine>>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: SessionStatus::Pristine,
            pending_spec: Vec::new(),
            graph: None,
            engine: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    fn transition(&mut self, next: SessionStatus) -> Result<()> {
        if !self.status.can_transition(next) {
            return Err(DropError::invalid_state(
                self.id.clone(),
                format!("cannot move session from {:?} to {:?}", self.status, next),
            ));
        }
        self.status = next;
        Ok(())
    }

    /// Append `spec`'s nodes to the session's accumulating graph spec.
    /// Valid only before deployment; a session that has already been
    /// deployed rejects late additions rather than silently growing a
    /// running graph.
    pub fn add_graph_spec(&mut self, spec: GraphSpec) -> Result<()> {
        if self.status == SessionStatus::Pristine {
            self.transition(SessionStatus::Building)?;
        } else if self.status != SessionStatus::Building {
            return Err(DropError::invalid_state(self.id.clone(), "graph spec can only be added while BUILDING"));
        }
        self.pending_spec.extend(spec);
        Ok(())
    }

    /// Wire a relationship between two nodes that may have arrived in
    /// separate `add_graph_spec` calls (e.g. one per node in a composite
    /// deployment), without requiring the whole graph spec up front.
    pub fn link_graph_parts(&mut self, from: Oid, to: Oid, relationship: LinkKind) -> Result<()> {
        if self.status != SessionStatus::Building {
            return Err(DropError::invalid_state(self.id.clone(), "graph parts can only be linked while BUILDING"));
        }
        let from_node = self
            .pending_spec
            .iter_mut()
            .find(|n| n.oid() == &from)
            .ok_or_else(|| DropError::invalid_relationship(from.to_string(), to.to_string(), "unknown 'from' oid"))?;
        match (from_node, relationship) {
            (NodeDescriptor::App { outputs, .. }, LinkKind::Output) => outputs.push(to),
            (NodeDescriptor::App { inputs, .. }, LinkKind::Input) => inputs.push(to),
            (NodeDescriptor::App { streaming_inputs, .. }, LinkKind::StreamingInput) => streaming_inputs.push(to),
            _ => {
                return Err(DropError::invalid_relationship(
                    from.to_string(),
                    to.to_string(),
                    "link_graph_parts only attaches edges to an app node",
                ))
            }
        }
        Ok(())
    }

    /// Build the accumulated graph spec into a `DropGraph`, wire the engine
    /// to it and start data-driven firing. Moves `BUILDING -> DEPLOYING ->
    /// RUNNING`. `completed` pre-marks the named roots as already
    /// `COMPLETED` before the engine starts — used when a composite manager
    /// stitches a partition onto drops that finished on another node.
    pub fn deploy(
        &mut self,
        executor: Arc<dyn AppExecutor>,
        concurrency: Concurrency,
        completed: &[Oid],
    ) -> Result<()> {
        self.transition(SessionStatus::Deploying)?;
        let graph = GraphBuilder::new().build(&self.pending_spec)?;
        let now = chrono::Utc::now();
        for (_, node) in graph.iter() {
            if let Some(secs) = node.expire_after_secs {
                *node.expiration_date.write() = Some(now + chrono::Duration::seconds(secs));
            }
        }
        for oid in completed {
            let idx = graph
                .index_of(oid)
                .ok_or_else(|| DropError::invalid_state(oid.to_string(), "not present in this session's graph"))?;
            if let Some(data) = graph.node(idx).as_data() {
                data.open(oid.as_str())?;
                data.close(oid.as_str())?;
            }
        }
        let graph = Arc::new(graph);
        let engine = Engine::new(graph.clone(), executor, concurrency);
        engine.start();
        self.graph = Some(graph);
        self.engine = Some(engine);
        self.transition(SessionStatus::Running)?;
        info!(session = %self.id, "session deployed");
        Ok(())
    }

    pub fn graph(&self) -> Option<&Arc<DropGraph>> {
        self.graph.as_ref()
    }

    pub fn engine(&self) -> Option<&Arc<Engine>> {
        self.engine.as_ref()
    }

    /// Per-drop status snapshot across the whole graph, for `getGraphStatus`.
    pub fn graph_status(&self) -> Vec<DropStatusSummary> {
        let Some(graph) = &self.graph else { return Vec::new() };
        graph
            .iter()
            .map(|(_, node)| DropStatusSummary {
                oid: node.oid.clone(),
                drop_status: node.as_data().map(|d| d.status()),
                exec_status: node.as_app().map(|a| a.exec_status()),
            })
            .collect()
    }

    /// The raw graph structure, for `getGraph`: every drop's identity, kind,
    /// and edges by oid, with no status mixed in (see [`Self::graph_status`]
    /// for that). Empty before the session has a graph.
    pub fn graph_descriptor(&self) -> Vec<GraphNodeDescriptor> {
        let Some(graph) = &self.graph else { return Vec::new() };
        graph
            .iter()
            .map(|(_, node)| {
                let edges = node.edges.read();
                GraphNodeDescriptor {
                    oid: node.oid.clone(),
                    is_app: node.is_app(),
                    producer: edges.producer.map(|i| graph.node(i).oid.clone()),
                    consumers: edges.consumers.iter().map(|&i| graph.node(i).oid.clone()).collect(),
                    streaming_consumers: edges.streaming_consumers.iter().map(|&i| graph.node(i).oid.clone()).collect(),
                    inputs: edges.inputs.iter().map(|&i| graph.node(i).oid.clone()).collect(),
                    streaming_inputs: edges.streaming_inputs.iter().map(|&i| graph.node(i).oid.clone()).collect(),
                    outputs: edges.outputs.iter().map(|&i| graph.node(i).oid.clone()).collect(),
                }
            })
            .collect()
    }

    /// Whether every app drop in the graph has reached a terminal exec
    /// status. A session with no apps (pure data graph) is finished as
    /// soon as it is deployed.
    pub fn is_finished(&self) -> bool {
        match &self.graph {
            None => false,
            Some(graph) => graph
                .iter()
                .filter_map(|(_, node)| node.as_app())
                .all(|app| app.exec_status().is_terminal()),
        }
    }

    pub fn mark_finished(&mut self) -> Result<()> {
        self.transition(SessionStatus::Finished)
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(SessionStatus::Cancelled)
    }

    /// Tear the session down: cancel pending expiration timers (there is
    /// nothing left to expire once the graph is discarded), unsubscribe
    /// every event handler, and evict the payload of any drop marked
    /// `expireAfterUse`. Idempotent.
    pub fn destroy(&mut self) {
        if let Some(graph) = self.graph.take() {
            for (_, node) in graph.iter() {
                if node.expire_after_use {
                    if let Some(data) = node.as_data() {
                        data.evict_payload(node.oid.as_str());
                    }
                }
                node.events.unsubscribe_all();
            }
        }
        self.engine = None;
        warn!(session = %self.id, "session destroyed");
    }
}

/// Which adjacency list `link_graph_parts` attaches `to` onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Input,
    StreamingInput,
    Output,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeIndex;
    use async_trait::async_trait;

    struct NoopExecutor;

    #[async_trait]
    impl AppExecutor for NoopExecutor {
        async fn execute(&self, _graph: &DropGraph, _app_idx: NodeIndex) -> Result<()> {
            Ok(())
        }
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
    fn lifecycle_moves_through_expected_states() {
        let mut session = Session::new("s1");
        assert_eq!(session.status(), SessionStatus::Pristine);
        session.add_graph_spec(chain_spec()).unwrap();
        assert_eq!(session.status(), SessionStatus::Building);
    }

    #[tokio::test]
    async fn deploy_builds_graph_and_starts_running() {
        let mut session = Session::new("s1");
        session.add_graph_spec(chain_spec()).unwrap();
        session.deploy(Arc::new(NoopExecutor), Concurrency::Inline, &[]).unwrap();
        assert_eq!(session.status(), SessionStatus::Running);
        assert_eq!(session.graph().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn deploy_resolves_expire_after_secs_to_an_absolute_date() {
        let spec: GraphSpec = serde_json::from_value(serde_json::json!([
            {"oid": "D", "type": "data", "dropType": "memory", "expireAfterSecs": 1},
        ]))
        .unwrap();
        let mut session = Session::new("s1");
        session.add_graph_spec(spec).unwrap();
        let before = chrono::Utc::now();
        session.deploy(Arc::new(NoopExecutor), Concurrency::Inline, &[]).unwrap();

        let graph = session.graph().unwrap();
        let node = graph.node(graph.index_of(&Oid::new("D")).unwrap());
        let expiry = node.expiration_date.read().expect("expiration date should be resolved at deploy");
        assert!(expiry > before);
    }

    #[tokio::test]
    async fn destroy_evicts_payload_of_drops_marked_expire_after_use() {
        let spec: GraphSpec = serde_json::from_value(serde_json::json!([
            {"oid": "D", "type": "data", "dropType": "memory", "expireAfterUse": true},
        ]))
        .unwrap();
        let mut session = Session::new("s1");
        session.add_graph_spec(spec).unwrap();
        session.deploy(Arc::new(NoopExecutor), Concurrency::Inline, &[]).unwrap();

        let graph = session.graph().unwrap().clone();
        let node = graph.node(graph.index_of(&Oid::new("D")).unwrap()).clone();
        let data = node.as_data().unwrap();
        data.open("D").unwrap();
        data.write("D", b"payload").unwrap();
        data.close("D").unwrap();

        session.destroy();
        assert_eq!(data.read("D").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn late_add_graph_spec_after_deploy_is_rejected() {
        let mut session = Session::new("s1");
        session.add_graph_spec(chain_spec()).unwrap();
        session.status = SessionStatus::Running;
        assert!(session.add_graph_spec(chain_spec()).is_err());
    }
}
