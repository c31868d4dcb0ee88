//! Composite managers: Data Island (children are Node Managers) and Master
//! (children are Data Island Managers, or Node Managers directly in small
//! deployments). Both are the same fan-out shape over [`ManagerClient`], so
//! one type serves either tier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{error, info, warn};

use dropgraph_core::{GraphSpec, Oid, SessionStatus};
use dropgraph_core::spec::{DropTypeSpec, NodeDescriptor};

use crate::client::ManagerClient;
use crate::error::{ManagerError, Result};
use crate::node_manager::DropStatusSummary;
use crate::proxy::CrossNodeEdge;

/// Split `spec` into one sub-spec per `node` attribute, synthesizing a
/// no-producer proxy data descriptor on the consuming side of any edge that
/// crosses a node boundary. Returns the partitions plus the list of
/// cross-node edges the composite must bridge after deploy.
pub fn partition_spec(spec: &GraphSpec) -> Result<(HashMap<String, GraphSpec>, Vec<CrossNodeEdge>)> {
    let mut home_node: HashMap<Oid, String> = HashMap::new();

    for desc in spec {
        if let NodeDescriptor::App { oid, node, .. } = desc {
            let node = node.clone().ok_or_else(|| {
                ManagerError::InvalidGraph(format!("app '{}' has no 'node' assignment", oid))
            })?;
            home_node.insert(oid.clone(), node);
        }
    }
    for desc in spec {
        if let NodeDescriptor::App { outputs, node, .. } = desc {
            for out in outputs {
                home_node.entry(out.clone()).or_insert_with(|| node.clone().unwrap());
            }
        }
    }
    for desc in spec {
        if let NodeDescriptor::App { inputs, streaming_inputs, node, .. } = desc {
            for input in inputs.iter().chain(streaming_inputs.iter()) {
                home_node.entry(input.clone()).or_insert_with(|| node.clone().unwrap());
            }
        }
    }

    let mut partitions: HashMap<String, GraphSpec> = HashMap::new();
    let mut cross_edges = Vec::new();

    for desc in spec {
        let node = home_node
            .get(desc.oid())
            .cloned()
            .ok_or_else(|| ManagerError::InvalidGraph(format!("cannot place '{}' on any node", desc.oid())))?;
        partitions.entry(node).or_default().push(desc.clone());
    }

    for desc in spec {
        if let NodeDescriptor::App { inputs, streaming_inputs, node: app_node, .. } = desc {
            let app_node = app_node.clone().expect("validated above");
            for input in inputs.iter().chain(streaming_inputs.iter()) {
                let producer_node = home_node.get(input).cloned().unwrap_or_else(|| app_node.clone());
                if producer_node != app_node {
                    let partition = partitions.entry(app_node.clone()).or_default();
                    if !partition.iter().any(|d| d.oid() == input) {
                        partition.push(NodeDescriptor::Data {
                            oid: input.clone(),
                            drop_type: DropTypeSpec::Memory,
                            size_bound: None,
                            readable_while_writing: false,
                            execution_mode: None,
                            file_path: None,
                            children: Vec::new(),
                            expire_after_use: false,
                            expire_after_secs: None,
                            desired_replicas: 0,
                        });
                    }
                    cross_edges.push(CrossNodeEdge {
                        data_oid: input.clone(),
                        producer_node,
                        consumer_node: app_node.clone(),
                    });
                }
            }
        }
    }

    Ok((partitions, cross_edges))
}

/// A composite manager: a static list of child addresses plus the bridging
/// logic for whatever cross-node edges the last deploy discovered.
pub struct CompositeManager {
    children: HashMap<String, Arc<dyn ManagerClient>>,
}

impl CompositeManager {
    pub fn new(children: Vec<Arc<dyn ManagerClient>>) -> Self {
        Self {
            children: children.into_iter().map(|c| (c.address().to_string(), c)).collect(),
        }
    }

    fn child(&self, node: &str) -> Result<&Arc<dyn ManagerClient>> {
        self.children
            .get(node)
            .ok_or_else(|| ManagerError::invalid_state(node, "no child manager registered for this node"))
    }

    pub async fn create_session(&self, session_id: &str) -> Result<()> {
        let mut succeeded = Vec::new();
        let total = self.children.len();
        for (node, child) in &self.children {
            match child.create_session(session_id).await {
                Ok(()) => succeeded.push(node.clone()),
                Err(e) => {
                    self.rollback(session_id, &succeeded).await;
                    return Err(ManagerError::PartialFailure(1, total, e.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Partition `spec` and ship each partition to its owning child's
    /// session. On partial failure, best-effort rolls back the children
    /// that succeeded (`destroySession`) and reports the aggregated error.
    pub async fn deploy_graph(&self, session_id: &str, spec: GraphSpec) -> Result<Vec<CrossNodeEdge>> {
        let (partitions, cross_edges) = partition_spec(&spec)?;

        let mut succeeded = Vec::new();
        for (node, partition) in &partitions {
            let child = self.child(node)?;
            match child.add_graph_spec(session_id, partition.clone()).await {
                Ok(()) => succeeded.push(node.clone()),
                Err(e) => {
                    self.rollback(session_id, &succeeded).await;
                    return Err(ManagerError::PartialFailure(1, partitions.len(), e.to_string()));
                }
            }
        }

        let deploys = partitions.keys().map(|node| {
            let child = self.child(node).expect("validated above");
            let session_id = session_id.to_string();
            async move { (node.clone(), child.deploy_session(&session_id, &[]).await) }
        });
        let results = join_all(deploys).await;
        let failures: Vec<_> = results.iter().filter(|(_, r)| r.is_err()).collect();
        if !failures.is_empty() {
            let all_nodes: Vec<String> = partitions.keys().cloned().collect();
            self.rollback(session_id, &all_nodes).await;
            let reason = failures
                .iter()
                .map(|(n, r)| format!("{n}: {}", r.as_ref().unwrap_err()))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ManagerError::PartialFailure(failures.len(), partitions.len(), reason));
        }

        self.bridge_cross_node_edges(session_id, cross_edges.clone());
        Ok(cross_edges)
    }

    async fn rollback(&self, session_id: &str, nodes: &[String]) {
        for node in nodes {
            if let Ok(child) = self.child(node) {
                if let Err(e) = child.destroy_session(session_id).await {
                    warn!(node = %node, session = session_id, error = %e, "rollback destroy_session failed");
                }
            }
        }
    }

    /// Spawn a bridging task per cross-node edge: poll the producer child's
    /// graph status until the edge's `data_oid` reaches `COMPLETED`, then
    /// push that completion onto the consumer child's local proxy drop.
    fn bridge_cross_node_edges(&self, session_id: &str, edges: Vec<CrossNodeEdge>) {
        for edge in edges {
            let Some(producer) = self.child(&edge.producer_node).ok().cloned() else { continue };
            let Some(consumer) = self.child(&edge.consumer_node).ok().cloned() else { continue };
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                loop {
                    match producer.get_graph_status(&session_id).await {
                        Ok(statuses) => {
                            let done = statuses.iter().any(|s| {
                                s.oid == edge.data_oid && s.drop_status == Some(dropgraph_core::DropStatus::Completed)
                            });
                            if done {
                                if let Err(e) = consumer.mark_proxy_completed(&session_id, &edge.data_oid).await {
                                    error!(oid = %edge.data_oid, error = %e, "failed to push proxy completion");
                                }
                                return;
                            }
                        }
                        Err(e) => {
                            error!(oid = %edge.data_oid, error = %e, "failed to poll producer status for proxy bridge");
                            return;
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            });
        }
    }

    pub async fn deploy_session(&self, session_id: &str, completed: &[Oid]) -> Result<()> {
        let nodes: Vec<String> = self.children.keys().cloned().collect();
        let deploys = nodes.iter().map(|node| {
            let child = self.child(node).expect("validated above");
            let session_id = session_id.to_string();
            let completed = completed.to_vec();
            async move { (node.clone(), child.deploy_session(&session_id, &completed).await) }
        });
        let results = join_all(deploys).await;
        if let Some((node, Err(e))) = results.into_iter().find(|(_, r)| r.is_err()) {
            return Err(ManagerError::invalid_state(node, e.to_string()));
        }
        Ok(())
    }

    /// Element-wise union of every child's per-drop status. A child that
    /// errors on this query contributes no entries rather than failing the
    /// whole call, per the "query calls tolerate per-child errors" policy.
    pub async fn get_graph_status(&self, session_id: &str) -> HashMap<String, Vec<DropStatusSummary>> {
        let mut out = HashMap::new();
        for (node, child) in &self.children {
            match child.get_graph_status(session_id).await {
                Ok(statuses) => {
                    out.insert(node.clone(), statuses);
                }
                Err(e) => {
                    warn!(node = %node, session = session_id, error = %e, "child status query failed, reporting a hole");
                }
            }
        }
        out
    }

    pub async fn get_session_status(&self, session_id: &str) -> HashMap<String, SessionStatus> {
        let mut out = HashMap::new();
        for (node, child) in &self.children {
            if let Ok(status) = child.get_session_status(session_id).await {
                out.insert(node.clone(), status);
            }
        }
        out
    }

    pub async fn destroy_session(&self, session_id: &str) -> Result<()> {
        let nodes: Vec<String> = self.children.keys().cloned().collect();
        self.rollback(session_id, &nodes).await;
        info!(session = session_id, "composite session destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dropgraph_core::{AppExecutor, Concurrency, DropGraph, NodeIndex};
    use dropgraph_dlm::{Dlm, DlmConfig};

    use crate::client::InProcessClient;
    use crate::node_manager::NodeManager;

    struct NoopExecutor;

    #[async_trait]
    impl AppExecutor for NoopExecutor {
        async fn execute(&self, _graph: &DropGraph, _app_idx: NodeIndex) -> dropgraph_core::Result<()> {
            Ok(())
        }
    }

    fn two_node_spec() -> GraphSpec {
        serde_json::from_value(serde_json::json!([
            {"oid": "A", "type": "data", "dropType": "memory"},
            {"oid": "App1", "type": "app", "appType": "barrier", "node": "n1", "inputs": ["A"], "outputs": ["B"]},
            {"oid": "B", "type": "data", "dropType": "memory"},
            {"oid": "App2", "type": "app", "appType": "barrier", "node": "n2", "inputs": ["B"], "outputs": ["C"]},
            {"oid": "C", "type": "data", "dropType": "memory"},
        ]))
        .unwrap()
    }

    #[test]
    fn partition_spec_splits_by_node_and_synthesizes_a_proxy_for_the_crossing_edge() {
        let (partitions, cross_edges) = partition_spec(&two_node_spec()).unwrap();

        assert_eq!(partitions.len(), 2);
        assert_eq!(cross_edges.len(), 1);
        assert_eq!(cross_edges[0].data_oid, Oid::new("B"));
        assert_eq!(cross_edges[0].producer_node, "n1");
        assert_eq!(cross_edges[0].consumer_node, "n2");

        let n2 = &partitions["n2"];
        let proxy = n2.iter().find(|d| d.oid() == &Oid::new("B")).expect("proxy for B synthesized on n2");
        assert!(matches!(proxy, NodeDescriptor::Data { .. }));
    }

    #[test]
    fn partition_spec_rejects_an_app_with_no_node_assignment() {
        let spec: GraphSpec = serde_json::from_value(serde_json::json!([
            {"oid": "App1", "type": "app", "appType": "barrier", "inputs": [], "outputs": []},
        ]))
        .unwrap();
        assert!(matches!(partition_spec(&spec), Err(ManagerError::InvalidGraph(_))));
    }

    fn node_client(address: &str) -> Arc<dyn ManagerClient> {
        let dlm = Dlm::new(DlmConfig::default());
        let manager = Arc::new(NodeManager::new(dlm, Arc::new(NoopExecutor), Concurrency::Inline));
        Arc::new(InProcessClient::new(address, manager))
    }

    #[tokio::test]
    async fn deploy_graph_fans_out_partitions_and_bridges_the_crossing_edge() {
        let n1 = node_client("n1");
        let n2 = node_client("n2");
        let composite = CompositeManager::new(vec![n1.clone(), n2.clone()]);

        composite.create_session("s1").await.unwrap();
        let cross_edges = composite.deploy_graph("s1", two_node_spec()).await.unwrap();
        assert_eq!(cross_edges.len(), 1);

        // Give the bridging task a moment to observe n1's completion and
        // push it onto n2's local proxy for B.
        for _ in 0..20 {
            let statuses = n2.get_graph_status("s1").await.unwrap();
            let b = statuses.iter().find(|s| s.oid == Oid::new("B"));
            if matches!(b.and_then(|s| s.drop_status), Some(dropgraph_core::DropStatus::Completed)) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("proxy drop for B never reached COMPLETED on n2");
    }

    #[tokio::test]
    async fn create_session_rolls_back_already_succeeded_children_on_partial_failure() {
        let n1 = node_client("n1");
        let composite = CompositeManager::new(vec![n1.clone()]);

        composite.create_session("s1").await.unwrap();
        assert!(matches!(
            composite.create_session("s1").await,
            Err(ManagerError::PartialFailure(_, _, _))
        ));
    }

    #[tokio::test]
    async fn get_session_status_aggregates_per_child_without_failing_on_a_missing_session() {
        let n1 = node_client("n1");
        let n2 = node_client("n2");
        let composite = CompositeManager::new(vec![n1.clone(), n2.clone()]);

        composite.create_session("s1").await.unwrap();
        let statuses = composite.get_session_status("s1").await;
        assert_eq!(statuses.len(), 2);
    }
}
