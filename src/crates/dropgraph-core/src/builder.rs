//! Turns a [`GraphSpec`] into a wired, validated [`DropGraph`].
//!
//! Construction is two-phase because relationships reference `oid`s that may
//! appear later in the flat node list: every node is added to the arena
//! first, then every relationship is wired, then the whole thing is checked
//! for cycles in one pass.

use std::collections::HashMap;
use std::sync::Arc;

use crate::drop::{AppDrop, AppKind, DataDrop, DropNode};
use crate::error::{DropError, Result};
use crate::events::{DropEvent, Topic};
use crate::graph::{DropGraph, NodeIndex, RelationshipKind};
use crate::ids::{Oid, Uid};
use crate::spec::{AppTypeSpec, DropTypeSpec, GraphSpec, NodeDescriptor};
use crate::status::{DropStatus, ExecutionMode};

#[derive(Default)]
pub struct GraphBuilder;

impl GraphBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build a `DropGraph` from `spec`, assigning every node a fresh `Uid`.
    /// Fails if an edge references an unknown `oid`, if a data drop would
    /// gain a second producer, or if the resulting graph is not a DAG.
    pub fn build(&self, spec: &GraphSpec) -> Result<DropGraph> {
        let mut graph = DropGraph::new();
        let mut descriptors: HashMap<Oid, &NodeDescriptor> = HashMap::new();

        for node in spec {
            if descriptors.insert(node.oid().clone(), node).is_some() {
                return Err(DropError::InvalidGraph(format!("duplicate oid '{}'", node.oid())));
            }
        }

        for node in spec {
            let handle = match node {
                NodeDescriptor::Data {
                    oid,
                    drop_type,
                    size_bound,
                    readable_while_writing,
                    execution_mode,
                    file_path,
                    expire_after_use,
                    expire_after_secs,
                    desired_replicas,
                    ..
                } => {
                    let data = match drop_type {
                        DropTypeSpec::Memory => DataDrop::new_memory(*readable_while_writing, *size_bound),
                        DropTypeSpec::File => {
                            let path = file_path.clone().ok_or_else(|| {
                                DropError::InvalidGraph(format!("file drop '{}' missing filePath", oid))
                            })?;
                            DataDrop::new_file(path.into(), *size_bound)
                        }
                        DropTypeSpec::Directory => {
                            let path = file_path.clone().unwrap_or_else(|| format!("/tmp/{}", oid));
                            DataDrop::new_directory(path.into())
                        }
                        DropTypeSpec::Container => DataDrop::new_container(),
                    };
                    DropNode::new_data_with_lifecycle(
                        oid.clone(),
                        Uid::generate(),
                        data,
                        execution_mode.unwrap_or_default(),
                        *expire_after_use,
                        *expire_after_secs,
                        *desired_replicas,
                    )
                }
                NodeDescriptor::App { oid, app_type, execution_mode, lib_path, init_params, .. } => {
                    let kind = match app_type {
                        AppTypeSpec::Barrier => AppKind::Barrier,
                        AppTypeSpec::Streaming => AppKind::Streaming,
                    };
                    let mut app = AppDrop::new(kind);
                    if let Some(path) = lib_path {
                        app = app.with_library(path.clone(), init_params.clone());
                    }
                    DropNode::new_app(oid.clone(), Uid::generate(), app, execution_mode.unwrap_or_default())
                }
            };
            graph.add_node(handle);
        }

        for node in spec {
            if let NodeDescriptor::App { oid, inputs, streaming_inputs, outputs, .. } = node {
                for input in inputs {
                    graph.add_relationship(input, oid, RelationshipKind::ConsumedBy)?;
                }
                for input in streaming_inputs {
                    graph.add_relationship(input, oid, RelationshipKind::StreamingConsumedBy)?;
                }
                for output in outputs {
                    graph.add_relationship(output, oid, RelationshipKind::ProducedBy)?;
                }
            }
        }

        graph.assert_acyclic()?;
        Self::wire_containers(&mut graph, spec)?;
        Ok(graph)
    }

    /// Register each container/directory node's declared children and
    /// subscribe the container to derive its own completion from theirs, per
    /// the "container status is derived" rule: a container has no payload of
    /// its own, so nothing else ever calls `close` on it.
    fn wire_containers(graph: &mut DropGraph, spec: &GraphSpec) -> Result<()> {
        let mut containers: Vec<(NodeIndex, Vec<NodeIndex>)> = Vec::new();

        for node in spec {
            let NodeDescriptor::Data { oid, drop_type, children, .. } = node else { continue };
            if children.is_empty() {
                continue;
            }
            if !matches!(drop_type, DropTypeSpec::Container | DropTypeSpec::Directory) {
                return Err(DropError::InvalidGraph(format!(
                    "drop '{}' declares children but is not a container or directory",
                    oid
                )));
            }
            let container_idx = graph
                .index_of(oid)
                .ok_or_else(|| DropError::InvalidGraph(format!("unknown container oid '{}'", oid)))?;
            let mut child_indices = Vec::with_capacity(children.len());
            for child_oid in children {
                let child_idx = graph.index_of(child_oid).ok_or_else(|| {
                    DropError::InvalidGraph(format!("container '{}' references unknown child '{}'", oid, child_oid))
                })?;
                graph.node(container_idx).as_data().expect("checked above").add_child(child_oid.clone());
                child_indices.push(child_idx);
            }
            containers.push((container_idx, child_indices));
        }

        for (container_idx, child_indices) in containers {
            let container = graph.node(container_idx).clone();
            for &child_idx in &child_indices {
                let container = container.clone();
                let child_indices = child_indices.clone();
                let graph_ref = ContainerChildren { nodes: child_indices.iter().map(|&i| graph.node(i).clone()).collect() };
                graph.node(child_idx).events.subscribe(
                    Topic::Status,
                    Arc::new(move |event: &DropEvent| {
                        if event.new_status != Some(DropStatus::Completed) {
                            return;
                        }
                        let all_completed = graph_ref
                            .nodes
                            .iter()
                            .all(|n| n.as_data().map(|d| d.status() == DropStatus::Completed).unwrap_or(false));
                        if !all_completed {
                            return;
                        }
                        if let Some(data) = container.as_data() {
                            if data.status() != DropStatus::Completed {
                                if data.close(container.oid.as_str()).is_ok() {
                                    container.events.emit(&data.status_event(
                                        &container.oid,
                                        &container.uid,
                                        DropStatus::Completed,
                                    ));
                                }
                            }
                        }
                    }),
                );
            }
        }
        Ok(())
    }
}

/// Snapshot of a container's children handles, captured once so the
/// completion-check closure doesn't need a reference back into the graph
/// (which it can't hold across `'static` subscriber storage).
struct ContainerChildren {
    nodes: Vec<crate::drop::DropHandle>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_producer_consumer_chain() {
        let spec: GraphSpec = serde_json::from_value(serde_json::json!([
            {"oid": "A", "type": "data", "dropType": "memory"},
            {"oid": "App1", "type": "app", "appType": "barrier", "inputs": ["A"], "outputs": ["B"]},
            {"oid": "B", "type": "data", "dropType": "memory"},
        ]))
        .unwrap();
        let graph = GraphBuilder::new().build(&spec).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.roots().len(), 1);
        assert_eq!(graph.leaves().len(), 1);
    }

    #[test]
    fn rejects_dangling_reference() {
        let spec: GraphSpec = serde_json::from_value(serde_json::json!([
            {"oid": "App1", "type": "app", "appType": "barrier", "inputs": ["missing"], "outputs": []},
        ]))
        .unwrap();
        assert!(GraphBuilder::new().build(&spec).is_err());
    }

    #[test]
    fn rejects_duplicate_oid() {
        let spec: GraphSpec = serde_json::from_value(serde_json::json!([
            {"oid": "A", "type": "data", "dropType": "memory"},
            {"oid": "A", "type": "data", "dropType": "memory"},
        ]))
        .unwrap();
        assert!(GraphBuilder::new().build(&spec).is_err());
    }

    #[test]
    fn container_completes_once_every_child_completes() {
        let spec: GraphSpec = serde_json::from_value(serde_json::json!([
            {"oid": "A", "type": "data", "dropType": "memory"},
            {"oid": "B", "type": "data", "dropType": "memory"},
            {"oid": "C", "type": "data", "dropType": "container", "children": ["A", "B"]},
        ]))
        .unwrap();
        let graph = GraphBuilder::new().build(&spec).unwrap();

        let a = graph.node(graph.index_of(&Oid::new("A")).unwrap()).clone();
        let b = graph.node(graph.index_of(&Oid::new("B")).unwrap()).clone();
        let c = graph.node(graph.index_of(&Oid::new("C")).unwrap()).clone();

        a.as_data().unwrap().open("A").unwrap();
        a.as_data().unwrap().close("A").unwrap();
        a.events.emit(&a.as_data().unwrap().status_event(&a.oid, &a.uid, DropStatus::Completed));
        assert_eq!(c.as_data().unwrap().status(), DropStatus::Initialized);

        b.as_data().unwrap().open("B").unwrap();
        b.as_data().unwrap().close("B").unwrap();
        b.events.emit(&b.as_data().unwrap().status_event(&b.oid, &b.uid, DropStatus::Completed));
        assert_eq!(c.as_data().unwrap().status(), DropStatus::Completed);
    }

    #[test]
    fn rejects_children_on_non_container_drop() {
        let spec: GraphSpec = serde_json::from_value(serde_json::json!([
            {"oid": "A", "type": "data", "dropType": "memory"},
            {"oid": "B", "type": "data", "dropType": "memory", "children": ["A"]},
        ]))
        .unwrap();
        assert!(GraphBuilder::new().build(&spec).is_err());
    }
}
