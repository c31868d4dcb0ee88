//! Serializable graph specifications: the wire format a session's
//! `addGraphSpec` call accepts, and the format a template materializes into.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::Oid;
use crate::status::ExecutionMode;

/// A full graph spec: a flat list of node descriptors. Order is
/// insignificant; relationships are expressed by `oid` reference.
pub type GraphSpec = Vec<NodeDescriptor>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DropTypeSpec {
    Memory,
    File,
    Directory,
    Container,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppTypeSpec {
    Barrier,
    Streaming,
}

/// One node in a [`GraphSpec`]. Tagged on `type` the way the on-disk graph
/// spec format distinguishes data from app nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeDescriptor {
    Data {
        oid: Oid,
        drop_type: DropTypeSpec,
        #[serde(default)]
        size_bound: Option<u64>,
        #[serde(default)]
        readable_while_writing: bool,
        #[serde(default)]
        execution_mode: Option<ExecutionMode>,
        #[serde(default)]
        file_path: Option<String>,
        /// Named children for `container`/`directory` drops, resolved by
        /// `oid` once the whole spec's nodes exist. Ignored for other
        /// drop types.
        #[serde(default)]
        children: Vec<Oid>,
        /// Whether `Session::destroy` should release this drop's payload as
        /// soon as the session tears down.
        #[serde(default)]
        expire_after_use: bool,
        /// Seconds after deploy at which this drop becomes `EXPIRED`, the
        /// wire-format analogue of `expirationDate` (resolved to an absolute
        /// time once the graph actually deploys). Absent means no expiry.
        #[serde(default)]
        expire_after_secs: Option<i64>,
        /// Desired replica count handed to the DLM on registration.
        #[serde(default)]
        desired_replicas: u32,
    },
    App {
        oid: Oid,
        app_type: AppTypeSpec,
        #[serde(default)]
        inputs: Vec<Oid>,
        #[serde(default)]
        streaming_inputs: Vec<Oid>,
        #[serde(default)]
        outputs: Vec<Oid>,
        #[serde(default)]
        execution_mode: Option<ExecutionMode>,
        #[serde(default)]
        node: Option<String>,
        #[serde(default)]
        lib_path: Option<String>,
        /// `init` parameters for a native-library app (C9), ignored by
        /// in-process executors.
        #[serde(default)]
        init_params: HashMap<String, String>,
    },
}

impl NodeDescriptor {
    pub fn oid(&self) -> &Oid {
        match self {
            NodeDescriptor::Data { oid, .. } => oid,
            NodeDescriptor::App { oid, .. } => oid,
        }
    }

    /// The node attribute used to partition a graph spec across nodes for
    /// composite deployment (Data Island / Master managers). Absent on data
    /// nodes, whose placement is implied by their producer/consumer apps.
    pub fn node_attr(&self) -> Option<&str> {
        match self {
            NodeDescriptor::Data { .. } => None,
            NodeDescriptor::App { node, .. } => node.as_deref(),
        }
    }
}

/// A named, parameterizable graph spec, the analogue of the manager's
/// hardcoded template registry.
pub trait GraphTemplate: Send + Sync {
    fn name(&self) -> &str;
    fn materialize(&self, params: &serde_json::Value) -> crate::error::Result<GraphSpec>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_flat_node_list() {
        let spec: GraphSpec = serde_json::from_value(serde_json::json!([
            {"oid": "A", "type": "data", "dropType": "memory"},
            {"oid": "App1", "type": "app", "appType": "barrier", "inputs": ["A"], "outputs": ["B"]},
            {"oid": "B", "type": "data", "dropType": "memory"},
        ]))
        .unwrap();
        assert_eq!(spec.len(), 3);
        assert_eq!(spec[0].oid().as_str(), "A");
    }

    #[test]
    fn deserializes_container_children() {
        let spec: GraphSpec = serde_json::from_value(serde_json::json!([
            {"oid": "A", "type": "data", "dropType": "memory"},
            {"oid": "C", "type": "data", "dropType": "container", "children": ["A"]},
        ]))
        .unwrap();
        match &spec[1] {
            NodeDescriptor::Data { children, .. } => assert_eq!(children, &[Oid::new("A")]),
            _ => panic!("expected a data node"),
        }
    }
}
