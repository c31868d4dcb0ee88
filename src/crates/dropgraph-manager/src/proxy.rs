//! Inter-node edges: a data drop produced on one node and consumed on
//! another is represented, on the consuming node, as a local drop carrying
//! the same `oid` but no producer of its own — a proxy. The composite
//! manager bridges the two halves after deploy.

use dropgraph_core::Oid;

/// One edge crossing a node boundary, discovered while partitioning a graph
/// spec. `producer_node`/`consumer_node` are the `node` attribute values
/// assigned to the app on each side, not transport addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossNodeEdge {
    pub data_oid: Oid,
    pub producer_node: String,
    pub consumer_node: String,
}
