//! The drop graph: an arena of drops plus index-based edges.
//!
//! Producer/consumer relationships are genuinely cyclic in a naive
//! `Arc<DropNode>`-holds-`Arc<DropNode>` representation (a consumer's
//! `producer` edge and the producer's `consumers` edge point at each other).
//! Rather than introduce `Weak` on one side and live with the upgrade
//! dance everywhere, the graph owns every drop in a single arena `Vec` and
//! edges are stored as [`NodeIndex`] values into that vector. A drop never
//! holds a strong reference to another drop.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::drop::{DropHandle, DropKind};
use crate::error::{DropError, Result};
use crate::ids::Oid;

/// Index of a drop within a [`DropGraph`]'s arena. Stable for the lifetime
/// of the graph; never reused after construction.
pub type NodeIndex = usize;

/// The kind of edge being added, used only to pick which adjacency lists on
/// each side get updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// `from` (data) is produced by `to` (app).
    ProducedBy,
    /// `from` (data) is consumed by `to` (app), barrier-style.
    ConsumedBy,
    /// `from` (data) streams into `to` (app).
    StreamingConsumedBy,
}

/// An arena of drops with index-based edges, built in two phases: add every
/// node first (`add_node`), then wire relationships (`add_relationship`).
/// `finalize` checks the result is acyclic.
#[derive(Debug, Default)]
pub struct DropGraph {
    nodes: Vec<DropHandle>,
    by_oid: HashMap<Oid, NodeIndex>,
}

impl DropGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, drop: DropHandle) -> NodeIndex {
        let idx = self.nodes.len();
        self.by_oid.insert(drop.oid.clone(), idx);
        self.nodes.push(drop);
        idx
    }

    pub fn index_of(&self, oid: &Oid) -> Option<NodeIndex> {
        self.by_oid.get(oid).copied()
    }

    pub fn node(&self, idx: NodeIndex) -> &DropHandle {
        &self.nodes[idx]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &DropHandle)> {
        self.nodes.iter().enumerate()
    }

    /// Wire a relationship between two already-added nodes. `from`/`to` are
    /// resolved by `oid`. Rejects relationships between two nodes of the
    /// same top-level kind (data-data, app-app) and rejects giving a data
    /// drop a second producer.
    pub fn add_relationship(&mut self, from: &Oid, to: &Oid, kind: RelationshipKind) -> Result<()> {
        let from_idx = self
            .index_of(from)
            .ok_or_else(|| DropError::invalid_relationship(from.to_string(), to.to_string(), "unknown 'from' oid"))?;
        let to_idx = self
            .index_of(to)
            .ok_or_else(|| DropError::invalid_relationship(from.to_string(), to.to_string(), "unknown 'to' oid"))?;

        let from_is_data = self.nodes[from_idx].is_data();
        let to_is_data = self.nodes[to_idx].is_data();
        if from_is_data == to_is_data {
            return Err(DropError::invalid_relationship(
                from.to_string(),
                to.to_string(),
                "relationships must connect a data drop to an app drop",
            ));
        }

        match kind {
            RelationshipKind::ProducedBy => {
                // from = data, to = app: app produces data.
                let mut data_edges = self.nodes[from_idx].edges.write();
                if data_edges.producer.is_some() {
                    return Err(DropError::invalid_relationship(
                        from.to_string(),
                        to.to_string(),
                        "data drop already has a producer",
                    ));
                }
                data_edges.producer = Some(to_idx);
                drop(data_edges);
                self.nodes[to_idx].edges.write().outputs.push(from_idx);
            }
            RelationshipKind::ConsumedBy => {
                // from = data, to = app: app consumes data as a barrier input.
                self.nodes[from_idx].edges.write().consumers.push(to_idx);
                self.nodes[to_idx].edges.write().inputs.push(from_idx);
            }
            RelationshipKind::StreamingConsumedBy => {
                self.nodes[from_idx].edges.write().streaming_consumers.push(to_idx);
                self.nodes[to_idx].edges.write().streaming_inputs.push(from_idx);
            }
        }
        Ok(())
    }

    /// Roots: data drops with no producer, and app drops with no inputs.
    pub fn roots(&self) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| match n.kind() {
                DropKind::Data(_) => n.edges.read().producer.is_none(),
                DropKind::App(_) => {
                    let e = n.edges.read();
                    e.inputs.is_empty() && e.streaming_inputs.is_empty()
                }
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Leaves: data drops with no consumers, and app drops with no outputs.
    pub fn leaves(&self) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| match n.kind() {
                DropKind::Data(_) => {
                    let e = n.edges.read();
                    e.consumers.is_empty() && e.streaming_consumers.is_empty()
                }
                DropKind::App(_) => n.edges.read().outputs.is_empty(),
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Nodes directly reachable from `idx` by following produced/consumed
    /// edges forward. Used both by the cycle check and by the engine's
    /// downstream error propagation.
    pub(crate) fn successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let e = self.nodes[idx].edges.read();
        match self.nodes[idx].kind() {
            DropKind::Data(_) => {
                let mut v = e.consumers.clone();
                v.extend(e.streaming_consumers.iter().copied());
                v
            }
            DropKind::App(_) => e.outputs.clone(),
        }
    }

    /// Depth-first cycle check over the whole arena. Called once after all
    /// relationships for a graph spec have been wired.
    pub fn assert_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];

        fn visit(
            graph: &DropGraph,
            idx: NodeIndex,
            marks: &mut Vec<Mark>,
        ) -> Result<()> {
            match marks[idx] {
                Mark::Done => return Ok(()),
                Mark::InProgress => {
                    return Err(DropError::InvalidGraph(format!(
                        "cycle detected through drop '{}'",
                        graph.nodes[idx].oid
                    )));
                }
                Mark::Unvisited => {}
            }
            marks[idx] = Mark::InProgress;
            for succ in graph.successors(idx) {
                visit(graph, succ, marks)?;
            }
            marks[idx] = Mark::Done;
            Ok(())
        }

        for idx in 0..self.nodes.len() {
            visit(self, idx, &mut marks)?;
        }
        Ok(())
    }

    /// Breadth-first traversal from `roots`, used by session deploy to hand
    /// every reachable drop to the lifecycle manager in dependency order.
    pub fn bfs_from_roots(&self) -> Vec<NodeIndex> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<NodeIndex> = self.roots().into_iter().collect();
        while let Some(idx) = queue.pop_front() {
            if !seen.insert(idx) {
                continue;
            }
            order.push(idx);
            for succ in self.successors(idx) {
                if !seen.contains(&succ) {
                    queue.push_back(succ);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drop::{AppDrop, AppKind, DataDrop, DropNode};
    use crate::ids::Uid;
    use crate::status::ExecutionMode;

    fn data_node(oid: &str) -> DropHandle {
        DropNode::new_data(Oid::new(oid), Uid::generate(), DataDrop::new_memory(false, None), ExecutionMode::Drop)
    }

    fn app_node(oid: &str) -> DropHandle {
        DropNode::new_app(Oid::new(oid), Uid::generate(), AppDrop::new(AppKind::Barrier), ExecutionMode::Drop)
    }

    #[test]
    fn producer_consumer_chain_has_one_root_one_leaf() {
        let mut g = DropGraph::new();
        g.add_node(data_node("A"));
        g.add_node(app_node("B"));
        g.add_node(data_node("C"));
        g.add_relationship(&Oid::new("A"), &Oid::new("B"), RelationshipKind::ConsumedBy).unwrap();
        g.add_relationship(&Oid::new("C"), &Oid::new("B"), RelationshipKind::ProducedBy).unwrap();
        g.assert_acyclic().unwrap();
        assert_eq!(g.roots(), vec![0]);
        assert_eq!(g.leaves(), vec![2]);
    }

    #[test]
    fn data_drop_cannot_have_two_producers() {
        let mut g = DropGraph::new();
        g.add_node(data_node("A"));
        g.add_node(app_node("B1"));
        g.add_node(app_node("B2"));
        g.add_relationship(&Oid::new("A"), &Oid::new("B1"), RelationshipKind::ProducedBy).unwrap();
        let err = g.add_relationship(&Oid::new("A"), &Oid::new("B2"), RelationshipKind::ProducedBy).unwrap_err();
        assert!(matches!(err, DropError::InvalidRelationship { .. }));
    }

    #[test]
    fn cycle_is_rejected() {
        let mut g = DropGraph::new();
        g.add_node(data_node("A"));
        g.add_node(app_node("B"));
        g.add_node(data_node("C"));
        g.add_node(app_node("D"));
        g.add_relationship(&Oid::new("A"), &Oid::new("B"), RelationshipKind::ConsumedBy).unwrap();
        g.add_relationship(&Oid::new("C"), &Oid::new("B"), RelationshipKind::ProducedBy).unwrap();
        g.add_relationship(&Oid::new("C"), &Oid::new("D"), RelationshipKind::ConsumedBy).unwrap();
        g.add_relationship(&Oid::new("A"), &Oid::new("D"), RelationshipKind::ProducedBy).unwrap();
        assert!(g.assert_acyclic().is_err());
    }
}
