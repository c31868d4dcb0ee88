//! # dropgraph-manager - the three-tier manager hierarchy
//!
//! Hosts sessions on one address space ([`NodeManager`]) and fans operations
//! out across a static list of children ([`CompositeManager`], used for both
//! the Data Island and Master tiers — they differ only in what their
//! children are). [`client::ManagerClient`] is the boundary a composite
//! talks through; the one implementation in this crate
//! ([`client::InProcessClient`]) is backed directly by an `Arc<NodeManager>`,
//! exercising the fan-out/rollback/aggregation logic without a network stack.
//! A networked implementation of the same trait is the REST façade's job
//! (out of scope here, see `dropgraph_core`'s crate docs).

pub mod client;
pub mod composite;
pub mod error;
pub mod node_manager;
pub mod proxy;
pub mod template;

pub use client::{InProcessClient, ManagerClient};
pub use composite::{partition_spec, CompositeManager};
pub use error::{ManagerError, Result};
pub use node_manager::{DropStatusSummary, GraphNodeDescriptor, LinkKind, NodeManager};
pub use proxy::CrossNodeEdge;
pub use template::{GraphTemplate, TemplateArg, TemplateRegistry};
