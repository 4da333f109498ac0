//! The node orchestrator: wires transport, failure detection, election,
//! transactions, and the coordinator planner into one process.

mod node;
mod planner;

pub use node::{cluster_peers, Node, NodeRuntime, NodeSettings};
