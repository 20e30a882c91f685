//! rollcall - minimal peer-discovery node
//!
//! Each node keeps a view of which nodes are alive, optionally bootstraps it
//! from one seed peer with a single request/response handshake, and
//! periodically reports it. Views combine through a deterministic,
//! commutative, associative and idempotent merge.

pub mod cluster;
pub mod config;
pub mod node;

pub use cluster::{
    ClusterState, ClusterStateResolver, NodeAddress, NodeDefinition, NodeIdentity, NodeLabel,
    NodeStatus, TieBreak,
};
pub use config::Config;
pub use node::{Node, NodeError, NodePhase};
