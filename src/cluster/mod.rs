//! Cluster Module
//!
//! Membership model and bootstrap handshake.
//!
//! # Architecture
//!
//! - **Identity**: random 128-bit labels and self-reported node definitions
//! - **State**: immutable label -> definition snapshots
//! - **Resolver**: deterministic, commutative, associative, idempotent merge
//! - **Protocol/Handshake**: one length-prefixed JSON state per direction
//!   per TCP connection
//!
//! # Usage
//!
//! ```
//! use rollcall::cluster::{ClusterState, ClusterStateResolver, NodeAddress, NodeIdentity};
//!
//! let a = NodeIdentity::new(NodeAddress::new("localhost", 7400));
//! let b = NodeIdentity::new(NodeAddress::new("localhost", 7401));
//!
//! let merged = ClusterStateResolver::default().merge(
//!     &ClusterState::singleton(a.current_definition()),
//!     &ClusterState::singleton(b.current_definition()),
//! );
//! assert_eq!(merged.len(), 2);
//! ```

pub mod handshake;
mod identity;
pub mod protocol;
mod resolver;
mod state;

pub use handshake::{HandshakeError, HandshakeLimits};
pub use identity::{
    AddressParseError, NodeAddress, NodeDefinition, NodeIdentity, NodeLabel, NodeStatus,
};
pub use protocol::ProtocolError;
pub use resolver::{ClusterStateResolver, TieBreak};
pub use state::{ClusterState, LabelMismatch};
