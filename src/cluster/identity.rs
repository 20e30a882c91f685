//! Node Identity
//!
//! Labels, addresses and the self-reported node definition exchanged
//! between nodes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique 128-bit node label, assigned once at node creation
///
/// Ordering compares the raw bytes as an unsigned big-endian integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeLabel(Uuid);

impl NodeLabel {
    /// Generate a fresh random label
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for NodeLabel {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Host and port at which a node accepts connections
///
/// Serialized as a single `"host:port"` string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress {
    host: String,
    port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error parsing a `"host:port"` address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParseError(String);

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid node address '{}', expected host:port", self.0)
    }
}

impl std::error::Error for AddressParseError {}

impl FromStr for NodeAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // rsplit keeps bracketed IPv6 hosts intact
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError(s.to_string()))?;
        if host.is_empty() {
            return Err(AddressParseError(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressParseError(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeAddress> for String {
    fn from(addr: NodeAddress) -> Self {
        addr.to_string()
    }
}

/// Liveness tag of a node definition
///
/// Only `Live` is ever produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum NodeStatus {
    Live,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Live => f.write_str("LIVE"),
        }
    }
}

/// A node's self-reported identity, address and liveness timestamp
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// When this definition was produced ("last observed alive")
    pub timestamp: DateTime<Utc>,
    /// Liveness tag
    #[serde(rename = "type")]
    pub status: NodeStatus,
    /// Node label
    pub label: NodeLabel,
    /// Reachable address
    pub address: NodeAddress,
}

/// Identity of the local node: its label and advertised address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    label: NodeLabel,
    address: NodeAddress,
}

impl NodeIdentity {
    /// Create an identity with a freshly generated label
    pub fn new(address: NodeAddress) -> Self {
        Self {
            label: NodeLabel::random(),
            address,
        }
    }

    pub fn label(&self) -> NodeLabel {
        self.label
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Produce a `LIVE` definition stamped with the current time
    pub fn current_definition(&self) -> NodeDefinition {
        NodeDefinition {
            timestamp: Utc::now(),
            status: NodeStatus::Live,
            label: self.label,
            address: self.address.clone(),
        }
    }
}
