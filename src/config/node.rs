//! Node Configuration
//!
//! Listening address, seed peer and handshake/reporting timing.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use serde::Deserialize;

use crate::cluster::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::cluster::{HandshakeLimits, NodeAddress, TieBreak};

/// Upper bound for configured timeouts and intervals (one year)
pub const MAX_NODE_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Node configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address to accept handshakes on
    /// Default: 0.0.0.0:7400
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Host other nodes use to reach us
    /// If not set, the bind IP, then the resolved hostname, then "localhost"
    pub advertise_host: Option<String>,

    /// Seed peer to join on startup ("host:port")
    /// When set, a failed handshake aborts startup
    pub seed: Option<String>,

    /// Upper bound on a handshake (e.g., "10s", "500ms")
    /// Default: 10s
    #[serde(default = "default_handshake_timeout", with = "humantime_serde")]
    pub handshake_timeout: Duration,

    /// Interval between cluster view reports
    /// Default: 5s
    #[serde(default = "default_report_interval", with = "humantime_serde")]
    pub report_interval: Duration,

    /// Number of runtime worker threads (0 = auto)
    #[serde(default)]
    pub workers: usize,

    /// Maximum concurrently served inbound handshakes
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum handshake payload size in bytes
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,

    /// Winner of a merge conflict between equal timestamps
    #[serde(default)]
    pub tie_break: TieBreak,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7400))
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_report_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_payload_size() -> usize {
    DEFAULT_MAX_PAYLOAD_SIZE
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            advertise_host: None,
            seed: None,
            handshake_timeout: default_handshake_timeout(),
            report_interval: default_report_interval(),
            workers: 0,
            max_connections: default_max_connections(),
            max_payload_size: default_max_payload_size(),
            tie_break: TieBreak::default(),
        }
    }
}

impl NodeConfig {
    /// Address advertised in our node definition for the given bound port
    /// Priority: explicit host > specific bind IP > resolved hostname > localhost
    pub fn advertise_address(&self, port: u16) -> NodeAddress {
        if let Some(host) = &self.advertise_host {
            return NodeAddress::new(host.clone(), port);
        }

        match self.bind.ip() {
            ip if ip.is_unspecified() => {}
            // Bracketed so the "host:port" string stays unambiguous
            IpAddr::V6(ip) => return NodeAddress::new(format!("[{}]", ip), port),
            IpAddr::V4(ip) => return NodeAddress::new(ip.to_string(), port),
        }

        match resolve_local_ip() {
            Some(ip) => NodeAddress::new(ip.to_string(), port),
            None => NodeAddress::new("localhost", port),
        }
    }

    /// Limits for both handshake roles
    pub fn handshake_limits(&self) -> HandshakeLimits {
        HandshakeLimits {
            timeout: self.handshake_timeout,
            max_payload_size: self.max_payload_size,
        }
    }

    /// Effective worker thread count
    pub fn worker_threads(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }
}

/// Resolve the local machine's IP address by resolving the hostname
fn resolve_local_ip() -> Option<IpAddr> {
    let hostname = hostname::get().ok()?;
    let addr_str = format!("{}:0", hostname.to_string_lossy());
    addr_str
        .to_socket_addrs()
        .ok()?
        .find(|addr| addr.is_ipv4())
        .map(|addr| addr.ip())
}
