//! Bootstrap Handshake
//!
//! One request/response exchange per connection. The initiator sends a
//! state holding only its own entry and waits for the responder's merged
//! view. The responder reads one state, merges it into its own, replies
//! with the result and closes the connection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::protocol::{read_state, write_state, ProtocolError};
use super::state::ClusterState;

/// Errors raised by either side of a handshake
#[derive(Debug)]
pub enum HandshakeError {
    /// Could not open the connection to the peer
    Connect(std::io::Error),
    /// Exchange did not complete within the allotted time
    Timeout(Duration),
    /// Framing or payload failure
    Protocol(ProtocolError),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connect failed: {}", e),
            Self::Timeout(d) => write!(f, "timed out after {:?}", d),
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
        }
    }
}

impl std::error::Error for HandshakeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(e) => Some(e),
            Self::Protocol(e) => Some(e),
            Self::Timeout(_) => None,
        }
    }
}

impl From<ProtocolError> for HandshakeError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

/// Limits applied to one exchange
#[derive(Debug, Clone, Copy)]
pub struct HandshakeLimits {
    /// Upper bound on the whole exchange (initiator) or on reading the
    /// request (responder)
    pub timeout: Duration,
    /// Largest accepted payload
    pub max_payload_size: usize,
}

/// Run the initiator side against `peer` (`host:port`)
///
/// Returns the responder's merged view.
pub async fn initiate(
    peer: &str,
    request: &ClusterState,
    limits: HandshakeLimits,
) -> Result<ClusterState, HandshakeError> {
    let attempt = async {
        let mut stream = TcpStream::connect(peer)
            .await
            .map_err(HandshakeError::Connect)?;
        stream.set_nodelay(true).ok();
        debug!("Connected to peer {}, sending {} member(s)", peer, request.len());

        let response = exchange(&mut stream, request, limits.max_payload_size).await?;
        // One exchange per connection
        let _ = stream.shutdown().await;
        Ok::<_, HandshakeError>(response)
    };

    match tokio::time::timeout(limits.timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::Timeout(limits.timeout)),
    }
}

/// Initiator exchange over an already established stream
pub async fn exchange<S>(
    stream: &mut S,
    request: &ClusterState,
    max_payload_size: usize,
) -> Result<ClusterState, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_state(stream, request).await?;
    let response = read_state(stream, max_payload_size).await?;
    Ok(response)
}

/// Run the responder side on one inbound stream
///
/// `merge` receives the decoded request and returns the state to send
/// back. It is not called when the request cannot be read or decoded.
pub async fn respond<S, F>(
    stream: &mut S,
    limits: HandshakeLimits,
    merge: F,
) -> Result<Arc<ClusterState>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnOnce(ClusterState) -> Arc<ClusterState>,
{
    let request = match tokio::time::timeout(
        limits.timeout,
        read_state(stream, limits.max_payload_size),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => return Err(HandshakeError::Timeout(limits.timeout)),
    };

    let merged = merge(request);
    write_state(stream, &merged).await?;
    let _ = stream.shutdown().await;

    Ok(merged)
}
