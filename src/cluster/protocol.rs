//! Handshake Wire Protocol
//!
//! A handshake payload is a cluster state encoded as a JSON object keyed by
//! node label. Each payload travels in a single frame with a 4-byte
//! big-endian length prefix.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::state::ClusterState;

/// Length prefix size in bytes
pub const FRAME_HEADER_LEN: usize = 4;

/// Default upper bound for a single payload
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Errors raised while encoding, decoding or moving frames
#[derive(Debug)]
pub enum ProtocolError {
    /// Socket error
    Io(std::io::Error),
    /// Payload could not be serialized
    Encode(serde_json::Error),
    /// Payload is not a valid cluster state
    Decode(serde_json::Error),
    /// Frame length exceeds the configured limit
    FrameTooLarge { len: usize, max: usize },
    /// Peer closed the connection before a full frame arrived
    Closed,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Encode(e) => write!(f, "encode error: {}", e),
            Self::Decode(e) => write!(f, "decode error: {}", e),
            Self::FrameTooLarge { len, max } => {
                write!(f, "frame of {} bytes exceeds limit of {} bytes", len, max)
            }
            Self::Closed => write!(f, "connection closed before a complete frame"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) | Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Closed
        } else {
            Self::Io(err)
        }
    }
}

/// Encode a cluster state as a JSON payload
pub fn encode_state(state: &ClusterState) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(state).map_err(ProtocolError::Encode)
}

/// Decode a JSON payload into a cluster state
pub fn decode_state(data: &[u8]) -> Result<ClusterState, ProtocolError> {
    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

/// Frame a cluster state with a length prefix
pub fn frame_message(state: &ClusterState) -> Result<Bytes, ProtocolError> {
    let payload = encode_state(state)?;
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u32(len);
    frame.put_slice(&payload);

    Ok(frame.freeze())
}

/// Write one framed cluster state and flush it
pub async fn write_state<W>(writer: &mut W, state: &ClusterState) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = frame_message(state)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly one framed cluster state
pub async fn read_state<R>(reader: &mut R, max_payload_size: usize) -> Result<ClusterState, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let len = u32::from_be_bytes(header) as usize;
    if len > max_payload_size {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: max_payload_size,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    decode_state(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::identity::{NodeAddress, NodeIdentity};

    fn sample_state() -> ClusterState {
        let a = NodeIdentity::new(NodeAddress::new("localhost", 7400)).current_definition();
        let b = NodeIdentity::new(NodeAddress::new("localhost", 7401)).current_definition();
        ClusterState::from_definitions(vec![a, b])
    }

    #[test]
    fn test_encode_decode_state() {
        let state = sample_state();
        let encoded = encode_state(&state).unwrap();
        let decoded = decode_state(&encoded).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_decode_foreign_payload() {
        let json = r#"{
            "5f0c6c52-3d3f-4a57-9d8e-5b1b1f1f6a01": {
                "timestamp": "2024-03-01T12:00:00.123Z",
                "type": "LIVE",
                "label": "5f0c6c52-3d3f-4a57-9d8e-5b1b1f1f6a01",
                "address": "localhost:7400"
            }
        }"#;

        let state = decode_state(json.as_bytes()).unwrap();
        assert_eq!(state.len(), 1);
        let def = state.iter().next().unwrap();
        assert_eq!(def.address.port(), 7400);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_state(b"not json"),
            Err(ProtocolError::Decode(_))
        ));
        assert!(matches!(
            decode_state(br#"{"x": {"type": "DEAD"}}"#),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_frame_message() {
        let state = sample_state();
        let frame = frame_message(&state).unwrap();

        let header: [u8; FRAME_HEADER_LEN] = frame[..FRAME_HEADER_LEN].try_into().unwrap();
        assert_eq!(u32::from_be_bytes(header) as usize, frame.len() - FRAME_HEADER_LEN);

        let decoded = decode_state(&frame[FRAME_HEADER_LEN..]).unwrap();
        assert_eq!(decoded, state);
    }

    #[tokio::test]
    async fn test_write_then_read_state() {
        let state = sample_state();
        let (mut client, mut server) = tokio::io::duplex(4096);

        write_state(&mut client, &state).await.unwrap();
        let received = read_state(&mut server, DEFAULT_MAX_PAYLOAD_SIZE)
            .await
            .unwrap();
        assert_eq!(received, state);
    }

    #[tokio::test]
    async fn test_read_state_rejects_oversized_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&1024u32.to_be_bytes()).await.unwrap();

        let result = read_state(&mut server, 16).await;
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooLarge { len: 1024, max: 16 })
        ));
    }

    #[tokio::test]
    async fn test_read_state_truncated() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"{}").await.unwrap();
        drop(client);

        let result = read_state(&mut server, DEFAULT_MAX_PAYLOAD_SIZE).await;
        assert!(matches!(result, Err(ProtocolError::Closed)));
    }
}
