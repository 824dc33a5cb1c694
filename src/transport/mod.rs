//! Transport layer for host ↔ plugin communication.
//!
//! Provides the `Transport` trait and length-prefixed JSON framing functions.
//! `Connection` multiplexes calls over any async byte stream;
//! `StdioPipeTransport` runs it over the stdin/stdout of a plugin process.

pub mod connection;
pub mod protocol;
pub mod stdio_pipe;

pub use connection::Connection;
pub use protocol::{ExecuteReply, ExecuteRequest, ExecuteResponse, HostMessage, PluginMessage};
pub use stdio_pipe::StdioPipeTransport;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::PluginError;

/// Maximum message size (64 MB). Safety valve against malformed messages.
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024 * 1024;

/// Abstraction over the channel that carries `Execute` calls to a plugin.
///
/// Implementations must allow concurrent callers; each call is independent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an `Execute` request and wait for the plugin's reply.
    async fn execute(&self, req: ExecuteRequest) -> Result<ExecuteReply, PluginError>;

    /// Round-trip a health check.
    async fn ping(&self) -> Result<(), PluginError>;

    /// Gracefully shut down the transport and whatever sits behind it.
    async fn shutdown(&self) -> Result<(), PluginError>;

    /// Whether the plugin side is still reachable.
    fn is_alive(&self) -> bool;
}

/// Write a length-prefixed message to a writer.
///
/// Format: [4-byte big-endian length][payload bytes]
pub async fn send_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), PluginError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_MESSAGE_SIZE)
        .ok_or(PluginError::FrameTooLarge {
            size: payload.len(),
            max: MAX_MESSAGE_SIZE,
        })?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-prefixed message from a reader.
///
/// Returns the raw payload bytes, or `None` if the stream ended cleanly
/// between frames. A stream ending inside a frame is an I/O error.
/// Enforces `MAX_MESSAGE_SIZE`.
pub async fn recv_message<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, PluginError> {
    let mut len_buf = [0u8; 4];
    // Only an EOF before the first header byte is a clean close.
    if reader.read(&mut len_buf[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[1..]).await?;
    let len = u32::from_be_bytes(len_buf);

    if len > MAX_MESSAGE_SIZE {
        return Err(PluginError::FrameTooLarge {
            size: len as usize,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Serialize a message and write it as one frame.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), PluginError>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize + Sync,
{
    let bytes = serde_json::to_vec(msg)?;
    send_message(writer, &bytes).await
}

/// Serialize a message into a frame payload, enforcing `MAX_MESSAGE_SIZE`.
///
/// Lets a caller reject a message on its own path before it is queued.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, PluginError> {
    let bytes = serde_json::to_vec(msg)?;
    u32::try_from(bytes.len())
        .ok()
        .filter(|len| *len <= MAX_MESSAGE_SIZE)
        .ok_or(PluginError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        })?;
    Ok(bytes)
}

/// Drain a queue of encoded payloads into a writer, one frame each.
///
/// A payload that cannot be framed is dropped; the loop stops at the first
/// I/O failure or once every sender is gone.
pub(crate) async fn write_loop<W>(mut writer: W, mut rx: tokio::sync::mpsc::Receiver<Vec<u8>>)
where
    W: AsyncWriteExt + Unpin,
{
    while let Some(payload) = rx.recv().await {
        tracing::trace!(len = payload.len(), "Writing frame");
        match send_message(&mut writer, &payload).await {
            Ok(()) => {}
            Err(e @ PluginError::FrameTooLarge { .. }) => {
                tracing::warn!(error = %e, "Dropping unframeable message");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to write frame");
                break;
            }
        }
    }
}

/// Read one frame and deserialize it. `None` on clean end of stream.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, PluginError>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    match recv_message(reader).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_framing() {
        let payload = b"hello world";
        let mut buf = Vec::new();

        send_message(&mut buf, payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let received = recv_message(&mut cursor).await.unwrap();
        assert_eq!(received.as_deref(), Some(&payload[..]));
    }

    #[tokio::test]
    async fn empty_payload() {
        let mut buf = Vec::new();
        send_message(&mut buf, b"").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let received = recv_message(&mut cursor).await.unwrap().unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(recv_message(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_length_header_is_an_error() {
        let mut cursor = std::io::Cursor::new(vec![0u8, 0]);
        let err = recv_message(&mut cursor).await.unwrap_err();
        assert!(matches!(err, PluginError::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn encode_frame_rejects_oversized_message() {
        let msg = HostMessage::Execute {
            id: 1,
            raw: "y".repeat(MAX_MESSAGE_SIZE as usize),
        };
        let err = encode_frame(&msg).unwrap_err();
        assert!(matches!(err, PluginError::FrameTooLarge { .. }));

        let small = encode_frame(&HostMessage::Ping { id: 2 }).unwrap();
        assert_eq!(small, serde_json::to_vec(&HostMessage::Ping { id: 2 }).unwrap());
    }

    #[tokio::test]
    async fn write_loop_survives_unframeable_payload() {
        let (mut reader, writer) = tokio::io::duplex(4096);
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let writing = tokio::spawn(write_loop(writer, rx));

        // A payload over the limit is skipped, not fatal.
        tx.send(vec![b'y'; MAX_MESSAGE_SIZE as usize + 1]).await.unwrap();
        tx.send(b"after".to_vec()).await.unwrap();
        drop(tx);
        writing.await.unwrap();

        let received = recv_message(&mut reader).await.unwrap();
        assert_eq!(received.as_deref(), Some(&b"after"[..]));
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let mut data = 10u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"abc");
        let mut cursor = std::io::Cursor::new(data);
        assert!(matches!(
            recv_message(&mut cursor).await,
            Err(PluginError::Io(_))
        ));
    }

    #[tokio::test]
    async fn oversized_length_rejected() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&(MAX_MESSAGE_SIZE + 1).to_be_bytes())
            .build();
        let err = recv_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, PluginError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn read_frame_from_mock_stream() {
        let json = br#"{"type":"ready","protocol_version":1}"#;
        let mut frame = u32::try_from(json.len()).unwrap().to_be_bytes().to_vec();
        frame.extend_from_slice(json);

        let mut reader = tokio_test::io::Builder::new().read(&frame).build();
        let msg: PluginMessage = read_frame(&mut reader).await.unwrap().unwrap();
        assert!(matches!(msg, PluginMessage::Ready { protocol_version: 1 }));
    }

    #[tokio::test]
    async fn protocol_serialize_request() {
        let req = HostMessage::Execute {
            id: 1,
            raw: "deploy:v1".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"execute\""));
        assert!(json.contains("\"raw\":\"deploy:v1\""));
    }

    #[tokio::test]
    async fn protocol_result_keeps_body_alongside_error() {
        let reply = ExecuteReply {
            response: ExecuteResponse {
                outcome: "partial".to_string(),
                success: false,
            },
            error: Some("invalid payload".to_string()),
        };
        let json = serde_json::to_string(&PluginMessage::result(7, reply)).unwrap();
        assert!(json.contains("\"type\":\"result\""));
        assert!(json.contains("\"outcome\":\"partial\""));
        assert!(json.contains("\"error\":\"invalid payload\""));
    }

    #[tokio::test]
    async fn protocol_deserialize_result_without_error() {
        let json = r#"{"type":"result","id":3,"outcome":"ok","success":true}"#;
        let resp: PluginMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(
            resp,
            PluginMessage::Result { id: 3, success: true, error: None, .. }
        ));
    }
}
