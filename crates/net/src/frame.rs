//! Length-prefixed frame encoding/decoding
//!
//! Wire format: [4-byte big-endian length][JSON payload]

use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::Message;

/// Maximum allowed frame size (1MB)
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

fn closed_on_eof(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        Error::Io(e)
    }
}

/// Read one frame and decode its JSON payload.
///
/// Not cancel-safe: a partially read frame is lost if the future is dropped.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await.map_err(closed_on_eof)?;

    if len == 0 {
        return Err(Error::Protocol("Empty frame".into()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "Frame too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(closed_on_eof)?;

    serde_json::from_slice(&payload).map_err(|e| Error::Protocol(format!("Invalid JSON: {}", e)))
}

/// Encode a value as JSON and write it as one frame
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value)
        .map_err(|e| Error::Protocol(format!("Serialization failed: {}", e)))?;

    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            Error::Protocol(format!(
                "Message too large: {} bytes (max {})",
                payload.len(),
                MAX_FRAME_SIZE
            ))
        })?;

    writer.write_u32(len).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;

    Ok(())
}

/// Drain an outbox onto the socket, then half-close it
pub(crate) async fn writer_task<W>(mut writer: W, mut outbox: mpsc::Receiver<Message>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = outbox.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frames_read_back_in_order() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Message::Ping).await.unwrap();
        write_frame(
            &mut buf,
            &Message::Unsubscribe {
                channel: "room:lobby".into(),
            },
        )
        .await
        .unwrap();

        let mut cursor = Cursor::new(buf);
        let first: Message = read_frame(&mut cursor).await.unwrap();
        let second: Message = read_frame(&mut cursor).await.unwrap();
        assert!(matches!(first, Message::Ping));
        assert!(matches!(second, Message::Unsubscribe { channel } if channel == "room:lobby"));

        let eof = read_frame::<_, Message>(&mut cursor).await;
        assert!(matches!(eof, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_empty_frame_rejected() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 0]);
        let result = read_frame::<_, Message>(&mut cursor).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let len = (MAX_FRAME_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(len.to_vec());
        let result = read_frame::<_, Message>(&mut cursor).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_closed() {
        let mut buf = 10u32.to_be_bytes().to_vec();
        buf.extend_from_slice(b"{\"ty");
        let mut cursor = Cursor::new(buf);
        let result = read_frame::<_, Message>(&mut cursor).await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }
}
