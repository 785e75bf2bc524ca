//! Length-prefixed MessagePack framing.
//!
//! Every frame is a 4-byte big-endian length followed by that many bytes of
//! body. Envelope bodies are MessagePack maps packed with string keys;
//! publication topic frames are raw UTF-8.

use crate::{Result, WireError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum accepted frame body, generous for full-state transfers.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Writes one raw frame.
pub async fn write_raw_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            size: body.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one raw frame.
pub async fn read_raw_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Packs `value` as a MessagePack map and writes it as one frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = rmp_serde::to_vec_named(value)?;
    write_raw_frame(writer, &body).await
}

/// Reads one frame and unpacks its MessagePack body.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let body = read_raw_frame(reader).await?;
    Ok(rmp_serde::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        service: String,
        value: u64,
    }

    #[tokio::test]
    async fn frame_roundtrip() {
        let mut buf = Vec::new();
        let sent = Probe {
            service: "login".to_string(),
            value: 7,
        };
        write_frame(&mut buf, &sent).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let received: Probe = read_frame(&mut cursor).await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let mut buf = Vec::new();
        tokio::io::AsyncWriteExt::write_u32(&mut buf, u32::MAX)
            .await
            .unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let result: Result<Vec<u8>> = read_raw_frame(&mut cursor).await;
        assert!(matches!(result, Err(WireError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let mut buf = Vec::new();
        tokio::io::AsyncWriteExt::write_u32(&mut buf, 100).await.unwrap();
        buf.extend_from_slice(b"short");
        let mut cursor = std::io::Cursor::new(buf);
        let result: Result<Vec<u8>> = read_raw_frame(&mut cursor).await;
        assert!(result.is_err());
    }
}
