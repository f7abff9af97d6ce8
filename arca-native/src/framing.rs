//! Native Messaging frame codec.
//!
//! Chrome frames every message as a little-endian unsigned 32-bit byte
//! length followed by that many bytes of UTF-8 JSON. Chrome caps messages
//! to the host at 1 MiB (and host-to-browser at 64 MiB); this codec
//! enforces the 1 MiB bound in both directions.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame payload.
pub const MAX_FRAME: usize = 1024 * 1024;

/// Reads one frame. Returns `None` on clean end-of-stream.
///
/// # Errors
///
/// I/O errors, truncated frames, and oversized lengths.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the {MAX_FRAME} byte limit"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Writes one frame and flushes.
///
/// # Errors
///
/// I/O errors and oversized payloads.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds the {MAX_FRAME} byte limit", payload.len()),
        ));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, br#"{"jsonrpc":"2.0"}"#).await.unwrap();

        let mut reader = buffer.as_slice();
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame, br#"{"jsonrpc":"2.0"}"#);
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_length_prefix_is_little_endian() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"ab").await.unwrap();
        assert_eq!(&buffer[..4], &[2, 0, 0, 0]);
        assert_eq!(&buffer[4..], b"ab");
    }

    #[tokio::test]
    async fn test_multiple_frames_in_sequence() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"first").await.unwrap();
        write_frame(&mut buffer, b"second").await.unwrap();

        let mut reader = buffer.as_slice();
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), b"first");
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), b"second");
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut buffer = Vec::new();
        let oversized = (u32::try_from(MAX_FRAME).unwrap() + 1).to_le_bytes();
        buffer.extend_from_slice(&oversized);
        let mut reader = buffer.as_slice();
        let err = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_truncated_frame_errors() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&10u32.to_le_bytes());
        buffer.extend_from_slice(b"abc");
        let mut reader = buffer.as_slice();
        assert!(read_frame(&mut reader).await.is_err());
    }
}
