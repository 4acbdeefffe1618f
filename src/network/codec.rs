//! Frame codec: zlib-compressed text behind an explicit length prefix.
//!
//! # Wire Format
//!
//! ```text
//! +----------------------------+------------------------------+
//! | Length (4 bytes, BE)       | zlib(UTF-8 message text)     |
//! +----------------------------+------------------------------+
//! ```
//!
//! TCP does not preserve message boundaries, so every frame carries the length
//! of its compressed body. A frame that fails to inflate, or inflates to
//! something that is not UTF-8, is a [`CodecError::CorruptFrame`]; the session
//! that read it cannot trust the stream any more and is closed.

use crate::error::ScopeResult;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Default upper bound for a compressed frame body and for its inflated text.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Corrupt frame: {0}")]
    CorruptFrame(String),

    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Compression failed: {0}")]
    Compression(String),
}

/// Compress `text` into a zlib stream.
pub fn compress(text: &str) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CodecError::Compression(e.to_string()))
}

/// Inflate a zlib stream back into text, refusing output above `max_len` bytes.
pub fn decompress(body: &[u8], max_len: usize) -> Result<String, CodecError> {
    let mut inflated = Vec::new();
    ZlibDecoder::new(body)
        .take(u64::try_from(max_len).unwrap_or(u64::MAX).saturating_add(1))
        .read_to_end(&mut inflated)
        .map_err(|e| CodecError::CorruptFrame(e.to_string()))?;

    if inflated.len() > max_len {
        return Err(CodecError::FrameTooLarge {
            len: inflated.len(),
            max: max_len,
        });
    }

    String::from_utf8(inflated).map_err(|e| CodecError::CorruptFrame(e.to_string()))
}

/// Encode one message into a complete frame (prefix + compressed body).
pub fn encode(text: &str) -> Result<Vec<u8>, CodecError> {
    let body = compress(text)?;
    let len = u32::try_from(body.len()).map_err(|_| CodecError::FrameTooLarge {
        len: body.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one complete frame produced by [`encode`].
///
/// No size limit applies here; [`read_frame`] enforces the per-session limit.
pub fn decode(frame: &[u8]) -> Result<String, CodecError> {
    if frame.len() < LENGTH_PREFIX_BYTES {
        return Err(CodecError::CorruptFrame(
            "Insufficient data for length prefix".to_string(),
        ));
    }

    let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let body = &frame[LENGTH_PREFIX_BYTES..];
    if body.len() != declared {
        return Err(CodecError::CorruptFrame(format!(
            "Length prefix says {} bytes, frame carries {}",
            declared,
            body.len()
        )));
    }

    decompress(body, usize::MAX)
}

/// Read the next frame from `reader`.
///
/// Returns `Ok(None)` when the peer closed the connection between frames.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> ScopeResult<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
    if reader.read(&mut prefix[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut prefix[1..]).await?;

    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_frame_bytes {
        return Err(CodecError::FrameTooLarge {
            len,
            max: max_frame_bytes,
        }
        .into());
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    Ok(Some(decompress(&body, max_frame_bytes)?))
}

/// Encode `text` and write it to `writer` as a single frame.
pub async fn write_frame<W>(writer: &mut W, text: &str) -> ScopeResult<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(text)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScopeError;

    #[test]
    fn test_frame_roundtrip() {
        let texts = [
            "",
            "change vertical scale:1:2.5",
            "[INFO][Trigger Mode]:single",
            "Kanäle: µs → ✓",
        ];
        for text in texts {
            let frame = encode(text).unwrap();
            assert_eq!(decode(&frame).unwrap(), text);
        }
    }

    #[test]
    fn test_large_payload_roundtrip() {
        let samples: Vec<String> = (0..20_000).map(|i| format!("{}", i as f64 * 0.001)).collect();
        let text = format!("[C-1]:{}", samples.join(","));
        let frame = encode(&text).unwrap();
        assert!(frame.len() < text.len());
        assert_eq!(decode(&frame).unwrap(), text);
    }

    #[test]
    fn test_corrupt_body_is_reported() {
        let mut frame = encode("[INFO]:Auto Setup Done").unwrap();
        let last = frame.len() - 1;
        frame[LENGTH_PREFIX_BYTES] ^= 0xFF;
        frame[last] ^= 0xFF;
        assert!(matches!(decode(&frame), Err(CodecError::CorruptFrame(_))));
    }

    #[test]
    fn test_length_mismatch_is_reported() {
        let mut frame = encode("exit").unwrap();
        frame.push(0);
        assert!(matches!(decode(&frame), Err(CodecError::CorruptFrame(_))));
        assert!(matches!(decode(&[0, 0]), Err(CodecError::CorruptFrame(_))));
    }

    #[test]
    fn test_non_utf8_payload_is_corrupt() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[0xC3, 0x28]).unwrap();
        let body = encoder.finish().unwrap();
        assert!(matches!(
            decompress(&body, DEFAULT_MAX_FRAME_BYTES),
            Err(CodecError::CorruptFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_reads_back_to_back_frames() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            write_frame(&mut client, "read once:1").await.unwrap();
            write_frame(&mut client, "read trigger").await.unwrap();
        });

        let first = read_frame(&mut server, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        let second = read_frame(&mut server, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        writer.await.unwrap();
        let eof = read_frame(&mut server, DEFAULT_MAX_FRAME_BYTES).await.unwrap();

        assert_eq!(first.as_deref(), Some("read once:1"));
        assert_eq!(second.as_deref(), Some("read trigger"));
        assert!(eof.is_none());
    }

    #[tokio::test]
    async fn test_oversized_prefix_is_rejected() {
        let frame = encode("[C-2]:1,2,3").unwrap();
        let mut reader = &frame[..];
        let err = read_frame(&mut reader, 4).await.unwrap_err();
        assert!(matches!(
            err,
            ScopeError::Codec(CodecError::FrameTooLarge { max: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_a_transport_error() {
        let mut truncated_prefix = &[0u8, 0][..];
        assert!(matches!(
            read_frame(&mut truncated_prefix, DEFAULT_MAX_FRAME_BYTES).await,
            Err(ScopeError::Io(_))
        ));

        let frame = encode("auto setup").unwrap();
        let mut truncated_body = &frame[..frame.len() - 1];
        assert!(matches!(
            read_frame(&mut truncated_body, DEFAULT_MAX_FRAME_BYTES).await,
            Err(ScopeError::Io(_))
        ));
    }

    #[test]
    fn test_decode_accepts_text_above_stream_limit() {
        let text = "a".repeat(DEFAULT_MAX_FRAME_BYTES + 1);
        let frame = encode(&text).unwrap();
        assert_eq!(decode(&frame).unwrap().len(), text.len());
    }

    #[test]
    fn test_unbounded_limit_does_not_overflow() {
        let body = compress("read trigger").unwrap();
        assert_eq!(decompress(&body, usize::MAX).unwrap(), "read trigger");
        assert!(matches!(
            decompress(&body, 4),
            Err(CodecError::FrameTooLarge { max: 4, .. })
        ));
    }
}
