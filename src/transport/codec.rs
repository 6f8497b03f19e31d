//! Length-prefix frame codec
//!
//! Wire format:
//! ```text
//! ┌──────────────┬──────────────────────┐
//! │ Length (4B)  │ Body (Length bytes)  │
//! │ BE u32       │                      │
//! └──────────────┴──────────────────────┘
//! ```
//!
//! The prefix is big-endian regardless of host byte order. There is no magic
//! number and no checksum.

use crate::error::FrameError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame header size (4-byte big-endian length).
pub const HEADER_LEN: usize = 4;

/// Default limit for request bodies written to the modem.
pub const MAX_COMMAND_BYTES: usize = 8 * 1024;

/// Reads and writes length-prefixed frames with bounded sizes.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_inbound: usize,
    max_outbound: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_COMMAND_BYTES, MAX_COMMAND_BYTES)
    }
}

impl FrameCodec {
    pub fn new(max_inbound: usize, max_outbound: usize) -> Self {
        Self {
            max_inbound,
            max_outbound,
        }
    }

    pub fn max_outbound(&self) -> usize {
        self.max_outbound
    }

    /// Read one complete frame body.
    ///
    /// Returns `Ok(None)` once the stream ends, including when it ends in the
    /// middle of a frame. An oversize frame is consumed from the stream and
    /// reported as [`FrameError::Oversize`], leaving the reader positioned at
    /// the next frame.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        let len = match reader.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(FrameError::Io(e)),
        };

        if len > self.max_inbound {
            let skipped =
                tokio::io::copy(&mut (&mut *reader).take(len as u64), &mut tokio::io::sink())
                    .await?;
            if skipped < len as u64 {
                return Ok(None);
            }
            return Err(FrameError::Oversize {
                len,
                max: self.max_inbound,
            });
        }

        let mut body = vec![0u8; len];
        match reader.read_exact(&mut body).await {
            Ok(_) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(FrameError::Io(e)),
        }
    }

    /// Write one frame. Oversize bodies are rejected before any byte is written.
    pub async fn write_frame<W>(&self, writer: &mut W, body: &[u8]) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if body.len() > self.max_outbound {
            return Err(FrameError::Oversize {
                len: body.len(),
                max: self.max_outbound,
            });
        }

        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(body);
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_write_then_read_frame() {
        let codec = FrameCodec::default();
        let (mut client, mut server) = tokio::io::duplex(1024);

        codec.write_frame(&mut client, b"hello modem").await.unwrap();
        let frame = codec.read_frame(&mut server).await.unwrap();
        assert_eq!(frame.as_deref(), Some(&b"hello modem"[..]));
    }

    #[tokio::test]
    async fn test_length_prefix_is_big_endian() {
        let codec = FrameCodec::default();
        let mut out = Vec::new();
        codec.write_frame(&mut out, &[9; 258]).await.unwrap();
        assert_eq!(&out[..4], &[0, 0, 1, 2]);
        assert_eq!(out.len(), 4 + 258);
    }

    #[tokio::test]
    async fn test_short_reads_are_reassembled() {
        let codec = FrameCodec::default();
        let (mut client, mut server) = tokio::io::duplex(1024);

        let writer = tokio::spawn(async move {
            let chunks: [&[u8]; 4] = [&[0, 0], &[0, 3], b"a", b"bc"];
            for chunk in chunks {
                client.write_all(chunk).await.unwrap();
                client.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
            client
        });

        let frame = codec.read_frame(&mut server).await.unwrap();
        assert_eq!(frame.as_deref(), Some(&b"abc"[..]));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_eof_at_boundary_and_mid_frame() {
        let codec = FrameCodec::default();

        let mut empty: &[u8] = &[];
        assert!(codec.read_frame(&mut empty).await.unwrap().is_none());

        // Header promises 10 bytes, stream carries 3
        let mut partial: &[u8] = &[0, 0, 0, 10, 1, 2, 3];
        assert!(codec.read_frame(&mut partial).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_rejects_oversize_without_writing() {
        let codec = FrameCodec::new(64, 16);
        let mut out = Vec::new();
        let err = codec.write_frame(&mut out, &[0; 17]).await.unwrap_err();
        assert!(matches!(err, FrameError::Oversize { len: 17, max: 16 }));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_oversize_inbound_frame_is_skipped() {
        let codec = FrameCodec::new(4, 64);
        let mut wire = Vec::new();
        wire.extend_from_slice(&8u32.to_be_bytes());
        wire.extend_from_slice(&[0xEE; 8]);
        wire.extend_from_slice(&2u32.to_be_bytes());
        wire.extend_from_slice(b"ok");
        let mut reader: &[u8] = &wire;

        let err = codec.read_frame(&mut reader).await.unwrap_err();
        assert!(err.is_recoverable());
        let next = codec.read_frame(&mut reader).await.unwrap();
        assert_eq!(next.as_deref(), Some(&b"ok"[..]));
    }

    proptest! {
        #[test]
        fn prop_frame_roundtrip(
            body in proptest::collection::vec(any::<u8>(), 0..=MAX_COMMAND_BYTES)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let decoded = runtime.block_on(async {
                let codec = FrameCodec::default();
                let mut wire = Vec::new();
                codec.write_frame(&mut wire, &body).await.unwrap();
                let mut reader: &[u8] = &wire;
                codec.read_frame(&mut reader).await.unwrap()
            });
            prop_assert_eq!(decoded, Some(body));
        }
    }
}
