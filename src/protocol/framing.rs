//! # Sentinel Framing Codec
//!
//! Every message on the wire, in both directions, is an opaque byte payload
//! followed by the four-byte sentinel `\r\n\r\n`. There is no length prefix:
//! a message is complete exactly when the sentinel has been observed in the
//! bytes accumulated so far.
//!
//! ```text
//! +---------------------------+-------------+
//! | payload (any length)      | \r\n\r\n    |
//! +---------------------------+-------------+
//! ```
//!
//! ## Components
//!
//! - [`encode`] / [`decode_stream`]: stateless helpers for whole buffers
//! - [`FrameBuffer`]: the per-connection accumulator used by both the server
//!   session and the benchmark worker
//! - [`write_frame`] / [`read_frame`]: async helpers over Tokio streams
//!
//! ## Constraint
//!
//! A payload must not contain the sentinel itself. The codec does not check
//! this; base64 content and plain filenames never contain CR or LF, so the
//! protocol relies on it instead of escaping.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::TransferError;

/// Terminator appended to every framed message.
pub const SENTINEL: &[u8; 4] = b"\r\n\r\n";

/// Size of each socket write when streaming a large payload.
pub const WRITE_CHUNK_SIZE: usize = 64 * 1024;

/// Size of the scratch buffer used for each socket read.
pub const READ_CHUNK_SIZE: usize = 1024 * 1024;

/// Frame a payload by appending the sentinel.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + SENTINEL.len());
    framed.extend_from_slice(payload);
    framed.extend_from_slice(SENTINEL);
    framed
}

/// Split a buffer into every complete payload it contains.
///
/// Returns the payloads in arrival order together with the trailing bytes
/// that do not (yet) form a complete message.
pub fn decode_stream(buffer: &[u8]) -> (Vec<Vec<u8>>, Vec<u8>) {
    let mut frames = FrameBuffer::new();
    frames.extend(buffer);
    let payloads = frames.drain_frames();
    (payloads, frames.into_remaining())
}

/// Growable byte accumulator that yields complete frames.
///
/// Owned by exactly one connection. Bytes are appended as they arrive from
/// the socket; [`FrameBuffer::next_frame`] removes and returns the oldest
/// complete payload. Partial data is kept until the rest of it arrives.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    // Bytes already searched without finding a sentinel.
    scanned: usize,
}

impl FrameBuffer {
    /// Create an empty frame buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Remove and return the oldest complete payload, if any.
    ///
    /// The search resumes just before the end of the previous unsuccessful
    /// scan, so a sentinel split across two reads is still found and large
    /// payloads are not rescanned on every read.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let start = self.scanned.saturating_sub(SENTINEL.len() - 1);
        let found = self
            .buf
            .get(start..)
            .and_then(|tail| tail.windows(SENTINEL.len()).position(|w| w == SENTINEL));

        match found {
            Some(offset) => {
                let end = start + offset;
                let payload = self.buf[..end].to_vec();
                self.buf.drain(..end + SENTINEL.len());
                self.scanned = 0;
                Some(payload)
            }
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    /// Remove and return every complete payload, oldest first.
    pub fn drain_frames(&mut self) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();
        while let Some(payload) = self.next_frame() {
            payloads.push(payload);
        }
        payloads
    }

    /// Number of buffered bytes not yet returned as a frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the buffer, returning the unconsumed bytes.
    pub fn into_remaining(self) -> Vec<u8> {
        self.buf
    }
}

/// Write one framed message.
///
/// The payload goes out in [`WRITE_CHUNK_SIZE`] pieces and the sentinel is
/// always the last write, so the peer never sees a terminator before the
/// full payload. The whole message is bounded by `io_timeout`.
pub async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
    io_timeout: Duration,
) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    let write_fut = async {
        for chunk in payload.chunks(WRITE_CHUNK_SIZE) {
            writer.write_all(chunk).await?;
        }
        writer.write_all(SENTINEL).await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    };

    match timeout(io_timeout, write_fut).await {
        Ok(result) => result.map_err(TransferError::from),
        Err(_) => Err(TransferError::Timeout {
            after: io_timeout,
            during: "sending request",
        }),
    }
}

/// Read from `reader` until `frames` holds one complete payload.
///
/// Any frame already buffered is returned without touching the socket.
/// Each individual read is bounded by `io_timeout`. EOF before a sentinel is
/// reported as [`TransferError::IncompleteFrame`].
pub async fn read_frame<R>(
    reader: &mut R,
    frames: &mut FrameBuffer,
    io_timeout: Duration,
) -> Result<Vec<u8>, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        if let Some(payload) = frames.next_frame() {
            return Ok(payload);
        }

        let n = match timeout(io_timeout, reader.read(&mut chunk)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransferError::Timeout {
                    after: io_timeout,
                    during: "receiving response",
                })
            }
        };

        if n == 0 {
            return Err(TransferError::IncompleteFrame {
                received: frames.pending_len(),
            });
        }
        frames.extend(&chunk[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let payload = b"UPLOAD report.bin aGVsbG8gd29ybGQ=";
        let (frames, rest) = decode_stream(&encode(payload));

        assert_eq!(frames, vec![payload.to_vec()]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_empty_payload_is_a_frame() {
        let (frames, rest) = decode_stream(SENTINEL);
        assert_eq!(frames, vec![Vec::<u8>::new()]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_pipelined_messages_keep_order() {
        let mut stream = encode(b"LIST");
        stream.extend(encode(b"GET a.bin"));
        stream.extend(b"GET b.b");

        let (frames, rest) = decode_stream(&stream);
        assert_eq!(frames, vec![b"LIST".to_vec(), b"GET a.bin".to_vec()]);
        assert_eq!(rest, b"GET b.b".to_vec());
    }

    #[test]
    fn test_split_at_every_boundary() {
        let payload = b"UPLOAD x.bin QUJDREVGR0g=";
        let framed = encode(payload);

        for split in 0..=framed.len() {
            let mut frames = FrameBuffer::new();
            frames.extend(&framed[..split]);
            let first = frames.drain_frames();
            frames.extend(&framed[split..]);
            let second = frames.drain_frames();

            let all: Vec<Vec<u8>> = first.into_iter().chain(second).collect();
            assert_eq!(all, vec![payload.to_vec()], "split at {}", split);
            assert!(frames.is_empty());
        }
    }

    #[test]
    fn test_byte_at_a_time_reassembly() {
        let framed = encode(b"GET large.bin");
        let mut frames = FrameBuffer::new();
        let mut out = Vec::new();

        for byte in &framed {
            frames.extend(std::slice::from_ref(byte));
            out.extend(frames.drain_frames());
        }

        assert_eq!(out, vec![b"GET large.bin".to_vec()]);
    }

    #[test]
    fn test_partial_sentinel_is_retained() {
        let mut frames = FrameBuffer::new();
        frames.extend(b"LIST\r\n\r");
        assert!(frames.next_frame().is_none());
        assert_eq!(frames.pending_len(), 7);

        frames.extend(b"\n");
        assert_eq!(frames.next_frame(), Some(b"LIST".to_vec()));
        assert_eq!(frames.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_write_then_read_frame_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let payload = vec![b'A'; 3 * WRITE_CHUNK_SIZE + 17];

        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            write_frame(&mut client, &payload, Duration::from_secs(5))
                .await
                .unwrap();
        });

        let mut frames = FrameBuffer::new();
        let received = read_frame(&mut server, &mut frames, Duration::from_secs(5))
            .await
            .unwrap();

        writer.await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_read_frame_reports_eof_before_sentinel() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"{\"status\":").await.unwrap();
        drop(client);

        let mut frames = FrameBuffer::new();
        let err = read_frame(&mut server, &mut frames, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::IncompleteFrame { received: 10 }));
    }
}
