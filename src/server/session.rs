//! # Connection Session
//!
//! One session owns one accepted connection for its entire lifetime and
//! drives it through a small state machine:
//!
//! ```text
//! Receiving ──(complete frame)──► Processing ──► Sending ──► Receiving
//!     │
//!     └──(EOF / idle timeout / error)──► Closed
//! ```
//!
//! Every read appends to the session's private [`FrameBuffer`]. All complete
//! frames found after a read are handled one at a time, in arrival order, and
//! each response is fully written before the next command is processed. A
//! client that pipelines several requests therefore gets its answers back in
//! the order it sent them.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::processor::CommandProcessor;
use crate::protocol::framing::{encode, FrameBuffer, READ_CHUNK_SIZE};

/// Where the session currently is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Receiving,
    Processing,
    Sending,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side (zero-length read).
    PeerDisconnected,
    /// No bytes arrived within the idle timeout.
    IdleTimeout(Duration),
    /// I/O failure or an undecodable command.
    Error(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerDisconnected => write!(f, "peer disconnected"),
            CloseReason::IdleTimeout(after) => write!(f, "idle for {:?}", after),
            CloseReason::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// Per-connection receive / process / send loop.
pub struct ConnectionSession<S> {
    stream: S,
    peer: SocketAddr,
    processor: Arc<dyn CommandProcessor>,
    idle_timeout: Duration,
    buffer: FrameBuffer,
    state: SessionState,
    handled: u64,
}

impl<S> ConnectionSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        processor: Arc<dyn CommandProcessor>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            stream,
            peer,
            processor,
            idle_timeout,
            buffer: FrameBuffer::new(),
            state: SessionState::Receiving,
            handled: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serve the connection until it closes; returns the reason.
    pub async fn run(mut self) -> CloseReason {
        info!("Managing connection from {}", self.peer);

        let reason = self.serve().await;
        let last_state = self.state();
        self.state = SessionState::Closed;
        // Best effort: the peer may already be gone.
        let _ = self.stream.shutdown().await;

        match &reason {
            CloseReason::Error(e) => warn!(
                "Connection from {} failed while {:?}: {}",
                self.peer, last_state, e
            ),
            other => info!(
                "Connection from {} has closed ({}), {} commands handled",
                self.peer, other, self.handled
            ),
        }
        reason
    }

    async fn serve(&mut self) -> CloseReason {
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            self.state = SessionState::Receiving;
            let n = match timeout(self.idle_timeout, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) => return CloseReason::PeerDisconnected,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return CloseReason::Error(e.to_string()),
                Err(_) => return CloseReason::IdleTimeout(self.idle_timeout),
            };
            self.buffer.extend(&chunk[..n]);

            while let Some(frame) = self.buffer.next_frame() {
                if let Err(reason) = self.handle_frame(frame).await {
                    return reason;
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: Vec<u8>) -> Result<(), CloseReason> {
        self.state = SessionState::Processing;
        let command = String::from_utf8(frame)
            .map_err(|e| CloseReason::Error(format!("command is not valid UTF-8: {}", e)))?;

        let response = self.processor.process(&command).await;
        debug!(
            "Command {} from {} -> {}",
            self.handled + 1,
            self.peer,
            response.status
        );

        self.state = SessionState::Sending;
        let framed = encode(&response.to_bytes());
        match timeout(self.idle_timeout, self.stream.write_all(&framed)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(CloseReason::Error(e.to_string())),
            Err(_) => return Err(CloseReason::IdleTimeout(self.idle_timeout)),
        }

        self.handled += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_frame, Response};
    use async_trait::async_trait;
    use tokio::io::duplex;

    /// Echoes the command back as the `data` field.
    struct EchoProcessor;

    #[async_trait]
    impl CommandProcessor for EchoProcessor {
        async fn process(&self, command: &str) -> Response {
            Response::ok_with_data(serde_json::Value::String(command.to_string()))
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_pipelined_commands_answered_in_order() {
        let (mut client, server) = duplex(4096);
        let session = ConnectionSession::new(
            server,
            peer(),
            Arc::new(EchoProcessor),
            Duration::from_secs(5),
        );
        let handle = tokio::spawn(session.run());

        let mut batch = encode(b"first");
        batch.extend(encode(b"second"));
        batch.extend(encode(b"third"));
        client.write_all(&batch).await.unwrap();

        let mut frames = FrameBuffer::new();
        for expected in ["first", "second", "third"] {
            let raw = read_frame(&mut client, &mut frames, Duration::from_secs(5))
                .await
                .unwrap();
            let response = Response::from_bytes(&raw).unwrap();
            assert_eq!(response.error_message(), expected);
        }

        drop(client);
        assert_eq!(handle.await.unwrap(), CloseReason::PeerDisconnected);
    }

    #[tokio::test]
    async fn test_partial_frame_waits_for_rest() {
        let (mut client, server) = duplex(4096);
        let session = ConnectionSession::new(
            server,
            peer(),
            Arc::new(EchoProcessor),
            Duration::from_secs(5),
        );
        let handle = tokio::spawn(session.run());

        client.write_all(b"LI").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.write_all(b"ST\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.write_all(b"\r\n").await.unwrap();

        let mut frames = FrameBuffer::new();
        let raw = read_frame(&mut client, &mut frames, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(Response::from_bytes(&raw).unwrap().error_message(), "LIST");

        drop(client);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_session() {
        let (_client, server) = duplex(64);
        let session = ConnectionSession::new(
            server,
            peer(),
            Arc::new(EchoProcessor),
            Duration::from_millis(100),
        );

        let reason = session.run().await;
        assert_eq!(reason, CloseReason::IdleTimeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_invalid_utf8_closes_session() {
        let (mut client, server) = duplex(64);
        let session = ConnectionSession::new(
            server,
            peer(),
            Arc::new(EchoProcessor),
            Duration::from_secs(5),
        );
        assert_eq!(session.state(), SessionState::Receiving);
        let handle = tokio::spawn(session.run());

        client.write_all(&encode(&[0xff, 0xfe, 0x00])).await.unwrap();
        let reason = handle.await.unwrap();
        assert!(matches!(reason, CloseReason::Error(_)));
    }
}
