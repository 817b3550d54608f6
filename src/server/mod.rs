//! # File Server: Connection Acceptor
//!
//! The server is a single accept loop feeding a bounded pool of session
//! slots. Each slot serves exactly one connection for that connection's
//! whole lifetime, so at most `pool_size` clients are being served at any
//! instant.
//!
//! ## Backpressure
//!
//! When every slot is busy the accept loop stops and waits for one to free
//! up. The connection it already accepted waits with it; further clients
//! queue in the kernel listen backlog. Nobody is rejected.
//!
//! ## Shutdown
//!
//! [`FileServer::run_until`] stops accepting as soon as the shutdown future
//! resolves and drops the listening socket. Sessions already running are not
//! cancelled; the server waits up to `drain_timeout` for them to finish.

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

pub mod processor;
pub mod session;

pub use processor::{CommandProcessor, FileProtocol};
pub use session::{CloseReason, ConnectionSession, SessionState};

use crate::cli::ServerArgs;

/// Listener and pool settings for the file server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of connections served concurrently.
    pub pool_size: usize,
    /// Socket inactivity after which a session is closed.
    pub idle_timeout: Duration,
    pub backlog: i32,
    /// How long shutdown waits for in-flight sessions.
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::defaults::SERVER_HOST.to_string(),
            port: crate::defaults::PORT,
            pool_size: crate::defaults::SERVER_POOL_SIZE,
            idle_timeout: crate::defaults::SESSION_IDLE_TIMEOUT,
            backlog: crate::defaults::LISTEN_BACKLOG,
            drain_timeout: crate::defaults::SHUTDOWN_DRAIN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Build and validate the server configuration from CLI arguments.
    pub fn from_args(args: &ServerArgs) -> Result<Self> {
        if args.pool_size == 0 {
            anyhow::bail!("--pool-size must be at least 1");
        }
        Ok(Self {
            host: args.host.clone(),
            port: args.port,
            pool_size: args.pool_size,
            ..Self::default()
        })
    }
}

/// A bound, not yet running, file server.
pub struct FileServer {
    listener: TcpListener,
    config: ServerConfig,
    processor: Arc<dyn CommandProcessor>,
    slots: Arc<Semaphore>,
}

impl FileServer {
    /// Bind the listening socket.
    ///
    /// `SO_REUSEADDR` is set so the server can be restarted immediately
    /// between sweep groups.
    pub async fn bind(config: ServerConfig, processor: Arc<dyn CommandProcessor>) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let socket_addr: SocketAddr = addr
            .to_socket_addrs()
            .with_context(|| format!("Invalid listen address {}", addr))?
            .next()
            .with_context(|| format!("No socket address resolved for {}", addr))?;

        let socket = Socket::new(
            Domain::for_address(socket_addr),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket
            .bind(&socket_addr.into())
            .with_context(|| format!("Failed to bind {}", addr))?;
        socket.listen(config.backlog)?;
        socket.set_nonblocking(true)?;

        let listener = TcpListener::from_std(socket.into())?;
        let slots = Arc::new(Semaphore::new(config.pool_size));

        Ok(Self {
            listener,
            config,
            processor,
            slots,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of sessions currently holding a pool slot.
    pub fn active_sessions(&self) -> usize {
        self.config.pool_size - self.slots.available_permits()
    }

    /// Serve until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = self.local_addr()?;
        info!(
            "Server running on {}, worker pool size is {}",
            local_addr, self.config.pool_size
        );

        tokio::pin!(shutdown);
        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };
            debug!("Accepted connection from {}", peer);

            if self.active_sessions() == self.config.pool_size {
                info!(
                    "Worker pool saturated ({} sessions), connection from {} is queued",
                    self.config.pool_size, peer
                );
            }
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.slots.clone().acquire_owned() => {
                    permit.context("Worker pool semaphore closed")?
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
            }

            let session = ConnectionSession::new(
                stream,
                peer,
                Arc::clone(&self.processor),
                self.config.idle_timeout,
            );
            tokio::spawn(async move {
                // The slot is held for the whole connection.
                let _permit = permit;
                session.run().await;
            });
        }

        warn!("Server shutting down, no longer accepting connections");
        drop(self.listener);

        let in_flight = self.config.pool_size - self.slots.available_permits();
        if in_flight > 0 {
            info!("Waiting for {} in-flight sessions to finish", in_flight);
            let all_slots = u32::try_from(self.config.pool_size).unwrap_or(u32::MAX);
            if tokio::time::timeout(self.config.drain_timeout, self.slots.acquire_many(all_slots))
                .await
                .is_err()
            {
                warn!(
                    "Sessions still running after {:?}, leaving them behind",
                    self.config.drain_timeout
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode, read_frame, FrameBuffer, Response};
    use async_trait::async_trait;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    struct ListOnly;

    #[async_trait]
    impl CommandProcessor for ListOnly {
        async fn process(&self, _command: &str) -> Response {
            Response::ok_with_data(serde_json::json!([]))
        }
    }

    fn test_config(pool_size: usize) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            pool_size,
            idle_timeout: Duration::from_secs(30),
            backlog: 16,
            drain_timeout: Duration::from_secs(5),
        }
    }

    async fn list_on(stream: &mut TcpStream, wait: Duration) -> Option<Response> {
        stream.write_all(&encode(b"LIST")).await.unwrap();
        let mut frames = FrameBuffer::new();
        match read_frame(stream, &mut frames, wait).await {
            Ok(raw) => Some(Response::from_bytes(&raw).unwrap()),
            Err(_) => None,
        }
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrent_sessions() {
        let server = FileServer::bind(test_config(2), Arc::new(ListOnly))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();
        assert!(list_on(&mut first, Duration::from_secs(5)).await.is_some());
        assert!(list_on(&mut second, Duration::from_secs(5)).await.is_some());

        // Third client is accepted by the kernel but not served yet.
        let mut third = TcpStream::connect(addr).await.unwrap();
        third.write_all(&encode(b"LIST")).await.unwrap();
        let mut frames = FrameBuffer::new();
        assert!(
            read_frame(&mut third, &mut frames, Duration::from_millis(300))
                .await
                .is_err(),
            "third connection should be queued while the pool is full"
        );

        // Freeing a slot lets the queued connection through.
        drop(first);
        let raw = read_frame(&mut third, &mut frames, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(Response::from_bytes(&raw).unwrap().is_ok());

        drop(second);
        drop(third);
        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_listener() {
        let server = FileServer::bind(test_config(1), Arc::new(ListOnly))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        assert_eq!(server.active_sessions(), 0);

        server.run_until(async {}).await.unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[test]
    fn test_config_rejects_empty_pool() {
        let args = ServerArgs {
            port: 6666,
            pool_size: 0,
            host: "0.0.0.0".to_string(),
            storage_dir: "files".into(),
            debug: false,
        };
        assert!(ServerConfig::from_args(&args).is_err());
    }
}
