//! # Transport
//!
//! One listening socket per process, one message per connection.
//!
//! ## Philosophy
//!
//! - **One-shot**: a sender connects, writes one encoded message, shuts down its
//!   write side. The receiver reads to EOF and decodes exactly one message.
//! - **Bounded**: accepted connections are handed to a semaphore-bounded set of
//!   worker tasks; the accept loop never decodes or dispatches itself.
//! - **Isolated faults**: a bad connection is logged and dropped. A connection
//!   that stays silent past the read timeout is dropped too, so idle sockets
//!   cannot hold every worker. Only an accept failure ends the loop, and it is
//!   not retried here.

use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::config::Settings;
use crate::message::Message;

/// Errors at the socket layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },
    #[error("failed to connect to port {port}: {reason}")]
    Connect { port: u16, reason: String },
    #[error("connecting to port {port} timed out after {timeout:?}")]
    ConnectTimeout { port: u16, timeout: Duration },
    #[error("I/O error: {0}")]
    Io(String),
    #[error("no complete message within {timeout:?}")]
    ReadTimeout { timeout: Duration },
    #[error("inbound message exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("accept loop failed: {0}")]
    Accept(String),
    #[error("peer has no known port")]
    NoPort,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// The receive side of a node: gets every decoded inbound message.
#[async_trait::async_trait]
pub trait Inbound: Send + Sync + 'static {
    async fn receive(&self, message: Message);
}

/// Moves one encoded message to a local port.
///
/// This trait is object-safe (`Arc<dyn Connector>`), so tests can swap in
/// connectors that fail or record instead of touching the network.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn deliver(&self, port: u16, bytes: &[u8]) -> Result<()>;
}

/// Loopback TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: IpAddr,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: IpAddr, connect_timeout: Duration) -> Self {
        Self { host, connect_timeout }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.bind_host, settings.connect_timeout())
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn deliver(&self, port: u16, bytes: &[u8]) -> Result<()> {
        if port == 0 {
            return Err(TransportError::NoPort);
        }

        let connect = TcpStream::connect((self.host, port));
        let mut stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| TransportError::ConnectTimeout { port, timeout: self.connect_timeout })?
            .map_err(|e| TransportError::Connect { port, reason: e.to_string() })?;

        stream.write_all(bytes).await.map_err(|e| TransportError::Io(e.to_string()))?;
        // EOF marks the end of the message
        stream.shutdown().await.map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Bounds on the accept loop's worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeLimits {
    /// Connections read and handled at once.
    pub workers: usize,
    /// Largest inbound message accepted.
    pub max_bytes: usize,
    /// Deadline for reading one message.
    pub read_timeout: Duration,
}

impl ServeLimits {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            workers: settings.worker_threads,
            max_bytes: settings.max_message_bytes,
            read_timeout: settings.read_timeout(),
        }
    }
}

/// A bound, not yet serving, listening socket.
#[derive(Debug)]
pub struct Endpoint {
    listener: TcpListener,
    port: u16,
}

impl Endpoint {
    /// Binds `host:port`; port 0 asks the OS for an ephemeral port.
    pub async fn bind(host: IpAddr, port: u16) -> Result<Self> {
        let addr = SocketAddr::new(host, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind { addr, reason: e.to_string() })?;
        let port = listener
            .local_addr()
            .map_err(|e| TransportError::Bind { addr, reason: e.to_string() })?
            .port();
        Ok(Self { listener, port })
    }

    /// The actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Starts the accept loop on its own task.
    ///
    /// At most `limits.workers` connections are read and handled at once;
    /// further connections wait in the accept loop until a worker frees up.
    pub fn serve(self, handler: Arc<dyn Inbound>, limits: ServeLimits) -> ServerHandle {
        let port = self.port;
        let pool = Arc::new(Semaphore::new(limits.workers.max(1)));
        let task = tokio::spawn(accept_loop(self.listener, handler, pool, limits));
        ServerHandle { port, task }
    }
}

/// Owns the accept loop. Dropping the handle stops accepting.
#[derive(Debug)]
pub struct ServerHandle {
    port: u16,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// True once the accept loop has exited, either by failure or abort.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops accepting new connections. Workers already running finish.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Waits for the accept loop to exit and returns its failure, if any.
    pub async fn wait(mut self) -> Result<()> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(TransportError::Accept(e.to_string())),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn Inbound>,
    pool: Arc<Semaphore>,
    limits: ServeLimits,
) -> Result<()> {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "accept failed, peer is no longer reachable");
                return Err(TransportError::Accept(e.to_string()));
            }
        };

        let permit = pool
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| TransportError::Accept(e.to_string()))?;
        let handler = handler.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let read = tokio::time::timeout(limits.read_timeout, read_message(stream, limits.max_bytes));
            let result = read
                .await
                .unwrap_or_else(|_| Err(TransportError::ReadTimeout { timeout: limits.read_timeout }.into()));
            match result {
                Ok(message) => {
                    debug!(
                        source = message.source_id(),
                        kind = message.type_id(),
                        correlation_id = message.correlation_id(),
                        "received message"
                    );
                    handler.receive(message).await;
                }
                Err(e) => warn!(%remote, error = %e, "dropping inbound connection"),
            }
        });
    }
}

#[derive(Debug, thiserror::Error)]
enum InboundFault {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("decode fault: {0}")]
    Decode(#[from] plugpack::Error),
}

async fn read_message(stream: TcpStream, max_bytes: usize) -> std::result::Result<Message, InboundFault> {
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let mut buf = Vec::new();
    stream
        .take(limit)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    if buf.len() > max_bytes {
        return Err(TransportError::TooLarge { limit: max_bytes }.into());
    }
    Ok(Message::decode_from_slice(&buf)?)
}
