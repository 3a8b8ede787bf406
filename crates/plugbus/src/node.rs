//! # Node
//!
//! The per-process context object. A `Node` owns the peer directory, the
//! dispatcher, the send pipeline and the listening socket; every other component
//! receives it explicitly. There is no process-wide state.
//!
//! `Node` is a cheap handle (`Arc` inside). Listeners and the accept loop hold a
//! `NodeRef` instead, so the node is torn down as soon as the last handle drops.

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::Settings;
use crate::correlator::Correlator;
use crate::correlator::Outbound;
use crate::directory::Directory;
use crate::directory::DirectoryStore;
use crate::directory::EphemeralStore;
use crate::directory::FileStore;
use crate::dispatch::Dispatcher;
use crate::dispatch::MessageListener;
use crate::error::BusError;
use crate::error::Result;
use crate::message::Message;
use crate::message::MessageType;
use crate::pipeline::Activator;
use crate::pipeline::NoopActivator;
use crate::pipeline::Outbox;
use crate::transport::Connector;
use crate::transport::Endpoint;
use crate::transport::Inbound;
use crate::transport::ServeLimits;
use crate::transport::ServerHandle;
use crate::transport::TcpConnector;

/// Fluent builder for a `Node`.
///
/// ```rust,no_run
/// # async fn demo() -> plugbus::Result<()> {
/// use plugbus::NodeBuilder;
/// use plugbus::Settings;
///
/// let node = NodeBuilder::new("scanner")
///     .settings(Settings::default())
///     .start()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct NodeBuilder {
    peer_id: String,
    settings: Settings,
    activator: Option<Arc<dyn Activator>>,
    connector: Option<Arc<dyn Connector>>,
    store: Option<Arc<dyn DirectoryStore>>,
}

impl NodeBuilder {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            settings: Settings::default(),
            activator: None,
            connector: None,
            store: None,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the collaborator that starts dormant peers. Default: `NoopActivator`.
    pub fn activator(mut self, activator: Arc<dyn Activator>) -> Self {
        self.activator = Some(activator);
        self
    }

    /// Replaces the loopback TCP connector.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets where the peer directory persists. Default: a `FileStore` under the
    /// settings' state directory.
    pub fn store(mut self, store: Arc<dyn DirectoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Keeps the peer directory in memory only.
    pub fn ephemeral(self) -> Self {
        self.store(Arc::new(EphemeralStore))
    }

    /// Binds the socket, restores the directory and starts accepting.
    ///
    /// The hub binds `settings.hub_port`; every other peer binds an ephemeral
    /// port and learns the hub's port from the settings.
    pub async fn start(self) -> Result<Node> {
        let settings = self.settings;
        let peer_id = self.peer_id;
        let is_hub = peer_id == settings.hub_id;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FileStore::for_peer(&settings.state_dir(), &peer_id)));
        let directory = Arc::new(Directory::open(store));
        if !is_hub && settings.hub_port != 0 {
            directory.set_port(&settings.hub_id, settings.hub_port);
        }

        let bind_port = if is_hub { settings.hub_port } else { 0 };
        let endpoint = Endpoint::bind(settings.bind_host, bind_port).await?;
        let port = endpoint.port();

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::from_settings(&settings)));
        let activator = self.activator.unwrap_or_else(|| Arc::new(NoopActivator));

        let dispatcher = Arc::new(Dispatcher::new());
        let correlator = Correlator::new(dispatcher.clone());
        let outbox = Arc::new(Outbox::new(&settings, directory.clone(), connector, activator));

        let inner = Arc::new(NodeInner {
            id: peer_id,
            is_hub,
            port,
            settings,
            directory,
            dispatcher,
            correlator,
            outbox,
            server: Mutex::new(None),
        });

        let handler = Arc::new(NodeRef { inner: Arc::downgrade(&inner) });
        let server = endpoint.serve(handler, ServeLimits::from_settings(&inner.settings));
        *inner.server.lock() = Some(server);

        info!(peer = %inner.id, port, hub = is_hub, "node started");
        Ok(Node { inner })
    }
}

struct NodeInner {
    id: String,
    is_hub: bool,
    port: u16,
    settings: Settings,
    directory: Arc<Directory>,
    dispatcher: Arc<Dispatcher>,
    correlator: Correlator,
    outbox: Arc<Outbox>,
    server: Mutex<Option<ServerHandle>>,
}

/// Handle to a running bus participant.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("port", &self.inner.port)
            .field("is_hub", &self.inner.is_hub)
            .finish()
    }
}

impl Node {
    pub fn builder(peer_id: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(peer_id)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The port this node's socket is bound to.
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn is_hub(&self) -> bool {
        self.inner.is_hub
    }

    pub fn hub_id(&self) -> &str {
        &self.inner.settings.hub_id
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.inner.directory
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /// Sends `message` to its target.
    ///
    /// A message addressed to this node goes straight into the local receive
    /// path without touching the network.
    pub async fn send(&self, message: Message) -> Result<()> {
        let target = message.target_id().ok_or(BusError::NoTarget)?;
        if target == self.inner.id {
            self.receive(message).await;
            return Ok(());
        }
        self.inner.outbox.deliver(&message).await
    }

    /// Sends `message` and waits for the reply with the same correlation id.
    pub async fn request(&self, message: Message, accepted: &[MessageType], timeout: Duration) -> Result<Message> {
        self.inner.correlator.request(self, message, accepted, timeout).await
    }

    /// Probes `peer` with a ping and returns the round-trip time.
    ///
    /// # Errors
    ///
    /// `BusError::UnexpectedReply` if the pong does not echo the probe payload.
    pub async fn ping(&self, peer: &str) -> Result<Duration> {
        let token = uuid::Uuid::new_v4().to_string();
        let probe = Message::new(self.id(), peer, MessageType::Ping).with_payload(token.as_bytes());
        let started = Instant::now();
        let pong = self
            .request(probe, &[MessageType::Pong], self.inner.settings.request_timeout())
            .await?;
        if pong.payload() != Some(token.as_bytes()) {
            return Err(BusError::UnexpectedReply("pong payload does not echo the probe".into()));
        }
        Ok(started.elapsed())
    }

    pub fn register_listener(&self, types: &[MessageType], listener: Arc<dyn MessageListener>) {
        self.inner.dispatcher.register(types, listener);
    }

    /// Removes `listener` from `types`, or from every type when `None`.
    pub fn deregister_listener(&self, listener: &Arc<dyn MessageListener>, types: Option<&[MessageType]>) {
        self.inner.dispatcher.deregister(listener, types);
    }

    /// True while the accept loop is running. Once it is false this process is
    /// unreachable, either after `shutdown` or because accepting failed.
    pub fn is_serving(&self) -> bool {
        self.inner.server.lock().as_ref().is_some_and(|server| !server.is_finished())
    }

    /// Stops accepting connections. In-flight handlers finish on their own.
    pub fn shutdown(&self) {
        if let Some(server) = self.inner.server.lock().take() {
            server.abort();
            info!(peer = %self.inner.id, "node shut down");
        }
    }

    pub fn downgrade(&self) -> NodeRef {
        NodeRef { inner: Arc::downgrade(&self.inner) }
    }

    /// The receive path: liveness auto-reply, then listener dispatch.
    async fn receive(&self, message: Message) {
        if message.message_type() == Some(MessageType::Ping) {
            self.answer_ping(&message);
        }
        self.inner.dispatcher.dispatch(&message);
    }

    /// Pong with the probe's payload, regardless of registered listeners.
    fn answer_ping(&self, ping: &Message) {
        let pong = Message::new(self.id(), ping.source_id(), MessageType::Pong)
            .with_correlation_id(ping.correlation_id());
        let pong = match ping.payload() {
            Some(payload) => pong.with_payload(payload),
            None => pong,
        };

        if ping.source_id() == self.inner.id {
            self.inner.dispatcher.dispatch(&pong);
            return;
        }

        let outbox = self.inner.outbox.clone();
        tokio::spawn(async move {
            if let Err(e) = outbox.deliver(&pong).await {
                warn!(peer = pong.target_id(), error = %e, "failed to answer ping");
            }
        });
    }
}

#[async_trait::async_trait]
impl Outbound for Node {
    async fn send(&self, message: Message) -> Result<()> {
        Node::send(self, message).await
    }
}

/// A weak handle for listeners and the accept loop.
#[derive(Clone)]
pub struct NodeRef {
    inner: Weak<NodeInner>,
}

impl NodeRef {
    pub fn upgrade(&self) -> Option<Node> {
        self.inner.upgrade().map(|inner| Node { inner })
    }

    /// Upgrades, or fails with `BusError::ShutDown`.
    pub fn node(&self) -> Result<Node> {
        self.upgrade().ok_or(BusError::ShutDown)
    }
}

#[async_trait::async_trait]
impl Inbound for NodeRef {
    async fn receive(&self, message: Message) {
        match self.upgrade() {
            Some(node) => node.receive(message).await,
            None => debug!(source = message.source_id(), "node gone, dropping inbound message"),
        }
    }
}
