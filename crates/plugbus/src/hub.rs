//! # Hub Services
//!
//! The hub brokers plugin registration and menu state. `HubService` answers the
//! lifecycle and menu messages on the hub node; `HubClient` is the plugin-side
//! counterpart, where every operation is one correlated round trip answered by
//! `ComapiSuccess` or `ComapiError`.

use std::sync::Arc;
use std::time::Duration;

use plugpack::Decoder;
use plugpack::Encoder;
use plugpack::Record;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::directory::MenuItem;
use crate::directory::PeerInfo;
use crate::dispatch::MessageListener;
use crate::error::BusError;
use crate::error::Result;
use crate::message::Message;
use crate::message::MessageType;
use crate::message::StructuredUrl;
use crate::node::Node;
use crate::node::NodeRef;
use crate::rpc::RemoteFault;

/// Message types the hub answers.
pub const HUB_REQUESTS: [MessageType; 9] = [
    MessageType::RegisterPlugin,
    MessageType::DeregisterPlugin,
    MessageType::ActivatePlugin,
    MessageType::DeactivatePlugin,
    MessageType::RegisterMenu,
    MessageType::EnableMenu,
    MessageType::DisableMenu,
    MessageType::DeregisterMenu,
    MessageType::ReturningControl,
];

const ACKS: [MessageType; 2] = [MessageType::ComapiSuccess, MessageType::ComapiError];

fn encode_port(port: u16) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.i32(i32::from(port));
    enc.into_bytes()
}

fn decode_port(bytes: &[u8]) -> plugpack::Result<u16> {
    let mut dec = Decoder::new(bytes);
    let raw = dec.i32()?;
    dec.finish()?;
    u16::try_from(raw).map_err(|_| plugpack::Error::Malformed(format!("port {} out of range", raw)))
}

// ============================================================================
//  Hub side
// ============================================================================

/// Registration and menu brokering, installed on the hub node.
pub struct HubService {
    node: Node,
    listener: Arc<dyn MessageListener>,
}

impl HubService {
    pub fn install(node: &Node) -> Self {
        let listener: Arc<dyn MessageListener> = Arc::new(HubListener { node: node.downgrade() });
        node.register_listener(&HUB_REQUESTS, listener.clone());
        info!(peer = node.id(), "hub services installed");
        Self { node: node.clone(), listener }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Forwards a press of menu `name` to the peer named in its action.
    ///
    /// Returns `Ok(false)` if the menu is unknown or disabled.
    pub async fn press_menu(&self, name: &str) -> Result<bool> {
        let Some(item) = self.node.directory().menu(name) else {
            return Ok(false);
        };
        if !item.enabled {
            debug!(menu = name, "press ignored, menu disabled");
            return Ok(false);
        }
        let press = Message::new(self.node.id(), item.action.peer(), MessageType::MenuPressed)
            .with_action(item.action.clone());
        self.node.send(press).await?;
        Ok(true)
    }

    /// Sends an event of type `kind` to every registered peer.
    ///
    /// Returns the number of peers it reached; failures are logged.
    pub async fn broadcast(&self, kind: MessageType, payload: Option<Vec<u8>>) -> usize {
        let mut reached = 0;
        for peer in self.node.directory().peers() {
            if peer.id == self.node.id() {
                continue;
            }
            let mut event = Message::new(self.node.id(), peer.id.as_str(), kind);
            event.set_payload(payload.clone());
            match self.node.send(event).await {
                Ok(()) => reached += 1,
                Err(e) => warn!(peer = %peer.id, %kind, error = %e, "broadcast failed"),
            }
        }
        reached
    }

    pub fn uninstall(self) {
        self.node.deregister_listener(&self.listener, Some(&HUB_REQUESTS));
    }
}

struct HubListener {
    node: NodeRef,
}

impl MessageListener for HubListener {
    fn on_message(&self, message: &Message) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        let Some(kind) = message.message_type() else {
            return;
        };

        let (reply, after_ack) = match handle(&node, kind, message) {
            Ok(after_ack) => (message.reply(MessageType::ComapiSuccess, None), after_ack),
            Err(fault) => {
                warn!(source = message.source_id(), %kind, fault = %fault, "hub request rejected");
                (message.reply(MessageType::ComapiError, fault.to_bytes().ok()), None)
            }
        };

        tokio::spawn(async move {
            if let Err(e) = node.send(reply).await {
                warn!(error = %e, "failed to acknowledge hub request");
            }
            match after_ack {
                Some(AfterAck::Forget(peer)) => {
                    node.directory().remove(&peer);
                    info!(%peer, "plugin deregistered");
                }
                Some(AfterAck::Deactivate(peer)) => {
                    node.directory().set_port(&peer, 0);
                    info!(%peer, "plugin deactivated");
                }
                None => {}
            }
        });
    }
}

/// Directory changes that would make the sender unreachable, applied only once
/// the acknowledgement is on its way.
enum AfterAck {
    Forget(String),
    Deactivate(String),
}

fn handle(node: &Node, kind: MessageType, message: &Message) -> std::result::Result<Option<AfterAck>, RemoteFault> {
    let source = message.source_id();
    let directory = node.directory();
    let payload = || message.payload().unwrap_or_default();
    let bad_payload = |e: plugpack::Error| RemoteFault::new("DecodeFault", e.to_string());
    let menu_name = || {
        message
            .action()
            .map(|a| a.path().to_string())
            .ok_or_else(|| RemoteFault::bad_request("menu request carries no action"))
    };
    let unknown_menu = |name: &str| RemoteFault::new("UnknownMenu", format!("no menu named '{}'", name));

    match kind {
        MessageType::RegisterPlugin => {
            let info = PeerInfo::from_bytes(payload()).map_err(bad_payload)?;
            if info.id != source {
                return Err(RemoteFault::bad_request(format!(
                    "'{}' cannot register on behalf of '{}'",
                    source, info.id
                )));
            }
            info!(peer = %info.id, port = info.port, "plugin registered");
            directory.upsert(info);
        }
        MessageType::DeregisterPlugin => return Ok(Some(AfterAck::Forget(source.to_string()))),
        MessageType::ActivatePlugin => {
            let port = decode_port(payload()).map_err(bad_payload)?;
            directory.set_port(source, port);
            info!(peer = source, port, "plugin activated");
        }
        MessageType::DeactivatePlugin => return Ok(Some(AfterAck::Deactivate(source.to_string()))),
        MessageType::RegisterMenu => {
            let item = MenuItem::from_bytes(payload()).map_err(bad_payload)?;
            debug!(menu = %item.name, owner = item.action.peer(), "menu registered");
            directory.register_menu(item);
        }
        MessageType::EnableMenu | MessageType::DisableMenu => {
            let name = menu_name()?;
            let enabled = kind == MessageType::EnableMenu;
            if !directory.set_menu_enabled(&name, enabled) {
                return Err(unknown_menu(&name));
            }
        }
        MessageType::DeregisterMenu => {
            let name = menu_name()?;
            if directory.remove_menu(&name).is_none() {
                return Err(unknown_menu(&name));
            }
        }
        MessageType::ReturningControl => {
            debug!(peer = source, "control returned to hub");
        }
        other => {
            return Err(RemoteFault::bad_request(format!("hub does not handle {}", other)));
        }
    }
    Ok(None)
}

// ============================================================================
//  Plugin side
// ============================================================================

/// Synchronous hub operations for a plugin node.
#[derive(Debug, Clone)]
pub struct HubClient {
    node: Node,
    timeout: Duration,
}

impl HubClient {
    /// A client using the settings' request timeout.
    pub fn new(node: Node) -> Self {
        let timeout = node.settings().request_timeout();
        Self { node, timeout }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Announces this plugin with its startup spec and current port.
    ///
    /// The plugin's own directory entry keeps its secret across runs.
    pub async fn register(&self, startup_spec: &str) -> Result<()> {
        let mut info = self.node.directory().resolve(self.node.id());
        info.port = self.node.port();
        info.startup_spec = startup_spec.to_string();
        self.node.directory().upsert(info.clone());
        self.call(MessageType::RegisterPlugin, None, Some(info.to_bytes()?)).await
    }

    pub async fn deregister(&self) -> Result<()> {
        self.call(MessageType::DeregisterPlugin, None, None).await
    }

    /// Tells the hub this plugin is listening on its current port.
    pub async fn activate(&self) -> Result<()> {
        self.call(MessageType::ActivatePlugin, None, Some(encode_port(self.node.port()))).await
    }

    pub async fn deactivate(&self) -> Result<()> {
        self.call(MessageType::DeactivatePlugin, None, None).await
    }

    /// Registers menu `name`; presses arrive here as `MenuPressed` with `path`.
    pub async fn register_menu(&self, name: &str, path: &str) -> Result<()> {
        let action = StructuredUrl::with_protocol(self.node.settings().protocol.as_str(), self.node.id(), path)?;
        let item = MenuItem::new(name, action);
        self.call(MessageType::RegisterMenu, None, Some(item.to_bytes()?)).await
    }

    pub async fn enable_menu(&self, name: &str) -> Result<()> {
        self.call(MessageType::EnableMenu, Some(name), None).await
    }

    pub async fn disable_menu(&self, name: &str) -> Result<()> {
        self.call(MessageType::DisableMenu, Some(name), None).await
    }

    pub async fn deregister_menu(&self, name: &str) -> Result<()> {
        self.call(MessageType::DeregisterMenu, Some(name), None).await
    }

    /// Hands control back to the hub; never brings the hub to the foreground.
    pub async fn return_control(&self) -> Result<()> {
        self.call(MessageType::ReturningControl, None, None).await
    }

    async fn call(&self, kind: MessageType, menu: Option<&str>, payload: Option<Vec<u8>>) -> Result<()> {
        let hub = self.node.hub_id();
        let mut request = Message::new(self.node.id(), hub, kind);
        if let Some(name) = menu {
            let action = StructuredUrl::with_protocol(self.node.settings().protocol.as_str(), hub, name)?;
            request = request.with_action(action);
        }
        request.set_payload(payload);

        let reply = self.node.request(request, &ACKS, self.timeout).await?;
        if reply.message_type() == Some(MessageType::ComapiError) {
            let fault = RemoteFault::from_bytes(reply.payload().unwrap_or_default())?;
            return Err(BusError::Rejected(fault));
        }
        Ok(())
    }
}
