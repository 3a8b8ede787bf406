//! # Send Pipeline
//!
//! Outbound delivery with bounded retry and on-demand peer activation.
//!
//! A delivery makes at most `delivery_attempts` attempts. Before an attempt the
//! target is activated if it has never advertised a port, or if the previous
//! attempt failed. Deliveries to the hub pause for `hub_backoff` between
//! attempts. There is no outbox or replay: exhausting the attempts surfaces
//! `BusError::Delivery` and the message is gone.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::warn;

use crate::config::Settings;
use crate::directory::Directory;
use crate::directory::PeerInfo;
use crate::error::BusError;
use crate::error::Result;
use crate::message::Message;
use crate::message::MessageType;
use crate::transport::Connector;

/// How an activation should present itself to the user.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ActivationMode {
    Foreground,
    /// Used for control hand-off, which proceeds silently.
    Background,
}

/// An activation attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to activate '{peer}': {reason}")]
pub struct ActivationError {
    pub peer: String,
    pub reason: String,
}

/// Starts a dormant peer. How a peer is launched is platform-specific and lives
/// outside the bus.
#[async_trait::async_trait]
pub trait Activator: Send + Sync + 'static {
    async fn activate(&self, peer: &PeerInfo, mode: ActivationMode) -> std::result::Result<(), ActivationError>;
}

/// Never starts anything; delivery relies on peers already running.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActivator;

#[async_trait::async_trait]
impl Activator for NoopActivator {
    async fn activate(&self, peer: &PeerInfo, mode: ActivationMode) -> std::result::Result<(), ActivationError> {
        debug!(peer = %peer.id, ?mode, "activation requested, nothing to do");
        Ok(())
    }
}

pub struct Outbox {
    hub_id: String,
    directory: Arc<Directory>,
    connector: Arc<dyn Connector>,
    activator: Arc<dyn Activator>,
    attempts: u32,
    hub_backoff: Duration,
}

impl Outbox {
    pub fn new(
        settings: &Settings,
        directory: Arc<Directory>,
        connector: Arc<dyn Connector>,
        activator: Arc<dyn Activator>,
    ) -> Self {
        Self {
            hub_id: settings.hub_id.clone(),
            directory,
            connector,
            activator,
            attempts: settings.delivery_attempts.max(1),
            hub_backoff: settings.hub_backoff(),
        }
    }

    /// Delivers `message` to its target over the network.
    ///
    /// # Errors
    ///
    /// - `BusError::NoTarget` if the message has no target.
    /// - `BusError::Decode` if the message cannot be encoded.
    /// - `BusError::Delivery` once every attempt has failed.
    pub async fn deliver(&self, message: &Message) -> Result<()> {
        let target = message.target_id().ok_or(BusError::NoTarget)?;
        let bytes = message.encode_to_vec()?;
        let mode = if message.message_type() == Some(MessageType::ReturningControl) {
            ActivationMode::Background
        } else {
            ActivationMode::Foreground
        };
        let to_hub = target == self.hub_id;

        let mut last_error = String::new();
        for attempt in 1..=self.attempts {
            if attempt > 1 && to_hub {
                tokio::time::sleep(self.hub_backoff).await;
            }

            let mut peer = self.directory.resolve(target);
            if attempt > 1 || !peer.is_active() {
                if let Err(e) = self.activator.activate(&peer, mode).await {
                    warn!(peer = target, attempt, error = %e, "activation failed");
                }
                peer = self.directory.resolve(target);
            }

            match self.connector.deliver(peer.port, &bytes).await {
                Ok(()) => {
                    debug!(
                        peer = target,
                        attempt,
                        kind = message.type_id(),
                        correlation_id = message.correlation_id(),
                        "delivered"
                    );
                    return Ok(());
                }
                Err(e) => {
                    debug!(peer = target, attempt, error = %e, "delivery attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        warn!(peer = target, attempts = self.attempts, "peer unreachable");
        Err(BusError::Delivery {
            peer: target.to_string(),
            attempts: self.attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use parking_lot::Mutex;

    use super::*;
    use crate::transport::TransportError;

    #[derive(Default)]
    struct CountingActivator {
        calls: AtomicU32,
        modes: Mutex<Vec<ActivationMode>>,
        /// Port to record for the peer on activation, if any.
        grant: Option<(Arc<Directory>, u16)>,
    }

    #[async_trait::async_trait]
    impl Activator for CountingActivator {
        async fn activate(&self, peer: &PeerInfo, mode: ActivationMode) -> std::result::Result<(), ActivationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.modes.lock().push(mode);
            if let Some((dir, port)) = &self.grant {
                dir.set_port(&peer.id, *port);
            }
            Ok(())
        }
    }

    /// Fails every delivery, or succeeds only for one port.
    struct ScriptedConnector {
        open_port: Option<u16>,
        seen: Mutex<Vec<u16>>,
    }

    #[async_trait::async_trait]
    impl Connector for ScriptedConnector {
        async fn deliver(&self, port: u16, _bytes: &[u8]) -> crate::transport::Result<()> {
            self.seen.lock().push(port);
            match self.open_port {
                Some(open) if open == port => Ok(()),
                _ => Err(TransportError::Connect { port, reason: "refused".into() }),
            }
        }
    }

    fn settings(attempts: u32) -> Settings {
        Settings::default()
            .with_delivery_attempts(attempts)
            .with_hub_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_unreachable_peer_activates_exactly_n_times() {
        for n in [1, 3, 5] {
            let directory = Arc::new(Directory::ephemeral());
            let activator = Arc::new(CountingActivator::default());
            let connector = Arc::new(ScriptedConnector { open_port: None, seen: Mutex::default() });
            let outbox = Outbox::new(&settings(n), directory, connector.clone(), activator.clone());

            let result = outbox.deliver(&Message::new("me", "ghost", MessageType::CustomEvent)).await;

            match result {
                Err(BusError::Delivery { peer, attempts, .. }) => {
                    assert_eq!(peer, "ghost");
                    assert_eq!(attempts, n);
                }
                other => panic!("expected delivery fault, got {:?}", other),
            }
            assert_eq!(activator.calls.load(Ordering::SeqCst), n);
            assert_eq!(connector.seen.lock().len(), n as usize);
        }
    }

    #[tokio::test]
    async fn test_activation_supplies_port() {
        let directory = Arc::new(Directory::ephemeral());
        let activator = Arc::new(CountingActivator {
            grant: Some((directory.clone(), 7000)),
            ..Default::default()
        });
        let connector = Arc::new(ScriptedConnector { open_port: Some(7000), seen: Mutex::default() });
        let outbox = Outbox::new(&settings(5), directory.clone(), connector.clone(), activator.clone());

        outbox.deliver(&Message::new("me", "sleepy", MessageType::CustomEvent)).await.unwrap();

        assert_eq!(activator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*connector.seen.lock(), vec![7000]);
        assert_eq!(directory.get("sleepy").unwrap().port, 7000);
    }

    #[tokio::test]
    async fn test_known_port_skips_first_activation() {
        let directory = Arc::new(Directory::ephemeral());
        directory.set_port("awake", 7100);
        let activator = Arc::new(CountingActivator::default());
        let connector = Arc::new(ScriptedConnector { open_port: Some(7100), seen: Mutex::default() });
        let outbox = Outbox::new(&settings(5), directory, connector, activator.clone());

        outbox.deliver(&Message::new("me", "awake", MessageType::CustomEvent)).await.unwrap();
        assert_eq!(activator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_returning_control_activates_in_background() {
        let directory = Arc::new(Directory::ephemeral());
        let activator = Arc::new(CountingActivator::default());
        let connector = Arc::new(ScriptedConnector { open_port: None, seen: Mutex::default() });
        let outbox = Outbox::new(&settings(2), directory, connector, activator.clone());

        let _ = outbox.deliver(&Message::new("me", "other", MessageType::ReturningControl)).await;
        assert_eq!(
            *activator.modes.lock(),
            vec![ActivationMode::Background, ActivationMode::Background]
        );
    }

    #[tokio::test]
    async fn test_hub_deliveries_back_off() {
        let directory = Arc::new(Directory::ephemeral());
        let activator = Arc::new(CountingActivator::default());
        let connector = Arc::new(ScriptedConnector { open_port: None, seen: Mutex::default() });
        let settings = Settings::default()
            .with_delivery_attempts(3)
            .with_hub_backoff(Duration::from_millis(40));
        let hub = settings.hub_id.clone();
        let outbox = Outbox::new(&settings, directory, connector, activator);

        let started = std::time::Instant::now();
        let result = outbox.deliver(&Message::new("me", hub, MessageType::RegisterPlugin)).await;

        assert!(matches!(result, Err(BusError::Delivery { .. })));
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_untargeted_message_is_rejected() {
        let outbox = Outbox::new(
            &settings(1),
            Arc::new(Directory::ephemeral()),
            Arc::new(ScriptedConnector { open_port: None, seen: Mutex::default() }),
            Arc::new(NoopActivator),
        );
        let result = outbox.deliver(&Message::untargeted("me", MessageType::CustomEvent)).await;
        assert!(matches!(result, Err(BusError::NoTarget)));
    }
}
