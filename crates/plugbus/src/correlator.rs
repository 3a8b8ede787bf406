//! # Correlator
//!
//! Send a message and wait for the reply that carries the same correlation id.
//!
//! The private listener is registered before the message leaves, so a reply
//! that beats the sender back is never missed. The wait is a oneshot channel
//! under `tokio::time::timeout`; the listener is deregistered on every exit path,
//! including cancellation of the waiting future.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::warn;

use crate::dispatch::Dispatcher;
use crate::dispatch::MessageListener;
use crate::error::BusError;
use crate::error::Result;
use crate::message::Message;
use crate::message::MessageType;

/// Anything that can put a message on the bus.
#[async_trait::async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, message: Message) -> Result<()>;
}

/// Request/response matching on top of a dispatcher.
#[derive(Debug, Clone)]
pub struct Correlator {
    dispatcher: Arc<Dispatcher>,
}

impl Correlator {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Sends `request` through `outbound` and waits up to `timeout` for a reply.
    ///
    /// A reply matches when its type is in `accepted`, its correlation id equals
    /// the request's, and its source and target are the request's target and
    /// source. The first match wins; later duplicates are ignored.
    ///
    /// # Errors
    ///
    /// - `BusError::NoTarget` if `request` has no target.
    /// - Whatever `outbound` fails with while sending.
    /// - `BusError::Timeout` if nothing matched in time.
    pub async fn request(
        &self,
        outbound: &dyn Outbound,
        request: Message,
        accepted: &[MessageType],
        timeout: Duration,
    ) -> Result<Message> {
        let target = request.target_id().ok_or(BusError::NoTarget)?.to_string();
        let correlation_id = request.correlation_id().to_string();

        let (tx, rx) = oneshot::channel();
        let pending = PendingReply {
            correlation_id: correlation_id.clone(),
            accepted: accepted.to_vec(),
            expected_source: target,
            expected_target: request.source_id().to_string(),
            slot: Mutex::new(Some(tx)),
        };
        let listener: Arc<dyn MessageListener> = Arc::new(pending);
        self.dispatcher.register(accepted, listener.clone());
        let _registration = Registration { dispatcher: &self.dispatcher, listener };

        outbound.send(request).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => {
                debug!(%correlation_id, kind = reply.type_id(), "reply matched");
                Ok(reply)
            }
            // the sender lives in the registered listener, so this only happens on teardown
            Ok(Err(_)) => Err(BusError::ShutDown),
            Err(_) => {
                warn!(%correlation_id, ?timeout, "no reply in time");
                Err(BusError::Timeout { correlation_id, timeout })
            }
        }
    }
}

/// One in-flight request.
struct PendingReply {
    correlation_id: String,
    accepted: Vec<MessageType>,
    expected_source: String,
    expected_target: String,
    slot: Mutex<Option<oneshot::Sender<Message>>>,
}

impl PendingReply {
    fn matches(&self, message: &Message) -> bool {
        let kind_ok = message.message_type().is_some_and(|kind| {
            self.accepted.contains(&kind) || self.accepted.contains(&MessageType::AllEvents)
        });
        kind_ok
            && message.correlation_id() == self.correlation_id
            && message.source_id() == self.expected_source
            && message.target_id() == Some(self.expected_target.as_str())
    }
}

impl MessageListener for PendingReply {
    fn on_message(&self, message: &Message) {
        if !self.matches(message) {
            return;
        }
        if let Some(tx) = self.slot.lock().take() {
            let _ = tx.send(message.clone());
        }
    }
}

/// Removes the pending listener when the request ends, however it ends.
struct Registration<'a> {
    dispatcher: &'a Dispatcher,
    listener: Arc<dyn MessageListener>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.dispatcher.deregister(&self.listener, None);
    }
}
