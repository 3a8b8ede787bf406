//! # Dispatch Registry
//!
//! Per-type and wildcard listener subscriptions.
//!
//! Listeners run synchronously on the task that dispatched the message, in
//! registration order: wildcard listeners first, then listeners of the message's
//! own type. The listener lists are snapshotted before any callback runs, so
//! registering or deregistering from inside a callback never deadlocks.

use std::sync::Arc;

use dashmap::DashMap;

use crate::message::Message;
use crate::message::MessageType;

/// A subscriber to inbound messages.
pub trait MessageListener: Send + Sync + 'static {
    fn on_message(&self, message: &Message);
}

impl<F> MessageListener for F
where
    F: Fn(&Message) + Send + Sync + 'static,
{
    fn on_message(&self, message: &Message) {
        self(message)
    }
}

/// Subscriptions keyed by message type; `MessageType::AllEvents` is the wildcard.
#[derive(Default)]
pub struct Dispatcher {
    listeners: DashMap<MessageType, Vec<Arc<dyn MessageListener>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("listeners", &self.len()).finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `listener` to each of `types`. Registering the same listener
    /// twice for one type is a no-op.
    pub fn register(&self, types: &[MessageType], listener: Arc<dyn MessageListener>) {
        for kind in types {
            let mut list = self.listeners.entry(*kind).or_default();
            if !list.iter().any(|l| same(l, &listener)) {
                list.push(listener.clone());
            }
        }
    }

    /// Unsubscribes `listener` from `types`, or from every type when `None`.
    pub fn deregister(&self, listener: &Arc<dyn MessageListener>, types: Option<&[MessageType]>) {
        match types {
            None => self.listeners.retain(|_, list| {
                list.retain(|l| !same(l, listener));
                !list.is_empty()
            }),
            Some(types) => {
                for kind in types {
                    if let Some(mut list) = self.listeners.get_mut(kind) {
                        list.retain(|l| !same(l, listener));
                    }
                    self.listeners.remove_if(kind, |_, list| list.is_empty());
                }
            }
        }
    }

    /// Delivers `message` to wildcard listeners, then to listeners of its type.
    ///
    /// A message whose type id is unknown reaches only the wildcard listeners.
    pub fn dispatch(&self, message: &Message) {
        let mut targets = self.snapshot(MessageType::AllEvents);
        if let Some(kind) = message.message_type().filter(|k| *k != MessageType::AllEvents) {
            targets.extend(self.snapshot(kind));
        }
        for listener in targets {
            listener.on_message(message);
        }
    }

    /// Total number of (type, listener) subscriptions.
    pub fn len(&self) -> usize {
        self.listeners.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of listeners subscribed to exactly `kind`.
    pub fn listeners_for(&self, kind: MessageType) -> usize {
        self.listeners.get(&kind).map_or(0, |list| list.len())
    }

    fn snapshot(&self, kind: MessageType) -> Vec<Arc<dyn MessageListener>> {
        self.listeners.get(&kind).map(|list| list.clone()).unwrap_or_default()
    }
}

fn same(a: &Arc<dyn MessageListener>, b: &Arc<dyn MessageListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, name: &'static str) -> Arc<dyn MessageListener> {
        let log = log.clone();
        Arc::new(move |m: &Message| log.lock().push(format!("{}:{}", name, m.type_id())))
    }

    fn msg(kind: MessageType) -> Message {
        Message::new("a", "b", kind)
    }

    #[test]
    fn test_wildcard_then_specific_in_registration_order() {
        let dispatcher = Dispatcher::new();
        let log = Log::default();

        dispatcher.register(&[MessageType::Ping], recorder(&log, "first"));
        dispatcher.register(&[MessageType::AllEvents], recorder(&log, "wild"));
        dispatcher.register(&[MessageType::Ping], recorder(&log, "second"));

        dispatcher.dispatch(&msg(MessageType::Ping));
        dispatcher.dispatch(&msg(MessageType::Pong));

        assert_eq!(
            *log.lock(),
            vec!["wild:10001", "first:10001", "second:10001", "wild:10002"]
        );
    }

    #[test]
    fn test_unknown_type_reaches_only_wildcard() {
        let dispatcher = Dispatcher::new();
        let log = Log::default();
        dispatcher.register(&[MessageType::AllEvents], recorder(&log, "wild"));
        dispatcher.register(&[MessageType::CustomEvent], recorder(&log, "custom"));

        let bytes = msg(MessageType::CustomEvent).encode_to_vec().unwrap();
        // patch the i32 type id (999 -> 4242) in place
        let pos = bytes
            .windows(4)
            .position(|w| w == 999i32.to_be_bytes())
            .unwrap();
        let mut patched = bytes.clone();
        patched[pos..pos + 4].copy_from_slice(&4242i32.to_be_bytes());
        let unknown = Message::decode_from_slice(&patched).unwrap();

        dispatcher.dispatch(&unknown);
        assert_eq!(*log.lock(), vec!["wild:4242"]);
    }

    #[test]
    fn test_register_is_idempotent() {
        let dispatcher = Dispatcher::new();
        let listener = recorder(&Log::default(), "x");
        dispatcher.register(&[MessageType::Ping], listener.clone());
        dispatcher.register(&[MessageType::Ping], listener);
        assert_eq!(dispatcher.listeners_for(MessageType::Ping), 1);
    }

    #[test]
    fn test_deregister_selected_and_all() {
        let dispatcher = Dispatcher::new();
        let listener = recorder(&Log::default(), "x");
        let types = [MessageType::Ping, MessageType::Pong, MessageType::ScanPressed];
        dispatcher.register(&types, listener.clone());
        assert_eq!(dispatcher.len(), 3);

        dispatcher.deregister(&listener, Some(&[MessageType::Ping]));
        assert_eq!(dispatcher.listeners_for(MessageType::Ping), 0);
        assert_eq!(dispatcher.len(), 2);

        dispatcher.deregister(&listener, None);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_listener_may_deregister_itself() {
        let dispatcher = Arc::new(Dispatcher::new());
        let slot: Arc<Mutex<Option<Arc<dyn MessageListener>>>> = Arc::default();

        let d = dispatcher.clone();
        let s = slot.clone();
        let listener: Arc<dyn MessageListener> = Arc::new(move |_: &Message| {
            if let Some(me) = s.lock().take() {
                d.deregister(&me, None);
            }
        });
        *slot.lock() = Some(listener.clone());
        dispatcher.register(&[MessageType::Ping], listener);

        dispatcher.dispatch(&msg(MessageType::Ping));
        assert!(dispatcher.is_empty());
    }
}
