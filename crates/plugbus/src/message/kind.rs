//! Message type registry with integer ids partitioned into semantic bands.

use std::fmt;

/// Semantic band a message type id falls into.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Band {
    /// Plugin registration and activation (100s).
    Lifecycle,
    /// Menu registration and interaction (200s).
    Menu,
    /// Out-of-band user actions such as scans (300s).
    OutOfBand,
    /// Control hand-off between peers (400s).
    ControlFlow,
    /// Application-defined events (999).
    Custom,
    /// Meta types such as the wildcard (1000).
    Meta,
    /// Liveness probes (10000s).
    Keepalive,
    /// Storage RPC traffic (20000s).
    Storage,
    /// Generic acknowledgements (30000s).
    Ack,
}

/// Every message type known to the bus.
#[repr(i32)]
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageType {
    RegisterPlugin = 100,
    DeregisterPlugin = 110,
    ActivatePlugin = 120,
    DeactivatePlugin = 130,

    RegisterMenu = 200,
    MenuPressed = 210,
    EnableMenu = 220,
    DisableMenu = 230,
    DeregisterMenu = 240,

    ScanPressed = 300,
    ScanCompleted = 310,

    ReturningControl = 400,

    CustomEvent = 999,

    /// Wildcard: listeners registered for this type receive every message.
    AllEvents = 1000,

    Ping = 10001,
    Pong = 10002,

    StorageEvent = 20000,
    StorageSuccess = 20100,
    StorageError = 20400,

    ComapiSuccess = 30100,
    ComapiError = 30400,
}

impl MessageType {
    /// All types, in id order.
    pub const ALL: [MessageType; 21] = [
        MessageType::RegisterPlugin,
        MessageType::DeregisterPlugin,
        MessageType::ActivatePlugin,
        MessageType::DeactivatePlugin,
        MessageType::RegisterMenu,
        MessageType::MenuPressed,
        MessageType::EnableMenu,
        MessageType::DisableMenu,
        MessageType::DeregisterMenu,
        MessageType::ScanPressed,
        MessageType::ScanCompleted,
        MessageType::ReturningControl,
        MessageType::CustomEvent,
        MessageType::AllEvents,
        MessageType::Ping,
        MessageType::Pong,
        MessageType::StorageEvent,
        MessageType::StorageSuccess,
        MessageType::StorageError,
        MessageType::ComapiSuccess,
        MessageType::ComapiError,
    ];

    /// Returns the wire id.
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Returns the type for a wire id, or `None` if the id is unknown.
    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.id() == id)
    }

    /// Returns the semantic band of this type.
    pub fn band(self) -> Band {
        match self.id() {
            100..=199 => Band::Lifecycle,
            200..=299 => Band::Menu,
            300..=399 => Band::OutOfBand,
            400..=499 => Band::ControlFlow,
            999 => Band::Custom,
            1000..=1999 => Band::Meta,
            10000..=19999 => Band::Keepalive,
            20000..=29999 => Band::Storage,
            _ => Band::Ack,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.id())
    }
}
