//! # Error Definitions
//!
//! The failure taxonomy shared by every bus component. Each variant names one
//! way a specific call can fail to complete; none of them is process-fatal.

use std::time::Duration;

use crate::message::UrlError;
use crate::rpc::RemoteFault;
use crate::transport::TransportError;

/// Failures surfaced to callers of the bus.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    /// The wire format was corrupt, truncated, or from a different protocol version.
    #[error("decode fault: {0}")]
    Decode(#[from] plugpack::Error),
    /// No matching reply arrived within the wait window.
    #[error("timed out after {timeout:?} waiting for reply to {correlation_id}")]
    Timeout { correlation_id: String, timeout: Duration },
    /// The peer stayed unreachable after the bounded retry policy.
    #[error("peer '{peer}' unreachable after {attempts} attempt(s): {last_error}")]
    Delivery { peer: String, attempts: u32, last_error: String },
    /// The message carries no target peer id.
    #[error("message has no target peer")]
    NoTarget,
    /// Socket-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A structured action URL could not be parsed.
    #[error(transparent)]
    Url(#[from] UrlError),
    /// The hub answered with an error acknowledgement.
    #[error("request rejected: {0}")]
    Rejected(RemoteFault),
    /// A reply arrived but did not have the expected shape.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    /// The node behind a weak handle is gone.
    #[error("node has shut down")]
    ShutDown,
}

/// A specialized Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
