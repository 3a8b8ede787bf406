//! # Storage Errors

use plugbus::BusError;
use plugbus::RemoteFault;
use plugbus::RpcError;

/// Fault names carried on the wire for the local variants.
pub const NOT_FOUND: &str = "NotFound";
pub const ALREADY_EXISTS: &str = "AlreadyExists";
pub const STORAGE_EXCEPTION: &str = "StorageException";

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("no node at '{0}'")]
    NotFound(String),
    #[error("a node already exists at '{0}'")]
    AlreadyExists(String),
    /// The storage engine failed.
    #[error("storage backend failure: {0}")]
    Backend(String),
    /// The hub answered with a fault; name, message and stack are the originals.
    #[error("remote storage fault: {0}")]
    Remote(RemoteFault),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("codec fault: {0}")]
    Codec(#[from] plugpack::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// True for a local `NotFound` and for a remote fault of the same name.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Remote(fault) => fault.name == NOT_FOUND,
            _ => false,
        }
    }

    /// True for a local `AlreadyExists` and for a remote fault of the same name.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists(_) => true,
            Self::Remote(fault) => fault.name == ALREADY_EXISTS,
            _ => false,
        }
    }

    /// The wire form of this error, as sent back to a remote caller.
    pub fn to_fault(&self) -> RemoteFault {
        match self {
            Self::NotFound(path) => RemoteFault::new(NOT_FOUND, path.clone()),
            Self::AlreadyExists(path) => RemoteFault::new(ALREADY_EXISTS, path.clone()),
            Self::Backend(msg) => RemoteFault::new(STORAGE_EXCEPTION, msg.clone()),
            Self::Remote(fault) => fault.clone(),
            Self::Bus(e) => RemoteFault::new("BusFault", e.to_string()),
            Self::Codec(e) => RemoteFault::new("DecodeFault", e.to_string()),
        }
    }
}

impl From<RpcError> for StorageError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Bus(bus) => Self::Bus(bus),
            RpcError::Remote(fault) => Self::Remote(fault),
            RpcError::Protocol(msg) => Self::Bus(BusError::UnexpectedReply(msg)),
        }
    }
}
