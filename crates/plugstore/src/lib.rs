//! # plugstore
//!
//! Storage access for plugins, carried over the plugbus RPC template.
//!
//! A plugin holds a [`StorageFacade`] and calls it like any local
//! [`StorageController`]. Each call becomes a `StorageEvent` message to the
//! hub, where [`StorageService`] forwards it to the engine and answers with
//! `StorageSuccess` or `StorageError`.
//!
//! ```ignore
//! let hub = Node::builder(HUB_ID).start().await?;
//! let _server = StorageService::install(&hub, Arc::new(MemoryStorage::new()));
//!
//! let storage = StorageFacade::new(plugin);
//! storage.add(StorageNode::new(":Devices:laptop", plugin.id())).await?;
//! ```

use plugbus::MessageType;
use plugbus::RpcTypes;

pub mod controller;
pub mod error;
pub mod facade;
pub mod memory;
pub mod record;
pub mod service;

pub use controller::StorageController;
pub use error::Result;
pub use error::StorageError;
pub use facade::StorageFacade;
pub use memory::MemoryStorage;
pub use record::SearchCriteria;
pub use record::StorageNode;
pub use service::StorageService;

/// Message types of the storage RPC.
pub const STORAGE_TYPES: RpcTypes = RpcTypes {
    call: MessageType::StorageEvent,
    success: MessageType::StorageSuccess,
    error: MessageType::StorageError,
};

/// Command names on the wire.
pub mod command {
    pub const GET: &str = "getNode";
    pub const ADD: &str = "add";
    pub const UPDATE: &str = "update";
    pub const ADD_OR_UPDATE: &str = "addOrUpdate";
    pub const DELETE: &str = "delete";
    pub const RENAME: &str = "rename";
    pub const LIST: &str = "listNodes";
    pub const SEARCH: &str = "search";
    pub const FLUSH: &str = "flush";
    pub const ZAP: &str = "zap";

    pub const ALL: [&str; 10] = [GET, ADD, UPDATE, ADD_OR_UPDATE, DELETE, RENAME, LIST, SEARCH, FLUSH, ZAP];
}

#[cfg(test)]
mod tests;
