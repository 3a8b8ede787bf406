//! # Storage Facade
//!
//! `StorageController` implemented as RPC calls to the hub. Each method is one
//! `RpcClient::call`; faults from the hub come back as `StorageError::Remote`
//! with the original name, message and stack.

use std::time::Duration;

use plugbus::Node;
use plugbus::RpcClient;
use plugpack::Record;
use tracing::debug;

use crate::STORAGE_TYPES;
use crate::command;
use crate::controller::StorageController;
use crate::error::Result;
use crate::error::StorageError;
use crate::record::SearchCriteria;
use crate::record::StorageNode;
use crate::record::decode_flag;
use crate::record::decode_names;
use crate::record::decode_nodes;

/// Remote storage served by the hub.
#[derive(Debug, Clone)]
pub struct StorageFacade {
    client: RpcClient,
}

impl StorageFacade {
    /// A facade talking to the hub named in `node`'s settings.
    pub fn new(node: Node) -> Self {
        let hub = node.hub_id().to_string();
        Self { client: RpcClient::new(node, hub, STORAGE_TYPES) }
    }

    /// A facade talking to an explicit storage peer.
    pub fn with_target(node: Node, target: impl Into<String>) -> Self {
        Self { client: RpcClient::new(node, target, STORAGE_TYPES) }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = self.client.with_timeout(timeout);
        self
    }

    async fn call(&self, method: &str, args: &[&str], payload: Option<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        debug!(method, "storage call");
        Ok(self.client.call(method, args, payload).await?)
    }

    async fn call_expecting(&self, method: &str, args: &[&str], payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
        self.call(method, args, payload).await?.ok_or_else(|| {
            StorageError::Bus(plugbus::BusError::UnexpectedReply(format!("'{}' returned no payload", method)))
        })
    }
}

#[async_trait::async_trait]
impl StorageController for StorageFacade {
    async fn get(&self, path: &str) -> Result<StorageNode> {
        let bytes = self.call_expecting(command::GET, &[path], None).await?;
        Ok(StorageNode::from_bytes(&bytes)?)
    }

    async fn add(&self, node: StorageNode) -> Result<()> {
        self.call(command::ADD, &[], Some(node.to_bytes()?)).await?;
        Ok(())
    }

    async fn update(&self, node: StorageNode) -> Result<()> {
        self.call(command::UPDATE, &[], Some(node.to_bytes()?)).await?;
        Ok(())
    }

    async fn add_or_update(&self, node: StorageNode) -> Result<bool> {
        let bytes = self.call_expecting(command::ADD_OR_UPDATE, &[], Some(node.to_bytes()?)).await?;
        Ok(decode_flag(&bytes)?)
    }

    async fn delete(&self, path: &str) -> Result<StorageNode> {
        let bytes = self.call_expecting(command::DELETE, &[path], None).await?;
        Ok(StorageNode::from_bytes(&bytes)?)
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.call(command::RENAME, &[old_path, new_path], None).await?;
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let bytes = self.call_expecting(command::LIST, &[path], None).await?;
        Ok(decode_names(&bytes)?)
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<StorageNode>> {
        let bytes = self.call_expecting(command::SEARCH, &[], Some(criteria.to_bytes()?)).await?;
        Ok(decode_nodes(&bytes)?)
    }

    async fn flush(&self) -> Result<()> {
        self.call(command::FLUSH, &[], None).await?;
        Ok(())
    }

    async fn zap(&self) -> Result<()> {
        self.call(command::ZAP, &[], None).await?;
        Ok(())
    }
}
