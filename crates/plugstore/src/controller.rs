//! The storage interface, implemented locally by an engine and remotely by
//! `StorageFacade`.

use crate::error::Result;
use crate::record::SearchCriteria;
use crate::record::StorageNode;

#[async_trait::async_trait]
pub trait StorageController: Send + Sync + 'static {
    /// Returns the node at `path`.
    async fn get(&self, path: &str) -> Result<StorageNode>;

    /// Stores a new node; fails if one already exists at its path.
    async fn add(&self, node: StorageNode) -> Result<()>;

    /// Replaces an existing node; fails if there is none.
    async fn update(&self, node: StorageNode) -> Result<()>;

    /// Adds or replaces. Returns `true` if the node was created.
    async fn add_or_update(&self, node: StorageNode) -> Result<bool>;

    /// Removes the node at `path` and returns it.
    async fn delete(&self, path: &str) -> Result<StorageNode>;

    /// Moves the node at `old_path` to `new_path`.
    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()>;

    /// Names of the direct children of `path`.
    async fn list(&self, path: &str) -> Result<Vec<String>>;

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<StorageNode>>;

    /// Forces pending writes to durable storage.
    async fn flush(&self) -> Result<()>;

    /// Drops every node.
    async fn zap(&self) -> Result<()>;
}
