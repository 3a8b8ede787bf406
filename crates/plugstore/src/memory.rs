//! In-memory `StorageController`.
//!
//! Holds the tree in a sorted map keyed by full path. Children are derived
//! from the keys when a node is read, so stored `children` fields are ignored.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::controller::StorageController;
use crate::error::Result;
use crate::error::StorageError;
use crate::record::PATH_DELIMITER;
use crate::record::SearchCriteria;
use crate::record::StorageNode;
use crate::record::parent_of;

const ROOT: &str = ":";

#[derive(Debug, Default)]
pub struct MemoryStorage {
    nodes: RwLock<BTreeMap<String, StorageNode>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

fn validate(path: &str) -> Result<()> {
    if !path.starts_with(PATH_DELIMITER) || path.len() < 2 || path.ends_with(PATH_DELIMITER) {
        return Err(StorageError::Backend(format!("invalid path '{}'", path)));
    }
    Ok(())
}

/// True if `path` lies strictly below `ancestor`.
fn is_below(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT {
        return path != ROOT;
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path[ancestor.len()..].starts_with(PATH_DELIMITER)
}

fn children_of(nodes: &BTreeMap<String, StorageNode>, path: &str) -> Vec<String> {
    nodes
        .values()
        .filter(|n| n.parent() == Some(path))
        .map(|n| n.name().to_string())
        .collect()
}

fn materialize(nodes: &BTreeMap<String, StorageNode>, node: &StorageNode) -> StorageNode {
    let mut node = node.clone();
    node.children = children_of(nodes, &node.path);
    node
}

#[async_trait::async_trait]
impl StorageController for MemoryStorage {
    async fn get(&self, path: &str) -> Result<StorageNode> {
        let nodes = self.nodes.read();
        let node = nodes.get(path).ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        Ok(materialize(&nodes, node))
    }

    async fn add(&self, node: StorageNode) -> Result<()> {
        validate(&node.path)?;
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&node.path) {
            return Err(StorageError::AlreadyExists(node.path));
        }
        debug!(path = %node.path, "node added");
        nodes.insert(node.path.clone(), node);
        Ok(())
    }

    async fn update(&self, node: StorageNode) -> Result<()> {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&node.path) {
            Some(slot) => {
                *slot = node;
                Ok(())
            }
            None => Err(StorageError::NotFound(node.path)),
        }
    }

    async fn add_or_update(&self, node: StorageNode) -> Result<bool> {
        validate(&node.path)?;
        let created = self.nodes.write().insert(node.path.clone(), node).is_none();
        Ok(created)
    }

    async fn delete(&self, path: &str) -> Result<StorageNode> {
        let mut nodes = self.nodes.write();
        let removed = nodes.remove(path).ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        let before = nodes.len();
        nodes.retain(|key, _| !is_below(key, path));
        debug!(path, descendants = before - nodes.len(), "node deleted");
        Ok(removed)
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        validate(new_path)?;
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(old_path) {
            return Err(StorageError::NotFound(old_path.to_string()));
        }
        if nodes.contains_key(new_path) {
            return Err(StorageError::AlreadyExists(new_path.to_string()));
        }
        if is_below(new_path, old_path) {
            return Err(StorageError::Backend(format!("cannot move '{}' below itself", old_path)));
        }
        let moving: Vec<String> = nodes
            .keys()
            .filter(|key| key.as_str() == old_path || is_below(key, old_path))
            .cloned()
            .collect();
        for key in moving {
            if let Some(mut node) = nodes.remove(&key) {
                node.path = format!("{}{}", new_path, &key[old_path.len()..]);
                nodes.insert(node.path.clone(), node);
            }
        }
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let nodes = self.nodes.read();
        if path != ROOT && !nodes.contains_key(path) {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(children_of(&nodes, path))
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<StorageNode>> {
        let nodes = self.nodes.read();
        Ok(nodes
            .values()
            .filter(|n| criteria.matches(n))
            .map(|n| materialize(&nodes, n))
            .collect())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn zap(&self) -> Result<()> {
        self.nodes.write().clear();
        Ok(())
    }
}
