//! Storage records and the payload encodings the storage commands use.

use std::collections::BTreeMap;

use plugpack::Decoder;
use plugpack::Encoder;
use plugpack::Record;

/// Separates the segments of a storage path, e.g. `:Devices:laptop`.
pub const PATH_DELIMITER: char = ':';

/// One node of the tree-structured store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageNode {
    /// Full path, starting with the delimiter.
    pub path: String,
    /// Peer id of the owning plugin.
    pub owner: String,
    pub values: BTreeMap<String, String>,
    /// Names (last path segment) of the direct children.
    pub children: Vec<String>,
}

impl StorageNode {
    pub fn new(path: impl Into<String>, owner: impl Into<String>) -> Self {
        Self { path: path.into(), owner: owner.into(), ..Default::default() }
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// The last path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit(PATH_DELIMITER).next().unwrap_or_default()
    }

    /// The path of the parent node, or `None` at the root.
    pub fn parent(&self) -> Option<&str> {
        parent_of(&self.path)
    }
}

/// The parent path of `path`, or `None` at the root.
pub fn parent_of(path: &str) -> Option<&str> {
    match path.rfind(PATH_DELIMITER) {
        Some(0) if path.len() > 1 => Some(":"),
        Some(0) | None => None,
        Some(pos) => Some(&path[..pos]),
    }
}

impl Record for StorageNode {
    const MARKER: i64 = 5_511_230_981;

    fn encode_fields(&self, enc: &mut Encoder) -> plugpack::Result<()> {
        enc.str(&self.path)?;
        enc.str(&self.owner)?;
        enc.count(self.values.len())?;
        for (key, value) in &self.values {
            enc.str(key)?;
            enc.str(value)?;
        }
        enc.count(self.children.len())?;
        for child in &self.children {
            enc.str(child)?;
        }
        Ok(())
    }

    fn decode_fields(dec: &mut Decoder<'_>) -> plugpack::Result<Self> {
        let path = dec.str()?.to_owned();
        let owner = dec.str()?.to_owned();
        let mut values = BTreeMap::new();
        for _ in 0..dec.count()? {
            let key = dec.str()?.to_owned();
            values.insert(key, dec.str()?.to_owned());
        }
        let mut children = Vec::new();
        for _ in 0..dec.count()? {
            children.push(dec.str()?.to_owned());
        }
        Ok(Self { path, owner, values, children })
    }
}

/// Filter for `search`. Every field that is set must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    pub path_prefix: Option<String>,
    pub owner: Option<String>,
    /// Node must hold this key.
    pub key: Option<String>,
    /// With `key`: the value under that key. Alone: any value.
    pub value: Option<String>,
}

impl SearchCriteria {
    pub fn under(prefix: impl Into<String>) -> Self {
        Self { path_prefix: Some(prefix.into()), ..Default::default() }
    }

    #[must_use]
    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn matches(&self, node: &StorageNode) -> bool {
        if let Some(prefix) = &self.path_prefix {
            if !node.path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(owner) = &self.owner {
            if &node.owner != owner {
                return false;
            }
        }
        match (&self.key, &self.value) {
            (Some(key), Some(value)) => node.values.get(key) == Some(value),
            (Some(key), None) => node.values.contains_key(key),
            (None, Some(value)) => node.values.values().any(|v| v == value),
            (None, None) => true,
        }
    }
}

impl Record for SearchCriteria {
    const MARKER: i64 = 5_511_230_982;

    fn encode_fields(&self, enc: &mut Encoder) -> plugpack::Result<()> {
        enc.opt_str(self.path_prefix.as_deref())?;
        enc.opt_str(self.owner.as_deref())?;
        enc.opt_str(self.key.as_deref())?;
        enc.opt_str(self.value.as_deref())
    }

    fn decode_fields(dec: &mut Decoder<'_>) -> plugpack::Result<Self> {
        Ok(Self {
            path_prefix: dec.opt_str()?.map(str::to_owned),
            owner: dec.opt_str()?.map(str::to_owned),
            key: dec.opt_str()?.map(str::to_owned),
            value: dec.opt_str()?.map(str::to_owned),
        })
    }
}

// ============================================================================
//  Payloads
// ============================================================================

pub(crate) fn encode_nodes(nodes: &[StorageNode]) -> plugpack::Result<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.count(nodes.len())?;
    for node in nodes {
        enc.record(node)?;
    }
    Ok(enc.into_bytes())
}

pub(crate) fn decode_nodes(bytes: &[u8]) -> plugpack::Result<Vec<StorageNode>> {
    let mut dec = Decoder::new(bytes);
    let mut nodes = Vec::new();
    for _ in 0..dec.count()? {
        nodes.push(dec.record()?);
    }
    dec.finish()?;
    Ok(nodes)
}

pub(crate) fn encode_names(names: &[String]) -> plugpack::Result<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.count(names.len())?;
    for name in names {
        enc.str(name)?;
    }
    Ok(enc.into_bytes())
}

pub(crate) fn decode_names(bytes: &[u8]) -> plugpack::Result<Vec<String>> {
    let mut dec = Decoder::new(bytes);
    let mut names = Vec::new();
    for _ in 0..dec.count()? {
        names.push(dec.str()?.to_owned());
    }
    dec.finish()?;
    Ok(names)
}

pub(crate) fn encode_flag(value: bool) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.bool(value);
    enc.into_bytes()
}

pub(crate) fn decode_flag(bytes: &[u8]) -> plugpack::Result<bool> {
    let mut dec = Decoder::new(bytes);
    let value = dec.bool()?;
    dec.finish()?;
    Ok(value)
}
