//! # Peer Directory
//!
//! Per-process map of peer id to contact info, plus the menu entries the hub
//! brokers. The directory is a cache: it is persisted after every mutation and
//! restored at startup, but a missing or corrupt blob only means starting empty.
//!
//! ## Invariants
//! - Peer ids are unique within a directory.
//! - Resolving an unknown id creates an entry with port 0 ("never activated").
//! - Persistence failures are logged, never propagated.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use parking_lot::RwLock;
use plugpack::Decoder;
use plugpack::Encoder;
use plugpack::Record;
use rand::RngCore;
use tracing::debug;
use tracing::warn;

use crate::message::StructuredUrl;

/// Length of the per-peer secret generated for new entries.
pub const SECRET_LEN: usize = 32;

/// Contact info for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: String,
    /// Platform-specific startup spec, opaque to the bus.
    pub startup_spec: String,
    /// Last known listening port; 0 means unknown or inactive.
    pub port: u16,
    pub secret: Vec<u8>,
}

impl PeerInfo {
    /// Creates an inactive entry with an empty startup spec and a fresh secret.
    pub fn new(id: impl Into<String>) -> Self {
        let mut secret = vec![0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut secret);
        Self {
            id: id.into(),
            startup_spec: String::new(),
            port: 0,
            secret,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_startup_spec(mut self, spec: impl Into<String>) -> Self {
        self.startup_spec = spec.into();
        self
    }

    /// True once the peer has advertised a listening port.
    pub fn is_active(&self) -> bool {
        self.port != 0
    }
}

impl Record for PeerInfo {
    const MARKER: i64 = 8_978_978_978;

    fn encode_fields(&self, enc: &mut Encoder) -> plugpack::Result<()> {
        enc.str(&self.id)?;
        enc.str(&self.startup_spec)?;
        enc.i32(i32::from(self.port));
        enc.str(&BASE64.encode(&self.secret))
    }

    fn decode_fields(dec: &mut Decoder<'_>) -> plugpack::Result<Self> {
        let id = dec.str()?.to_owned();
        let startup_spec = dec.str()?.to_owned();
        let raw_port = dec.i32()?;
        let port = u16::try_from(raw_port)
            .map_err(|_| plugpack::Error::Malformed(format!("port {} out of range", raw_port)))?;
        let secret = BASE64
            .decode(dec.str()?)
            .map_err(|e| plugpack::Error::Malformed(format!("secret is not base64: {}", e)))?;
        Ok(Self { id, startup_spec, port, secret })
    }
}

/// A menu entry registered by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub name: String,
    /// Where a press is forwarded.
    pub action: StructuredUrl,
    pub enabled: bool,
}

impl MenuItem {
    pub fn new(name: impl Into<String>, action: StructuredUrl) -> Self {
        Self { name: name.into(), action, enabled: true }
    }
}

impl Record for MenuItem {
    const MARKER: i64 = 2_348_712_398_237;

    fn encode_fields(&self, enc: &mut Encoder) -> plugpack::Result<()> {
        enc.str(&self.name)?;
        enc.record(&self.action)?;
        enc.bool(self.enabled);
        Ok(())
    }

    fn decode_fields(dec: &mut Decoder<'_>) -> plugpack::Result<Self> {
        Ok(Self {
            name: dec.str()?.to_owned(),
            action: dec.record()?,
            enabled: dec.bool()?,
        })
    }
}

/// The persisted directory contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerDirectory {
    pub peers: BTreeMap<String, PeerInfo>,
    pub menus: BTreeMap<String, MenuItem>,
}

impl Record for PeerDirectory {
    const MARKER: i64 = 9_188_776_651;

    fn encode_fields(&self, enc: &mut Encoder) -> plugpack::Result<()> {
        enc.count(self.peers.len())?;
        for peer in self.peers.values() {
            enc.record(peer)?;
        }
        enc.count(self.menus.len())?;
        for menu in self.menus.values() {
            enc.record(menu)?;
        }
        Ok(())
    }

    fn decode_fields(dec: &mut Decoder<'_>) -> plugpack::Result<Self> {
        let mut peers = BTreeMap::new();
        for _ in 0..dec.count()? {
            let peer: PeerInfo = dec.record()?;
            peers.insert(peer.id.clone(), peer);
        }
        let mut menus = BTreeMap::new();
        for _ in 0..dec.count()? {
            let menu: MenuItem = dec.record()?;
            menus.insert(menu.name.clone(), menu);
        }
        Ok(Self { peers, menus })
    }
}

/// Where a directory blob is kept between runs.
///
/// `save` is called synchronously after every mutation. On a multi-thread
/// tokio runtime it runs under `block_in_place`, so a slow store stalls the
/// caller but not the other tasks on that worker.
pub trait DirectoryStore: Send + Sync {
    /// Returns the stored blob, or `None` if nothing was stored yet.
    fn load(&self) -> io::Result<Option<Vec<u8>>>;
    /// Replaces the stored blob.
    fn save(&self, blob: &[u8]) -> io::Result<()>;
}

/// Keeps nothing; every start is empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct EphemeralStore;

impl DirectoryStore for EphemeralStore {
    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn save(&self, _blob: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

/// One file per process identity.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Derives the file path for `peer_id` under `state_dir`.
    pub fn for_peer(state_dir: &Path, peer_id: &str) -> Self {
        let name: String = peer_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        Self::new(state_dir.join(format!("{}.directory", name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DirectoryStore for FileStore {
    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, blob: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // write-then-rename so a crash never leaves half a blob behind
        let tmp = self.path.with_extension("directory.tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &self.path)
    }
}

/// The live, synchronized directory of one process.
pub struct Directory {
    state: RwLock<PeerDirectory>,
    store: Arc<dyn DirectoryStore>,
    /// Serializes writes so the newest snapshot always lands last.
    persist_lock: Mutex<()>,
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Directory")
            .field("peers", &state.peers.len())
            .field("menus", &state.menus.len())
            .finish()
    }
}

impl Directory {
    /// Restores the directory from `store`.
    ///
    /// A missing blob starts empty. An unreadable or corrupt blob also starts
    /// empty and is immediately overwritten.
    pub fn open(store: Arc<dyn DirectoryStore>) -> Self {
        let (state, rewrite) = match store.load() {
            Ok(None) => (PeerDirectory::default(), false),
            Ok(Some(blob)) => match PeerDirectory::from_bytes(&blob) {
                Ok(restored) => {
                    debug!(peers = restored.peers.len(), menus = restored.menus.len(), "restored peer directory");
                    (restored, false)
                }
                Err(e) => {
                    warn!(error = %e, "peer directory is corrupt, reinitializing");
                    (PeerDirectory::default(), true)
                }
            },
            Err(e) => {
                warn!(error = %e, "peer directory unreadable, reinitializing");
                (PeerDirectory::default(), true)
            }
        };

        let directory = Self {
            state: RwLock::new(state),
            store,
            persist_lock: Mutex::new(()),
        };
        if rewrite {
            directory.persist();
        }
        directory
    }

    /// A directory that is never persisted.
    pub fn ephemeral() -> Self {
        Self::open(Arc::new(EphemeralStore))
    }

    /// Returns the entry for `id`, creating an inactive one if it is unknown.
    pub fn resolve(&self, id: &str) -> PeerInfo {
        if let Some(info) = self.get(id) {
            return info;
        }
        let created = {
            let mut state = self.state.write();
            state
                .peers
                .entry(id.to_string())
                .or_insert_with(|| PeerInfo::new(id))
                .clone()
        };
        self.persist();
        created
    }

    pub fn get(&self, id: &str) -> Option<PeerInfo> {
        self.state.read().peers.get(id).cloned()
    }

    /// Inserts or replaces the entry for `info.id`.
    pub fn upsert(&self, info: PeerInfo) {
        self.state.write().peers.insert(info.id.clone(), info);
        self.persist();
    }

    /// Records a new port for `id`, creating the entry if needed.
    pub fn set_port(&self, id: &str, port: u16) -> PeerInfo {
        let updated = {
            let mut state = self.state.write();
            let entry = state
                .peers
                .entry(id.to_string())
                .or_insert_with(|| PeerInfo::new(id));
            entry.port = port;
            entry.clone()
        };
        self.persist();
        updated
    }

    pub fn remove(&self, id: &str) -> Option<PeerInfo> {
        let removed = self.state.write().peers.remove(id);
        if removed.is_some() {
            self.persist();
        }
        removed
    }

    /// Drops every peer and menu entry.
    pub fn clear(&self) {
        {
            let mut state = self.state.write();
            state.peers.clear();
            state.menus.clear();
        }
        self.persist();
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.state.read().peers.values().cloned().collect()
    }

    pub fn register_menu(&self, item: MenuItem) {
        self.state.write().menus.insert(item.name.clone(), item);
        self.persist();
    }

    pub fn remove_menu(&self, name: &str) -> Option<MenuItem> {
        let removed = self.state.write().menus.remove(name);
        if removed.is_some() {
            self.persist();
        }
        removed
    }

    /// Flips the enabled flag of a menu. Returns `false` if the menu is unknown.
    pub fn set_menu_enabled(&self, name: &str, enabled: bool) -> bool {
        let found = match self.state.write().menus.get_mut(name) {
            Some(item) => {
                item.enabled = enabled;
                true
            }
            None => false,
        };
        if found {
            self.persist();
        }
        found
    }

    pub fn menu(&self, name: &str) -> Option<MenuItem> {
        self.state.read().menus.get(name).cloned()
    }

    pub fn menus(&self) -> Vec<MenuItem> {
        self.state.read().menus.values().cloned().collect()
    }

    /// Returns a copy of the full contents.
    pub fn snapshot(&self) -> PeerDirectory {
        self.state.read().clone()
    }

    fn persist(&self) {
        let _guard = self.persist_lock.lock();
        let snapshot = self.snapshot();
        let result = snapshot
            .to_bytes()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            .and_then(|blob| blocking(|| self.store.save(&blob)));
        if let Err(e) = result {
            warn!(error = %e, "failed to persist peer directory");
        }
    }
}

/// Runs blocking I/O off the async worker when the runtime allows it.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}
