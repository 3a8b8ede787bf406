//! # Settings
//!
//! Named tunables for the bus. Every retry count, backoff and timeout lives here
//! with a documented default; nothing is embedded as a literal at the call site.

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use config::Config;
use config::ConfigError;
use config::Environment;
use serde::Deserialize;

/// Peer id of the hub process.
pub const DEFAULT_HUB_ID: &str = "__MASTERPLUGIN__";
/// Well-known port the hub listens on.
pub const DEFAULT_HUB_PORT: u16 = 12348;
/// Protocol tag used in structured action URLs.
pub const DEFAULT_PROTOCOL: &str = "geiger";

/// Bus configuration.
///
/// Deserializes with `#[serde(default)]`, so any subset of keys may be supplied.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Peer id of the hub. Default `__MASTERPLUGIN__`.
    pub hub_id: String,
    /// Port the hub binds. Default `12348`; `0` lets the OS pick (tests).
    pub hub_port: u16,
    /// Loopback address every socket binds and connects to. Default `127.0.0.1`.
    pub bind_host: IpAddr,
    /// Connections decoded and dispatched concurrently. Default `8`.
    pub worker_threads: usize,
    /// Delivery attempts before a delivery fault. Default `5`.
    pub delivery_attempts: u32,
    /// Pause between attempts when the target is the hub. Default `1000` ms.
    pub hub_backoff_ms: u64,
    /// Socket connect timeout. Default `2000` ms.
    pub connect_timeout_ms: u64,
    /// How long an accepted connection may take to deliver its message before
    /// it is dropped. Default `5000` ms.
    pub read_timeout_ms: u64,
    /// Wait window for hub requests and liveness probes. Default `10000` ms.
    pub request_timeout_ms: u64,
    /// Wait window for RPC façade calls. Default `30000` ms.
    pub rpc_timeout_ms: u64,
    /// Largest inbound message accepted. Default 16 MiB.
    pub max_message_bytes: usize,
    /// Directory holding persisted peer directories. Default: platform data dir.
    pub state_dir: Option<PathBuf>,
    /// Protocol tag for action URLs. Default `geiger`.
    pub protocol: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hub_id: DEFAULT_HUB_ID.to_string(),
            hub_port: DEFAULT_HUB_PORT,
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            worker_threads: 8,
            delivery_attempts: 5,
            hub_backoff_ms: 1_000,
            connect_timeout_ms: 2_000,
            read_timeout_ms: 5_000,
            request_timeout_ms: 10_000,
            rpc_timeout_ms: 30_000,
            max_message_bytes: 16 * 1024 * 1024,
            state_dir: None,
            protocol: DEFAULT_PROTOCOL.to_string(),
        }
    }
}

impl Settings {
    /// Loads settings from `PLUGBUS__*` environment variables over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be deserialized.
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(
                Environment::with_prefix("PLUGBUS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn hub_backoff(&self) -> Duration { Duration::from_millis(self.hub_backoff_ms) }
    pub fn connect_timeout(&self) -> Duration { Duration::from_millis(self.connect_timeout_ms) }
    pub fn read_timeout(&self) -> Duration { Duration::from_millis(self.read_timeout_ms) }
    pub fn request_timeout(&self) -> Duration { Duration::from_millis(self.request_timeout_ms) }
    pub fn rpc_timeout(&self) -> Duration { Duration::from_millis(self.rpc_timeout_ms) }

    /// Resolves the directory that holds persisted peer directories.
    pub fn state_dir(&self) -> PathBuf {
        match &self.state_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("plugbus"),
        }
    }

    #[must_use]
    pub fn with_hub_port(mut self, port: u16) -> Self {
        self.hub_port = port;
        self
    }

    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_delivery_attempts(mut self, attempts: u32) -> Self {
        self.delivery_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_hub_backoff(mut self, backoff: Duration) -> Self {
        self.hub_backoff_ms = duration_ms(backoff);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = duration_ms(timeout);
        self
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
