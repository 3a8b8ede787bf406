//! Structured action URLs of the form `protocol://peer/path`.

use std::fmt;
use std::str::FromStr;

use plugpack::Decoder;
use plugpack::Encoder;
use plugpack::Record;

use crate::config::DEFAULT_PROTOCOL;

/// Reasons a URL string or its parts are rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("url '{0}' has no '://' separator")]
    MissingScheme(String),
    #[error("url '{0}' has an empty protocol")]
    EmptyProtocol(String),
    #[error("url has an empty target peer id")]
    EmptyPeer,
}

/// An action address: which peer handles it, and what path it names.
///
/// Equality and hashing are structural over all three parts.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct StructuredUrl {
    protocol: String,
    peer: String,
    path: String,
}

impl StructuredUrl {
    /// Creates a URL with the default protocol.
    ///
    /// # Errors
    /// Returns `UrlError::EmptyPeer` if `peer` is empty.
    pub fn new(peer: impl Into<String>, path: impl Into<String>) -> Result<Self, UrlError> {
        Self::with_protocol(DEFAULT_PROTOCOL, peer, path)
    }

    /// Creates a URL with an explicit protocol; an empty protocol falls back to the default.
    ///
    /// # Errors
    /// Returns `UrlError::EmptyPeer` if `peer` is empty.
    pub fn with_protocol(
        protocol: impl Into<String>,
        peer: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<Self, UrlError> {
        let mut protocol = protocol.into();
        if protocol.is_empty() {
            protocol = DEFAULT_PROTOCOL.to_string();
        }
        let peer = peer.into();
        if peer.is_empty() {
            return Err(UrlError::EmptyPeer);
        }
        Ok(Self { protocol, peer, path: path.into() })
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl FromStr for StructuredUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, rest) = s
            .split_once("://")
            .ok_or_else(|| UrlError::MissingScheme(s.to_string()))?;
        if protocol.is_empty() {
            return Err(UrlError::EmptyProtocol(s.to_string()));
        }
        let (peer, path) = rest.split_once('/').unwrap_or((rest, ""));
        Self::with_protocol(protocol, peer, path)
    }
}

impl fmt::Display for StructuredUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.protocol, self.peer, self.path)
    }
}

impl Record for StructuredUrl {
    const MARKER: i64 = 32_988_764_201;

    fn encode_fields(&self, enc: &mut Encoder) -> plugpack::Result<()> {
        enc.str(&self.protocol)?;
        enc.str(&self.peer)?;
        enc.str(&self.path)
    }

    fn decode_fields(dec: &mut Decoder<'_>) -> plugpack::Result<Self> {
        let protocol = dec.str()?;
        let peer = dec.str()?;
        let path = dec.str()?;
        Self::with_protocol(protocol, peer, path)
            .map_err(|e| plugpack::Error::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let url: StructuredUrl = "geiger://plugin-a/menu/scan".parse().unwrap();
        assert_eq!(url.protocol(), "geiger");
        assert_eq!(url.peer(), "plugin-a");
        assert_eq!(url.path(), "menu/scan");
        assert_eq!(url.to_string(), "geiger://plugin-a/menu/scan");
    }

    #[test]
    fn test_parse_without_path_normalizes_to_empty() {
        let url: StructuredUrl = "custom://peer".parse().unwrap();
        assert_eq!(url.path(), "");
        assert_eq!(url, StructuredUrl::with_protocol("custom", "peer", "").unwrap());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!("no-scheme".parse::<StructuredUrl>(), Err(UrlError::MissingScheme(_))));
        assert!(matches!("://peer/x".parse::<StructuredUrl>(), Err(UrlError::EmptyProtocol(_))));
        assert_eq!("geiger:///path".parse::<StructuredUrl>(), Err(UrlError::EmptyPeer));
    }

    #[test]
    fn test_empty_protocol_defaults() {
        let url = StructuredUrl::with_protocol("", "peer", "p").unwrap();
        assert_eq!(url.protocol(), DEFAULT_PROTOCOL);
    }

    #[test]
    fn test_structural_hash_equality() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(StructuredUrl::new("a", "x").unwrap());
        set.insert("geiger://a/x".parse().unwrap());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_record_rejects_empty_peer() {
        let mut enc = Encoder::new();
        enc.marker(StructuredUrl::MARKER);
        enc.str("geiger").unwrap();
        enc.str("").unwrap();
        enc.str("path").unwrap();
        enc.marker(StructuredUrl::MARKER);
        let bytes = enc.into_bytes();

        assert!(matches!(
            StructuredUrl::from_bytes(&bytes),
            Err(plugpack::Error::Malformed(_))
        ));
    }
}
