//! # Message Envelope
//!
//! The unit of exchange on the bus. A message is immutable once built, except
//! that its payload may be replaced through `set_payload`.
//!
//! ## Wire layout
//!
//! `[MARKER] source [flag target] type-id correlation-id [flag url] [flag payload] [MARKER]`
//!
//! The payload travels as a base64 string so every field is text-safe.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use plugpack::Decoder;
use plugpack::Encoder;
use plugpack::Record;
use uuid::Uuid;

use super::MessageType;
use super::StructuredUrl;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    source_id: String,
    target_id: Option<String>,
    /// Raw wire id; kept so that messages of unknown type re-encode unchanged.
    type_id: i32,
    correlation_id: String,
    action: Option<StructuredUrl>,
    payload: Option<Vec<u8>>,
}

impl Message {
    /// Creates a message addressed to `target` with a fresh correlation id.
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: MessageType) -> Self {
        Self {
            source_id: source.into(),
            target_id: Some(target.into()),
            type_id: kind.id(),
            correlation_id: new_correlation_id(),
            action: None,
            payload: None,
        }
    }

    /// Creates a message with no target peer.
    pub fn untargeted(source: impl Into<String>, kind: MessageType) -> Self {
        Self {
            source_id: source.into(),
            target_id: None,
            type_id: kind.id(),
            correlation_id: new_correlation_id(),
            action: None,
            payload: None,
        }
    }

    /// Replaces the generated correlation id with a caller-supplied one.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: StructuredUrl) -> Self {
        self.action = Some(action);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Builds the reply to this message: source and target swapped, same
    /// correlation id and action.
    pub fn reply(&self, kind: MessageType, payload: Option<Vec<u8>>) -> Message {
        Message {
            source_id: self.target_id.clone().unwrap_or_default(),
            target_id: Some(self.source_id.clone()),
            type_id: kind.id(),
            correlation_id: self.correlation_id.clone(),
            action: self.action.clone(),
            payload,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    /// Returns the message type, or `None` if the wire id is unknown to this build.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_id(self.type_id)
    }

    pub fn type_id(&self) -> i32 {
        self.type_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn action(&self) -> Option<&StructuredUrl> {
        self.action.as_ref()
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Returns the payload as UTF-8 text, if present and valid.
    pub fn payload_str(&self) -> Option<&str> {
        self.payload.as_deref().and_then(|p| std::str::from_utf8(p).ok())
    }

    /// Replaces the payload.
    pub fn set_payload(&mut self, payload: Option<Vec<u8>>) {
        self.payload = payload;
    }

    /// Encodes the message as one standalone wire buffer.
    pub fn encode_to_vec(&self) -> plugpack::Result<Vec<u8>> {
        self.to_bytes()
    }

    /// Decodes exactly one message from a wire buffer.
    pub fn decode_from_slice(buf: &[u8]) -> plugpack::Result<Self> {
        Self::from_bytes(buf)
    }
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

impl Record for Message {
    const MARKER: i64 = 143_287_432;

    fn encode_fields(&self, enc: &mut Encoder) -> plugpack::Result<()> {
        enc.str(&self.source_id)?;
        enc.flag(self.target_id.is_some());
        if let Some(target) = &self.target_id {
            enc.str(target)?;
        }
        enc.i32(self.type_id);
        enc.str(&self.correlation_id)?;
        enc.opt_record(self.action.as_ref())?;
        enc.flag(self.payload.is_some());
        if let Some(payload) = &self.payload {
            enc.str(&BASE64.encode(payload))?;
        }
        Ok(())
    }

    fn decode_fields(dec: &mut Decoder<'_>) -> plugpack::Result<Self> {
        let source_id = dec.str()?.to_owned();
        let target_id = if dec.flag()? { Some(dec.str()?.to_owned()) } else { None };
        let type_id = dec.i32()?;
        let correlation_id = dec.str()?.to_owned();
        let action = dec.opt_record()?;
        let payload = if dec.flag()? {
            let text = dec.str()?;
            let bytes = BASE64
                .decode(text)
                .map_err(|e| plugpack::Error::Malformed(format!("payload is not base64: {}", e)))?;
            Some(bytes)
        } else {
            None
        };

        Ok(Message { source_id, target_id, type_id, correlation_id, action, payload })
    }
}
