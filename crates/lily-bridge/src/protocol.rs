//! Wire types for the backend WebSocket protocol.
//!
//! Every frame is a JSON text message `{id, kind, payload}`. Requests and
//! their responses share an `id`; backend-initiated frames carry a fresh one.
//! The payload structs below are what rides inside `payload` for each kind.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use lily_common::{AudioFrame, LinkError, RequestId, TranslationError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Kind of a backend frame. Kinds this adapter does not know become `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    TextRequest,
    TextResponse,
    TextMessage,
    VoiceJoin,
    VoiceJoinAck,
    VoiceLeave,
    AudioFrame,
    Ping,
    Pong,
    SessionClosed,
    Error,
    #[serde(other)]
    Unknown,
}

impl EnvelopeKind {
    /// Kinds that only ever arrive as the answer to one of our requests.
    pub fn is_response(self) -> bool {
        matches!(self, EnvelopeKind::TextResponse | EnvelopeKind::VoiceJoinAck)
    }
}

/// One frame on the backend link. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    id: RequestId,
    kind: EnvelopeKind,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Envelope {
    /// Build an envelope with a fresh id.
    pub fn new(kind: EnvelopeKind, payload: serde_json::Value) -> Self {
        Self::with_id(RequestId::new(), kind, payload)
    }

    pub fn with_id(id: RequestId, kind: EnvelopeKind, payload: serde_json::Value) -> Self {
        Self { id, kind, payload }
    }

    /// Build an envelope from a typed payload.
    pub fn from_payload<T: Serialize>(
        kind: EnvelopeKind,
        payload: &T,
    ) -> Result<Self, TranslationError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| TranslationError::InvalidPayload(e.to_string()))?;
        Ok(Self::new(kind, payload))
    }

    /// An answer to this envelope: same id, new kind and payload.
    pub fn reply(&self, kind: EnvelopeKind, payload: serde_json::Value) -> Self {
        Self::with_id(self.id.clone(), kind, payload)
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Decode the payload into the struct for this kind.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, TranslationError> {
        T::deserialize(&self.payload).map_err(|e| TranslationError::InvalidPayload(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, LinkError> {
        serde_json::to_string(self).map_err(|e| LinkError::Protocol(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, LinkError> {
        serde_json::from_str(text).map_err(|e| LinkError::Protocol(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Text payloads
// ---------------------------------------------------------------------------

/// What a text request asks the backend to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextIntent {
    /// The user said the wake phrase; `text` is whatever followed it.
    SessionStart,
    /// The user said goodbye inside a conversation.
    SessionEnd,
    /// The user said goodbye without an open conversation.
    SessionNoActive,
    Message,
}

/// Attachment forwarded to the backend by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRequestPayload {
    pub intent: TextIntent,
    pub user_id: String,
    pub username: String,
    pub guild_id: String,
    pub channel_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
}

/// Answer to a text request. An empty `text` means nothing to say.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextResponsePayload {
    #[serde(default)]
    pub text: String,
}

/// Text the backend sends on its own initiative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessagePayload {
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Voice payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceJoinPayload {
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceJoinAckPayload {
    pub guild_id: String,
    #[serde(default = "default_accepted")]
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_accepted() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceLeavePayload {
    pub guild_id: String,
}

/// One audio frame; `data` is base64 on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFramePayload {
    pub guild_id: String,
    pub seq: u64,
    pub data: String,
}

impl AudioFramePayload {
    pub fn encode(guild_id: &str, frame: &AudioFrame) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            seq: frame.seq,
            data: BASE64.encode(&frame.data),
        }
    }

    pub fn decode(&self) -> Result<AudioFrame, TranslationError> {
        let data = BASE64
            .decode(self.data.as_bytes())
            .map_err(|e| TranslationError::InvalidPayload(format!("audio data: {e}")))?;
        Ok(AudioFrame::new(self.seq, data))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClosedPayload {
    pub guild_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Backend-reported failure, either answering a request or unsolicited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
}
