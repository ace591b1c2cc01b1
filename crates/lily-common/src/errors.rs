use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Transport-level failures of the backend WebSocket link.
///
/// All of these are recoverable: the link reconnects on its own and callers
/// decide whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("backend link is down")]
    LinkDown,

    #[error("backend request timed out")]
    Timeout,

    #[error("backend link lost while the request was in flight")]
    LinkLost,

    #[error("backend outbound queue is full")]
    Backpressure,

    #[error("backend protocol error: {0}")]
    Protocol(String),

    #[error("backend endpoint resolution failed: {0}")]
    Resolve(String),
}

/// A platform event or backend envelope that could not be translated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("message has no text and no usable attachments")]
    EmptyMessage,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unexpected envelope kind: {0}")]
    UnexpectedKind(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("platform client is not connected")]
    NotConnected,

    #[error("platform did not answer {0} in time")]
    Timeout(String),

    #[error("platform rejected the request: {0}")]
    Rejected(String),

    #[error("platform voice connection closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscoderError {
    #[error("failed to spawn transcoder: {0}")]
    Spawn(String),

    #[error("transcoder io error: {0}")]
    Io(String),

    #[error("transcoder exited: {0}")]
    Exited(String),
}

/// Failures looking up or streaming a music track.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MusicError {
    #[error("track lookup failed: {0}")]
    Resolve(String),

    #[error("the source requires sign-in")]
    SignInRequired,

    #[error("track lookup timed out")]
    Timeout,

    #[error("failed to start playback: {0}")]
    Player(String),

    #[error("the music queue is full")]
    QueueFull,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("a voice session is already active for guild {guild_id}")]
    AlreadyActive { guild_id: String },

    #[error("no voice session for guild {guild_id}")]
    NoVoiceSession { guild_id: String },

    #[error("transcoder failure: {0}")]
    TranscoderFailure(String),

    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("rate limit exceeded for user {user_id}")]
    RateLimited { user_id: String },

    #[error("voice support is disabled")]
    VoiceDisabled,

    #[error("bridge is disabled")]
    Disabled,
}

impl From<TranscoderError> for BridgeError {
    fn from(err: TranscoderError) -> Self {
        BridgeError::TranscoderFailure(err.to_string())
    }
}

impl BridgeError {
    /// Transport failures that the link recovers from on its own.
    pub fn is_transport(&self) -> bool {
        matches!(self, BridgeError::Link(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::FileNotFound(PathBuf::from("/tmp/missing.toml"));
        assert_eq!(err.to_string(), "config file not found: /tmp/missing.toml");

        let err = ConfigError::ParseError("unexpected token".into());
        assert_eq!(err.to_string(), "config parse error: unexpected token");

        let err = ConfigError::ValidationError("backend.url is empty".into());
        assert_eq!(
            err.to_string(),
            "config validation error: backend.url is empty"
        );
    }

    #[test]
    fn link_error_display() {
        assert_eq!(LinkError::LinkDown.to_string(), "backend link is down");
        assert_eq!(LinkError::Timeout.to_string(), "backend request timed out");
        assert_eq!(
            LinkError::LinkLost.to_string(),
            "backend link lost while the request was in flight"
        );
    }

    #[test]
    fn bridge_error_from_link() {
        let err: BridgeError = LinkError::LinkLost.into();
        assert!(matches!(err, BridgeError::Link(LinkError::LinkLost)));
        assert!(err.is_transport());
    }

    #[test]
    fn bridge_error_from_translation() {
        let err: BridgeError = TranslationError::MissingField("channel_id").into();
        assert!(matches!(err, BridgeError::Translation(_)));
        assert!(!err.is_transport());
        assert!(err.to_string().contains("channel_id"));
    }

    #[test]
    fn bridge_error_from_transcoder() {
        let err: BridgeError = TranscoderError::Exited("signal 9".into()).into();
        assert!(matches!(err, BridgeError::TranscoderFailure(_)));
        assert_eq!(
            err.to_string(),
            "transcoder failure: transcoder exited: signal 9"
        );
    }

    #[test]
    fn music_error_display() {
        assert_eq!(MusicError::SignInRequired.to_string(), "the source requires sign-in");
        assert_eq!(
            MusicError::Resolve("HTTP 404".into()).to_string(),
            "track lookup failed: HTTP 404"
        );
    }

    #[test]
    fn already_active_names_guild() {
        let err = BridgeError::AlreadyActive {
            guild_id: "42".into(),
        };
        assert_eq!(
            err.to_string(),
            "a voice session is already active for guild 42"
        );
    }
}
