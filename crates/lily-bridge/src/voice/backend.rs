//! The slice of the backend link a voice session needs.

use std::time::Duration;

use async_trait::async_trait;
use lily_common::{AudioFrame, BridgeError, TranslationError};

use crate::link::BackendLink;
use crate::platform::VoiceJoinRequest;
use crate::protocol::{EnvelopeKind, ErrorPayload, VoiceJoinAckPayload};
use crate::translator::{audio_frame_envelope, voice_join_envelope, voice_leave_envelope};

#[async_trait]
pub trait VoiceBackend: Send + Sync {
    /// Announce the session and wait for the backend to accept it.
    async fn join(&self, request: &VoiceJoinRequest, timeout: Duration)
        -> Result<(), BridgeError>;

    /// Forward one encoded frame. Never waits.
    fn send_frame(&self, guild_id: &str, frame: &AudioFrame) -> Result<(), BridgeError>;

    /// Tell the backend the session is over. Never waits.
    fn leave(&self, guild_id: &str) -> Result<(), BridgeError>;
}

#[async_trait]
impl VoiceBackend for BackendLink {
    async fn join(
        &self,
        request: &VoiceJoinRequest,
        timeout: Duration,
    ) -> Result<(), BridgeError> {
        let envelope = voice_join_envelope(request)?;
        let response = self.send(envelope).await?.with_timeout(timeout).wait().await?;
        match response.kind() {
            EnvelopeKind::VoiceJoinAck => {
                let ack: VoiceJoinAckPayload = response.payload_as()?;
                if ack.accepted {
                    Ok(())
                } else {
                    Err(BridgeError::Rejected(
                        ack.reason
                            .unwrap_or_else(|| "voice session refused".to_string()),
                    ))
                }
            }
            EnvelopeKind::Error => {
                let error: ErrorPayload = response.payload_as()?;
                Err(BridgeError::Rejected(error.message))
            }
            other => Err(TranslationError::UnexpectedKind(format!("{other:?}")).into()),
        }
    }

    fn send_frame(&self, guild_id: &str, frame: &AudioFrame) -> Result<(), BridgeError> {
        let envelope = audio_frame_envelope(guild_id, frame)?;
        self.send_oneway(envelope)?;
        Ok(())
    }

    fn leave(&self, guild_id: &str) -> Result<(), BridgeError> {
        let envelope = voice_leave_envelope(guild_id)?;
        self.send_oneway(envelope)?;
        Ok(())
    }
}
