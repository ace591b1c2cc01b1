//! Backend envelopes to platform actions.

use lily_common::{AudioFrame, TranslationError};
use tracing::debug;

use crate::protocol::{
    AudioFramePayload, Envelope, EnvelopeKind, ErrorPayload, SessionClosedPayload,
    TextMessagePayload, TextResponsePayload,
};

/// Where a reply should be posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    Channel(String),
    /// The text channel that started the guild's voice session.
    VoiceSession(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformAction {
    SendText {
        target: ReplyTarget,
        text: String,
    },
    PlayAudio {
        guild_id: String,
        frame: AudioFrame,
    },
    VoiceSessionClosed {
        guild_id: String,
        reason: Option<String>,
    },
    ErrorNotice {
        target: Option<ReplyTarget>,
        message: String,
    },
    Ignore,
}

fn target_of(guild_id: Option<&str>, channel_id: Option<&str>) -> Option<ReplyTarget> {
    let non_empty = |s: &&str| !s.trim().is_empty();
    match (channel_id.filter(non_empty), guild_id.filter(non_empty)) {
        (Some(channel), _) => Some(ReplyTarget::Channel(channel.to_string())),
        (None, Some(guild)) => Some(ReplyTarget::VoiceSession(guild.to_string())),
        (None, None) => None,
    }
}

/// Action for a frame the backend sent on its own initiative.
pub fn backend_event_action(envelope: &Envelope) -> Result<PlatformAction, TranslationError> {
    match envelope.kind() {
        EnvelopeKind::TextMessage => {
            let payload: TextMessagePayload = envelope.payload_as()?;
            let target = target_of(payload.guild_id.as_deref(), payload.channel_id.as_deref())
                .ok_or(TranslationError::MissingField("channel_id"))?;
            if payload.text.trim().is_empty() {
                return Ok(PlatformAction::Ignore);
            }
            Ok(PlatformAction::SendText {
                target,
                text: payload.text,
            })
        }
        EnvelopeKind::AudioFrame => {
            let payload: AudioFramePayload = envelope.payload_as()?;
            let frame = payload.decode()?;
            Ok(PlatformAction::PlayAudio {
                guild_id: payload.guild_id,
                frame,
            })
        }
        EnvelopeKind::SessionClosed => {
            let payload: SessionClosedPayload = envelope.payload_as()?;
            Ok(PlatformAction::VoiceSessionClosed {
                guild_id: payload.guild_id,
                reason: payload.reason,
            })
        }
        EnvelopeKind::Error => {
            let payload: ErrorPayload = envelope.payload_as()?;
            Ok(PlatformAction::ErrorNotice {
                target: target_of(payload.guild_id.as_deref(), payload.channel_id.as_deref()),
                message: payload.message,
            })
        }
        EnvelopeKind::TextResponse | EnvelopeKind::VoiceJoinAck => {
            // Responses are matched by the link; one reaching here is stale.
            debug!(id = %envelope.id(), kind = ?envelope.kind(), "response without a waiter");
            Ok(PlatformAction::Ignore)
        }
        kind => {
            debug!(id = %envelope.id(), kind = ?kind, "ignoring backend frame");
            Ok(PlatformAction::Ignore)
        }
    }
}

/// Action for the response to a text request sent from `reply_channel`.
pub fn response_action(
    response: &Envelope,
    reply_channel: &str,
) -> Result<PlatformAction, TranslationError> {
    let target = ReplyTarget::Channel(reply_channel.to_string());
    match response.kind() {
        EnvelopeKind::TextResponse => {
            let payload: TextResponsePayload = response.payload_as()?;
            if payload.text.trim().is_empty() {
                return Ok(PlatformAction::Ignore);
            }
            Ok(PlatformAction::SendText {
                target,
                text: payload.text,
            })
        }
        EnvelopeKind::Error => {
            let payload: ErrorPayload = response.payload_as()?;
            Ok(PlatformAction::ErrorNotice {
                target: Some(target),
                message: payload.message,
            })
        }
        other => Err(TranslationError::UnexpectedKind(format!("{other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(kind: EnvelopeKind, payload: serde_json::Value) -> Envelope {
        Envelope::new(kind, payload)
    }

    #[test]
    fn text_message_to_channel() {
        let action = backend_event_action(&env(
            EnvelopeKind::TextMessage,
            json!({"channel_id": "c1", "text": "reminder!"}),
        ))
        .unwrap();
        assert_eq!(
            action,
            PlatformAction::SendText {
                target: ReplyTarget::Channel("c1".into()),
                text: "reminder!".into()
            }
        );
    }

    #[test]
    fn text_message_with_only_guild_goes_to_voice_session_channel() {
        let action = backend_event_action(&env(
            EnvelopeKind::TextMessage,
            json!({"guild_id": "g1", "text": "transcript"}),
        ))
        .unwrap();
        assert!(matches!(
            action,
            PlatformAction::SendText { target: ReplyTarget::VoiceSession(ref g), .. } if g == "g1"
        ));
    }

    #[test]
    fn text_message_without_destination_is_an_error() {
        let err = backend_event_action(&env(EnvelopeKind::TextMessage, json!({"text": "lost"})))
            .unwrap_err();
        assert_eq!(err, TranslationError::MissingField("channel_id"));
    }

    #[test]
    fn audio_frame_decodes() {
        let action = backend_event_action(&env(
            EnvelopeKind::AudioFrame,
            json!({"guild_id": "g1", "seq": 3, "data": "AQID"}),
        ))
        .unwrap();
        assert_eq!(
            action,
            PlatformAction::PlayAudio {
                guild_id: "g1".into(),
                frame: AudioFrame::new(3, vec![1, 2, 3])
            }
        );
    }

    #[test]
    fn session_closed_and_error() {
        let closed = backend_event_action(&env(
            EnvelopeKind::SessionClosed,
            json!({"guild_id": "g1", "reason": "idle"}),
        ))
        .unwrap();
        assert!(matches!(closed, PlatformAction::VoiceSessionClosed { reason: Some(_), .. }));

        let error = backend_event_action(&env(
            EnvelopeKind::Error,
            json!({"message": "overloaded"}),
        ))
        .unwrap();
        assert_eq!(
            error,
            PlatformAction::ErrorNotice {
                target: None,
                message: "overloaded".into()
            }
        );
    }

    #[test]
    fn unknown_kinds_are_ignored() {
        let envelope = Envelope::from_json(r#"{"id":"1","kind":"metrics","payload":{}}"#).unwrap();
        assert_eq!(backend_event_action(&envelope).unwrap(), PlatformAction::Ignore);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let err = backend_event_action(&env(EnvelopeKind::AudioFrame, json!({"seq": "x"})))
            .unwrap_err();
        assert!(matches!(err, TranslationError::InvalidPayload(_)));
    }

    #[test]
    fn response_to_channel() {
        let request = env(EnvelopeKind::TextRequest, json!({}));
        let response = request.reply(EnvelopeKind::TextResponse, json!({"text": "hi!"}));
        assert_eq!(
            response_action(&response, "c9").unwrap(),
            PlatformAction::SendText {
                target: ReplyTarget::Channel("c9".into()),
                text: "hi!".into()
            }
        );
    }

    #[test]
    fn empty_response_is_ignored() {
        let response = env(EnvelopeKind::TextResponse, json!({"text": ""}));
        assert_eq!(response_action(&response, "c9").unwrap(), PlatformAction::Ignore);
    }

    #[test]
    fn unexpected_response_kind() {
        let response = env(EnvelopeKind::VoiceJoinAck, json!({"guild_id": "g"}));
        assert!(matches!(
            response_action(&response, "c9"),
            Err(TranslationError::UnexpectedKind(_))
        ));
    }
}
