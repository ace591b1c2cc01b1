//! Platform events to backend request envelopes.

use lily_common::{AudioFrame, TranslationError, DIRECT_MESSAGE_GUILD};

use super::phrases::{Phrases, TextRoute};
use crate::platform::{TextMessage, VoiceJoinRequest};
use crate::protocol::{
    AttachmentRef, AudioFramePayload, Envelope, EnvelopeKind, TextIntent, TextRequestPayload,
    VoiceJoinPayload, VoiceLeavePayload,
};

/// Outcome of translating one text message.
#[derive(Debug, Clone, PartialEq)]
pub enum Translated {
    Request {
        envelope: Envelope,
        intent: TextIntent,
    },
    /// Not in a conversation but looked like a wake attempt.
    Hint,
    Ignored,
}

fn require<'a>(value: &'a str, field: &'static str) -> Result<&'a str, TranslationError> {
    if value.trim().is_empty() {
        Err(TranslationError::MissingField(field))
    } else {
        Ok(value)
    }
}

/// Translate a text message given whether its author has a conversation
/// open in this channel.
pub fn translate_text(
    msg: &TextMessage,
    conversation_open: bool,
    phrases: &Phrases,
) -> Result<Translated, TranslationError> {
    if msg.from_bot {
        return Ok(Translated::Ignored);
    }
    require(&msg.channel_id, "channel_id")?;
    require(&msg.user_id, "user_id")?;
    if msg.guild_id.as_deref().is_some_and(|g| g.trim().is_empty()) {
        return Err(TranslationError::MissingField("guild_id"));
    }

    let (intent, text, attachments) = match phrases.classify(&msg.content, conversation_open) {
        TextRoute::Start(rest) => (TextIntent::SessionStart, rest, Vec::new()),
        TextRoute::End => (TextIntent::SessionEnd, String::new(), Vec::new()),
        TextRoute::NoActive => (TextIntent::SessionNoActive, String::new(), Vec::new()),
        TextRoute::Message => {
            let attachments = audio_attachments(msg)?;
            (TextIntent::Message, msg.content.trim().to_string(), attachments)
        }
        TextRoute::Hint => return Ok(Translated::Hint),
        TextRoute::Ignore => return Ok(Translated::Ignored),
    };

    let payload = TextRequestPayload {
        intent,
        user_id: msg.user_id.clone(),
        username: msg.username.clone(),
        guild_id: msg
            .guild_id
            .clone()
            .unwrap_or_else(|| DIRECT_MESSAGE_GUILD.to_string()),
        channel_id: msg.channel_id.clone(),
        text,
        attachments,
    };
    let envelope = Envelope::from_payload(EnvelopeKind::TextRequest, &payload)?;
    Ok(Translated::Request { envelope, intent })
}

/// Audio attachments of an in-conversation message. Rejects messages with
/// nothing usable: no text and no audio.
fn audio_attachments(msg: &TextMessage) -> Result<Vec<AttachmentRef>, TranslationError> {
    let audio: Vec<AttachmentRef> = msg
        .attachments
        .iter()
        .filter(|a| a.is_audio())
        .map(|a| AttachmentRef {
            kind: "audio".into(),
            url: a.url.clone(),
            filename: a.filename.clone(),
        })
        .collect();

    if msg.content.trim().is_empty() && audio.is_empty() {
        return Err(if msg.attachments.is_empty() {
            TranslationError::EmptyMessage
        } else {
            TranslationError::InvalidPayload("only unsupported attachments".into())
        });
    }
    Ok(audio)
}

pub fn voice_join_envelope(req: &VoiceJoinRequest) -> Result<Envelope, TranslationError> {
    let payload = VoiceJoinPayload {
        guild_id: require(&req.guild_id, "guild_id")?.to_string(),
        channel_id: require(&req.channel_id, "channel_id")?.to_string(),
        user_id: require(&req.user_id, "user_id")?.to_string(),
    };
    Envelope::from_payload(EnvelopeKind::VoiceJoin, &payload)
}

pub fn voice_leave_envelope(guild_id: &str) -> Result<Envelope, TranslationError> {
    let payload = VoiceLeavePayload {
        guild_id: require(guild_id, "guild_id")?.to_string(),
    };
    Envelope::from_payload(EnvelopeKind::VoiceLeave, &payload)
}

pub fn audio_frame_envelope(
    guild_id: &str,
    frame: &AudioFrame,
) -> Result<Envelope, TranslationError> {
    let payload = AudioFramePayload::encode(require(guild_id, "guild_id")?, frame);
    Envelope::from_payload(EnvelopeKind::AudioFrame, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Attachment;

    fn message(content: &str) -> TextMessage {
        TextMessage {
            guild_id: Some("g1".into()),
            channel_id: "c1".into(),
            user_id: "u1".into(),
            username: "ann".into(),
            content: content.into(),
            attachments: vec![],
            from_bot: false,
        }
    }

    fn request(result: Result<Translated, TranslationError>) -> (TextRequestPayload, TextIntent) {
        match result.unwrap() {
            Translated::Request { envelope, intent } => {
                assert_eq!(envelope.kind(), EnvelopeKind::TextRequest);
                (envelope.payload_as().unwrap(), intent)
            }
            other => panic!("expected a request, got {other:?}"),
        }
    }

    #[test]
    fn wake_phrase_starts_session() {
        let (payload, intent) =
            request(translate_text(&message("hey lily tell me a joke"), false, &Phrases::default()));
        assert_eq!(intent, TextIntent::SessionStart);
        assert_eq!(payload.text, "tell me a joke");
        assert_eq!(payload.guild_id, "g1");
        assert_eq!(payload.username, "ann");
    }

    #[test]
    fn message_in_conversation_is_forwarded() {
        let (payload, intent) =
            request(translate_text(&message("and another"), true, &Phrases::default()));
        assert_eq!(intent, TextIntent::Message);
        assert_eq!(payload.text, "and another");
    }

    #[test]
    fn goodbye_without_conversation_asks_backend() {
        let (_, intent) = request(translate_text(&message("goodbye lily"), false, &Phrases::default()));
        assert_eq!(intent, TextIntent::SessionNoActive);
    }

    #[test]
    fn chatter_outside_conversation_is_ignored_or_hinted() {
        let phrases = Phrases::default();
        assert_eq!(
            translate_text(&message("what's up"), false, &phrases).unwrap(),
            Translated::Ignored
        );
        assert_eq!(
            translate_text(&message("hey you"), false, &phrases).unwrap(),
            Translated::Hint
        );
    }

    #[test]
    fn bot_messages_are_ignored() {
        let mut msg = message("hey lily");
        msg.from_bot = true;
        assert_eq!(
            translate_text(&msg, false, &Phrases::default()).unwrap(),
            Translated::Ignored
        );
    }

    #[test]
    fn empty_ids_are_rejected() {
        let mut msg = message("hey lily");
        msg.user_id = String::new();
        assert_eq!(
            translate_text(&msg, false, &Phrases::default()).unwrap_err(),
            TranslationError::MissingField("user_id")
        );
    }

    #[test]
    fn empty_message_in_conversation_is_rejected() {
        assert_eq!(
            translate_text(&message("   "), true, &Phrases::default()).unwrap_err(),
            TranslationError::EmptyMessage
        );
    }

    #[test]
    fn attachment_only_messages() {
        let mut msg = message("");
        msg.attachments.push(Attachment {
            filename: "photo.png".into(),
            url: "https://cdn.example/photo.png".into(),
            content_type: None,
        });
        assert!(matches!(
            translate_text(&msg, true, &Phrases::default()),
            Err(TranslationError::InvalidPayload(_))
        ));

        msg.attachments.push(Attachment {
            filename: "memo.wav".into(),
            url: "https://cdn.example/memo.wav".into(),
            content_type: None,
        });
        let (payload, _) = request(translate_text(&msg, true, &Phrases::default()));
        assert_eq!(payload.attachments.len(), 1);
        assert_eq!(payload.attachments[0].filename, "memo.wav");
        assert_eq!(payload.attachments[0].kind, "audio");
    }

    #[test]
    fn direct_messages_use_placeholder_guild() {
        let mut msg = message("hey lily");
        msg.guild_id = None;
        let (payload, _) = request(translate_text(&msg, false, &Phrases::default()));
        assert_eq!(payload.guild_id, "@me");
    }

    #[test]
    fn voice_join_requires_channel() {
        let req = VoiceJoinRequest {
            guild_id: "g1".into(),
            channel_id: "".into(),
            user_id: "u1".into(),
            reply_channel_id: None,
        };
        assert_eq!(
            voice_join_envelope(&req).unwrap_err(),
            TranslationError::MissingField("channel_id")
        );
    }

    #[test]
    fn audio_frame_envelope_carries_sequence() {
        let env = audio_frame_envelope("g1", &AudioFrame::new(42, vec![1, 2, 3])).unwrap();
        let payload: AudioFramePayload = env.payload_as().unwrap();
        assert_eq!(payload.seq, 42);
        assert_eq!(payload.guild_id, "g1");
    }
}
