//! JSON messages exchanged with the platform client process.
//!
//! Every message is one text frame carrying a `type` tag. Audio travels as
//! base64 in `data`, the same encoding the backend link uses.

use lily_bridge::platform::{MusicRequest, TextMessage, VoiceJoinRequest, VoiceLeaveRequest};
use lily_bridge::protocol::AudioFramePayload;
use lily_common::{AudioFrame, TranslationError};
use serde::{Deserialize, Serialize};

/// Messages the platform client sends to the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    TextMessage(TextMessage),
    VoiceJoinRequest(VoiceJoinRequest),
    VoiceLeaveRequest(VoiceLeaveRequest),
    /// `/play`, `/skip` or `/stop`.
    MusicCommand(MusicRequest),
    /// The client joined the voice channel asked for by `join_voice`.
    VoiceReady { request_id: String },
    VoiceFailed { request_id: String, message: String },
    /// Captured audio from a joined voice channel.
    VoiceFrame { guild_id: String, data: String },
    /// The client lost the voice connection for a guild.
    VoiceClosed { guild_id: String },
    LeaveAck { request_id: String },
}

/// Commands the adapter sends to the platform client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    SendText {
        channel_id: String,
        text: String,
    },
    JoinVoice {
        request_id: String,
        guild_id: String,
        channel_id: String,
    },
    LeaveVoice {
        request_id: String,
        guild_id: String,
    },
    PlayFrame {
        guild_id: String,
        seq: u64,
        data: String,
    },
}

impl Outbound {
    pub fn play_frame(guild_id: &str, frame: &AudioFrame) -> Self {
        let payload = AudioFramePayload::encode(guild_id, frame);
        Outbound::PlayFrame {
            guild_id: payload.guild_id,
            seq: payload.seq,
            data: payload.data,
        }
    }
}

/// Decode captured audio, stamping it with the gateway's own sequence number.
pub fn decode_frame(guild_id: &str, seq: u64, data: String) -> Result<AudioFrame, TranslationError> {
    AudioFramePayload {
        guild_id: guild_id.to_string(),
        seq,
        data,
    }
    .decode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_text_message_is_flat() {
        let json = r#"{
            "type": "text_message",
            "guild_id": "g1",
            "channel_id": "c1",
            "user_id": "u1",
            "username": "ann",
            "content": "hey lily what's up"
        }"#;
        let Inbound::TextMessage(msg) = serde_json::from_str(json).unwrap() else {
            panic!("expected text_message");
        };
        assert_eq!(msg.guild_id.as_deref(), Some("g1"));
        assert_eq!(msg.content, "hey lily what's up");
        assert!(msg.attachments.is_empty());
        assert!(!msg.from_bot);
    }

    #[test]
    fn inbound_acks() {
        let ready: Inbound = serde_json::from_str(r#"{"type":"voice_ready","request_id":"r1"}"#).unwrap();
        assert_eq!(ready, Inbound::VoiceReady { request_id: "r1".into() });

        let failed: Inbound = serde_json::from_str(
            r#"{"type":"voice_failed","request_id":"r2","message":"missing permissions"}"#,
        )
        .unwrap();
        assert!(matches!(failed, Inbound::VoiceFailed { ref message, .. } if message == "missing permissions"));
    }

    #[test]
    fn inbound_music_commands() {
        let play: Inbound = serde_json::from_str(
            r#"{"type":"music_command","action":"play","query":"lofi beats",
                "guild_id":"g1","voice_channel_id":"v1","user_id":"u1","reply_channel_id":"c1"}"#,
        )
        .unwrap();
        let Inbound::MusicCommand(req) = play else {
            panic!("expected music_command");
        };
        assert_eq!(
            req.action,
            lily_bridge::platform::MusicAction::Play {
                query: "lofi beats".into()
            }
        );
        assert_eq!(req.voice_channel_id.as_deref(), Some("v1"));

        let skip: Inbound = serde_json::from_str(
            r#"{"type":"music_command","action":"skip","guild_id":"g1","user_id":"u1","reply_channel_id":"c1"}"#,
        )
        .unwrap();
        assert!(matches!(
            skip,
            Inbound::MusicCommand(ref r) if r.action == lily_bridge::platform::MusicAction::Skip
        ));
        assert!(serde_json::from_str::<Inbound>(
            r#"{"type":"music_command","action":"rewind","guild_id":"g1","user_id":"u1","reply_channel_id":"c1"}"#,
        )
        .is_err());
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(serde_json::from_str::<Inbound>(r#"{"type":"typing","channel_id":"c1"}"#).is_err());
    }

    #[test]
    fn outbound_tags_are_snake_case() {
        let json = serde_json::to_value(Outbound::JoinVoice {
            request_id: "r1".into(),
            guild_id: "g1".into(),
            channel_id: "v1".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "join_voice");
        assert_eq!(json["channel_id"], "v1");
    }

    #[test]
    fn play_frame_carries_base64() {
        let out = Outbound::play_frame("g1", &AudioFrame::new(7, vec![1, 2, 3]));
        assert_eq!(
            out,
            Outbound::PlayFrame {
                guild_id: "g1".into(),
                seq: 7,
                data: "AQID".into(),
            }
        );
        let frame = decode_frame("g1", 0, "AQID".into()).unwrap();
        assert_eq!(frame.data, vec![1, 2, 3]);
        assert!(decode_frame("g1", 1, "not base64!".into()).is_err());
    }
}
