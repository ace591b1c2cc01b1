//! Pure translation between platform events and backend envelopes.
//!
//! Nothing here touches the network or shared state: callers pass in the
//! bits of context a decision needs (is a conversation open?) and apply
//! the outcome themselves.

mod inbound;
mod outbound;
mod phrases;
mod reply;

pub use inbound::{
    audio_frame_envelope, translate_text, voice_join_envelope, voice_leave_envelope, Translated,
};
pub use outbound::{backend_event_action, response_action, PlatformAction, ReplyTarget};
pub use phrases::{Phrases, TextRoute};
pub use reply::{format_reply, split_message, ReplyStyle};
