//! Bridge between a chat platform and the Lily backend.
//!
//! Platform events are translated into backend envelopes and sent over one
//! persistent WebSocket link; backend frames are translated back into
//! platform actions. Voice channels get a dedicated session that pipes
//! audio through an external transcoder. Music requests get a per-guild
//! player that streams tracks into the voice channel.

pub mod bridge;
pub mod link;
pub mod music;
pub mod platform;
pub mod protocol;
pub mod registry;
pub mod transcoder;
pub mod translator;
pub mod voice;

#[cfg(test)]
pub(crate) mod test_support;

pub use bridge::{Bridge, BridgeSettings, BridgeStats, RunOutcome};
pub use link::{BackendLink, EndpointResolver, LinkConfig, LinkEvent, LinkState, StaticEndpoint};
pub use music::{MusicService, MusicSettings};
pub use platform::{PlatformClient, PlatformEvent, VoiceConnection};
pub use registry::SessionRegistry;
pub use transcoder::{ProcessTranscoder, Transcoder};
