//! Voice sessions: one per guild, piping audio between the platform voice
//! connection and the backend through a transcoder.
//!
//! A session runs as its own task. The bridge keeps a
//! [`VoiceSessionHandle`] in the registry to ask it to leave, feed it
//! backend audio and read its state.

mod backend;
mod queue;
mod session;
mod types;


pub use backend::VoiceBackend;
pub use queue::FrameQueue;
pub use session::{VoiceDeps, VoiceSession, VoiceSessionHandle};
pub use types::{LeaveReason, VoiceNotice, VoiceSettings, VoiceState, VoiceStats};
