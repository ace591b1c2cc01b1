mod audio;
mod key;

pub use audio::AudioFrame;
pub use key::{GuildSessionKey, DIRECT_MESSAGE_GUILD};
