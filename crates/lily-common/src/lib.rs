//! Types shared by the Lily adapter crates: the error taxonomy, ids, and the
//! session key and audio frame types that cross crate boundaries.

pub mod errors;
pub mod id;
pub mod types;

pub use errors::{
    BridgeError, ConfigError, LinkError, MusicError, PlatformError, TranscoderError,
    TranslationError,
};
pub use id::{new_correlation_id, new_id, RequestId};
pub use types::{AudioFrame, GuildSessionKey, DIRECT_MESSAGE_GUILD};

pub type Result<T> = std::result::Result<T, BridgeError>;
