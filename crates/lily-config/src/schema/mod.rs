//! Configuration schema types for the Lily adapter.
//!
//! All structs use `serde(default)` so partial configs work correctly.
//! Missing fields are filled with the defaults the adapter has always
//! shipped with.

mod backend;
mod music;
mod platform;
mod system;
mod voice;

pub use backend::*;
pub use music::*;
pub use platform::*;
pub use system::*;
pub use voice::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration for the adapter.
///
/// Only override what you want to change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct LilyConfig {
    pub backend: BackendConfig,
    pub platform: PlatformConfig,
    pub sessions: SessionsConfig,
    pub voice: VoiceConfig,
    pub music: MusicConfig,
    pub rate_limit: RateLimitConfig,
    pub health: HealthConfig,
    pub discovery: DiscoveryConfig,
    pub logging: LoggingConfig,
}
