//! Full configuration validation.
//!
//! Each section has its own validator; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod backend;
mod helpers;
mod sections;

#[cfg(test)]
mod tests;

use crate::schema::LilyConfig;
use lily_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &LilyConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    backend::validate_backend(&mut errors, config);
    sections::validate_platform(&mut errors, config);
    sections::validate_sessions(&mut errors, config);
    sections::validate_voice(&mut errors, config);
    sections::validate_music(&mut errors, config);
    sections::validate_rate_limit(&mut errors, config);
    sections::validate_health(&mut errors, config);
    sections::validate_discovery(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
