//! Lily adapter configuration.
//!
//! TOML file with a section per concern, environment overrides for the
//! container deployment, and full validation. All sections use defaults
//! so partial configs work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use lily_config::{load_config, config_to_json};
//!
//! let config = load_config(None).expect("failed to load config");
//! println!("{}", config_to_json(&config));
//! ```

pub mod env;
pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{LilyConfig, CONFIG_SCHEMA_VERSION};

use std::path::Path;

use lily_common::ConfigError;

/// Load, override and validate the adapter config.
///
/// With `path` set, the file must exist. Without it the platform default
/// path is used and created on first run. Environment overrides are applied
/// from the process environment before validation.
pub fn load_config(path: Option<&Path>) -> Result<LilyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => toml_loader::load_from_path(path)?,
        None => toml_loader::load_default()?,
    };
    env::apply_overrides(&mut config, |key| std::env::var(key).ok());
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &LilyConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
