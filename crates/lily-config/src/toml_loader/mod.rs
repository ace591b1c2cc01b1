//! Reading the adapter's TOML file.
//!
//! Parsing only fills in serde defaults. Range checks happen in
//! [`crate::validation`] after environment overrides, so a value fixed by
//! the environment never fails because of what the file said.

mod template;


use std::path::{Path, PathBuf};

use lily_common::ConfigError;
use tracing::info;

use crate::schema::LilyConfig;

/// `<config_dir>/lily/adapter.toml`, e.g. `~/.config/lily/adapter.toml` on Linux.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("lily").join("adapter.toml"))
        .ok_or_else(|| ConfigError::ParseError("could not determine config directory".into()))
}

pub fn load_from_path(path: &Path) -> Result<LilyConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        Err(e) => {
            return Err(ConfigError::ParseError(format!(
                "failed to read {}: {e}",
                path.display()
            )));
        }
    };
    let config = toml::from_str(&content).map_err(|e| {
        ConfigError::ParseError(format!("{} is not valid config: {e}", path.display()))
    })?;
    info!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Load the default file, writing a commented template there on first run.
pub fn load_default() -> Result<LilyConfig, ConfigError> {
    let path = default_config_path()?;
    match load_from_path(&path) {
        Err(ConfigError::FileNotFound(_)) => {
            create_default_config(&path)?;
            Ok(LilyConfig::default())
        }
        other => other,
    }
}

pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    let write_err = |e: std::io::Error| {
        ConfigError::ParseError(format!("failed to write {}: {e}", path.display()))
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(write_err)?;
    }
    std::fs::write(path, template::default_config_toml()).map_err(write_err)?;
    info!(path = %path.display(), "wrote default config");
    Ok(())
}
