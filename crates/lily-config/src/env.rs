//! Environment variable overrides applied on top of the file config.
//!
//! The lookup is injected so tests never touch the process environment.

use tracing::{debug, warn};

use crate::schema::{LilyConfig, LogLevel};

pub const ENV_PORT: &str = "PORT";
pub const ENV_CONSUL_HTTP_ADDR: &str = "CONSUL_HTTP_ADDR";
pub const ENV_DOMAIN_NAME: &str = "DOMAIN_NAME";
pub const ENV_BACKEND_URL: &str = "LILY_BACKEND_URL";
pub const ENV_RATE_LIMIT_RPS: &str = "RATE_LIMIT_RPS";
pub const ENV_BURST_LIMIT: &str = "BURST_LIMIT";
pub const ENV_LOG: &str = "LILY_LOG";

/// Apply every recognised override. Unparseable numbers are logged and skipped.
pub fn apply_overrides<F>(config: &mut LilyConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = parse_var(&lookup, ENV_PORT) {
        config.health.port = port;
    }

    if let Some(addr) = non_empty(&lookup, ENV_CONSUL_HTTP_ADDR) {
        config.discovery.consul_address = addr;
        config.discovery.enabled = true;
    }

    if let Some(domain) = non_empty(&lookup, ENV_DOMAIN_NAME) {
        config.discovery.domain_name = Some(domain);
    }

    if let Some(url) = non_empty(&lookup, ENV_BACKEND_URL) {
        config.backend.url = url;
        config.backend.discovery_service = None;
    }

    if let Some(rps) = parse_var(&lookup, ENV_RATE_LIMIT_RPS) {
        config.rate_limit.requests_per_second = rps;
    }

    if let Some(burst) = parse_var(&lookup, ENV_BURST_LIMIT) {
        config.rate_limit.burst = burst;
    }

    if let Some(level) = non_empty(&lookup, ENV_LOG) {
        match parse_level(&level) {
            Some(level) => config.logging.level = level,
            None => warn!(value = %level, "ignoring unknown {ENV_LOG} level"),
        }
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = non_empty(lookup, key)?;
    match raw.parse() {
        Ok(value) => {
            debug!(key, "applied environment override");
            Some(value)
        }
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

fn parse_level(raw: &str) -> Option<LogLevel> {
    match raw.to_ascii_lowercase().as_str() {
        "trace" => Some(LogLevel::Trace),
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warn" | "warning" => Some(LogLevel::Warn),
        "error" => Some(LogLevel::Error),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn apply(vars: &[(&str, &str)]) -> LilyConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = LilyConfig::default();
        apply_overrides(&mut config, |key| vars.get(key).cloned());
        config
    }

    #[test]
    fn no_vars_leaves_defaults() {
        let config = apply(&[]);
        assert_eq!(config.health.port, 8004);
        assert!(!config.discovery.enabled);
    }

    #[test]
    fn port_overrides_health_port() {
        assert_eq!(apply(&[("PORT", "9000")]).health.port, 9000);
    }

    #[test]
    fn consul_addr_enables_discovery() {
        let config = apply(&[("CONSUL_HTTP_ADDR", "10.0.0.5:8500")]);
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.consul_address, "10.0.0.5:8500");
    }

    #[test]
    fn backend_url_clears_discovery_service() {
        let mut config = LilyConfig::default();
        config.backend.discovery_service = Some("lily-core".into());
        apply_overrides(&mut config, |key| {
            (key == ENV_BACKEND_URL).then(|| "ws://localhost:9999/ws".to_string())
        });
        assert_eq!(config.backend.url, "ws://localhost:9999/ws");
        assert!(config.backend.discovery_service.is_none());
    }

    #[test]
    fn rate_limit_overrides() {
        let config = apply(&[("RATE_LIMIT_RPS", "3"), ("BURST_LIMIT", "7")]);
        assert_eq!(config.rate_limit.requests_per_second, 3);
        assert_eq!(config.rate_limit.burst, 7);
    }

    #[test]
    fn unparseable_number_is_skipped() {
        let config = apply(&[("PORT", "not-a-port")]);
        assert_eq!(config.health.port, 8004);
    }

    #[test]
    fn log_level_accepts_warning_alias() {
        let config = apply(&[("LILY_LOG", "WARNING")]);
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn domain_name_sets_discovery_domain() {
        let config = apply(&[("DOMAIN_NAME", "example.org")]);
        assert_eq!(config.discovery.domain_name.as_deref(), Some("example.org"));
    }
}
