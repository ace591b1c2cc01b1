//! Tests for the full validation pipeline.

use super::*;

fn error_for(config: &LilyConfig) -> String {
    validate(config).unwrap_err().to_string()
}

#[test]
fn default_config_validates() {
    assert!(validate(&LilyConfig::default()).is_ok());
}

#[test]
fn requires_url_or_discovery_service() {
    let mut config = LilyConfig::default();
    config.backend.url = String::new();
    assert!(error_for(&config).contains("backend.url or backend.discovery_service"));

    config.backend.discovery_service = Some("lily-core".into());
    assert!(validate(&config).is_ok());
}

#[test]
fn rejects_non_websocket_url() {
    let mut config = LilyConfig::default();
    config.backend.url = "http://lily-core:8000".into();
    assert!(error_for(&config).contains("ws://"));
}

#[test]
fn heartbeat_timeout_must_exceed_interval() {
    let mut config = LilyConfig::default();
    config.backend.heartbeat_interval_ms = 10_000;
    config.backend.heartbeat_timeout_ms = 10_000;
    assert!(error_for(&config).contains("backend.heartbeat_timeout_ms"));
}

#[test]
fn backoff_max_must_not_be_below_base() {
    let mut config = LilyConfig::default();
    config.backend.reconnect_base_ms = 5_000;
    config.backend.reconnect_max_ms = 1_000;
    assert!(error_for(&config).contains("backend.reconnect_max_ms"));
}

#[test]
fn catches_jitter_out_of_range() {
    let mut config = LilyConfig::default();
    config.backend.reconnect_jitter = 1.5;
    assert!(error_for(&config).contains("backend.reconnect_jitter"));
}

#[test]
fn catches_zero_reconnect_cap() {
    let mut config = LilyConfig::default();
    config.backend.max_reconnect_attempts = Some(0);
    assert!(error_for(&config).contains("max_reconnect_attempts"));
}

#[test]
fn catches_message_limit_out_of_range() {
    let mut config = LilyConfig::default();
    config.platform.message_limit = 50;
    assert!(error_for(&config).contains("platform.message_limit"));
}

#[test]
fn catches_empty_wake_phrase() {
    let mut config = LilyConfig::default();
    config.platform.wake_phrase = "  ".into();
    assert!(error_for(&config).contains("platform.wake_phrase"));
}

#[test]
fn catches_zero_queue_capacity() {
    let mut config = LilyConfig::default();
    config.voice.frame_queue_capacity = 0;
    assert!(error_for(&config).contains("voice.frame_queue_capacity"));
}

#[test]
fn disabled_voice_skips_program_checks() {
    let mut config = LilyConfig::default();
    config.voice.enabled = false;
    config.voice.encoder.program = String::new();
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_port_clash() {
    let mut config = LilyConfig::default();
    config.platform.bind_address = config.health.bind_address.clone();
    config.platform.port = config.health.port;
    assert!(error_for(&config).contains("health.port and platform.port"));
}

#[test]
fn disabled_rate_limit_skips_checks() {
    let mut config = LilyConfig::default();
    config.rate_limit.enabled = false;
    config.rate_limit.requests_per_second = 0;
    assert!(validate(&config).is_ok());
}

#[test]
fn collects_multiple_errors() {
    let mut config = LilyConfig::default();
    config.backend.request_timeout_secs = 0;
    config.voice.frame_queue_capacity = 0;
    config.sessions.idle_timeout_secs = 0;
    let err = error_for(&config);
    assert!(err.contains("backend.request_timeout_secs"));
    assert!(err.contains("voice.frame_queue_capacity"));
    assert!(err.contains("sessions.idle_timeout_secs"));
}

#[test]
fn music_player_needs_url_placeholder() {
    let mut config = LilyConfig::default();
    config.music.player.args = vec!["-i".into(), "pipe:0".into()];
    assert!(error_for(&config).contains("music.player.args"));

    config.music.enabled = false;
    assert!(validate(&config).is_ok());
}

#[test]
fn music_queue_bounds() {
    let mut config = LilyConfig::default();
    config.music.max_queue = 0;
    assert!(error_for(&config).contains("music.max_queue"));
}
