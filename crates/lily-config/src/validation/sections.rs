//! Validation for the remaining sections: platform, sessions, voice,
//! music, rate limiting, health, and discovery.

use crate::schema::LilyConfig;

use super::helpers::{validate_non_empty, validate_range};

pub(crate) fn validate_platform(errors: &mut Vec<String>, config: &LilyConfig) {
    let platform = &config.platform;
    validate_range(errors, "platform.port", platform.port, 1, u16::MAX);
    validate_range(errors, "platform.ack_timeout_secs", platform.ack_timeout_secs, 1, 120);
    validate_non_empty(errors, "platform.wake_phrase", &platform.wake_phrase);
    validate_non_empty(errors, "platform.goodbye_phrase", &platform.goodbye_phrase);
    validate_range(errors, "platform.message_limit", platform.message_limit, 100, 4000);
    if platform.reply_prefix.chars().count() + 1 >= platform.message_limit {
        errors.push("platform.reply_prefix does not fit in platform.message_limit".into());
    }
}

pub(crate) fn validate_sessions(errors: &mut Vec<String>, config: &LilyConfig) {
    let sessions = &config.sessions;
    validate_range(errors, "sessions.idle_timeout_secs", sessions.idle_timeout_secs, 1, 86_400);
    validate_range(errors, "sessions.sweep_interval_secs", sessions.sweep_interval_secs, 1, 3_600);
    validate_range(errors, "sessions.worker_idle_secs", sessions.worker_idle_secs, 1, 86_400);
}

pub(crate) fn validate_voice(errors: &mut Vec<String>, config: &LilyConfig) {
    let voice = &config.voice;
    validate_range(errors, "voice.frame_queue_capacity", voice.frame_queue_capacity, 1, 4096);
    validate_range(errors, "voice.join_timeout_secs", voice.join_timeout_secs, 1, 120);
    validate_range(errors, "voice.leave_grace_secs", voice.leave_grace_secs, 0, 60);
    validate_range(errors, "voice.frame_bytes", voice.frame_bytes, 2, 65_536);
    if voice.enabled {
        validate_non_empty(errors, "voice.encoder.program", &voice.encoder.program);
        validate_non_empty(errors, "voice.decoder.program", &voice.decoder.program);
    }
}

pub(crate) fn validate_music(errors: &mut Vec<String>, config: &LilyConfig) {
    let music = &config.music;
    if !music.enabled {
        return;
    }
    validate_range(errors, "music.max_queue", music.max_queue, 1, 500);
    validate_range(errors, "music.resolve_timeout_secs", music.resolve_timeout_secs, 1, 600);
    validate_range(errors, "music.idle_leave_secs", music.idle_leave_secs, 1, 86_400);
    validate_range(errors, "music.frame_bytes", music.frame_bytes, 2, 65_536);
    validate_non_empty(errors, "music.resolver.program", &music.resolver.program);
    validate_non_empty(errors, "music.player.program", &music.player.program);
    if !music.player.args.iter().any(|arg| arg.contains("{url}")) {
        errors.push("music.player.args must contain {url}".into());
    }
    if music.cookies_path.as_os_str().is_empty() {
        errors.push("music.cookies_path must not be empty".into());
    }
}

pub(crate) fn validate_rate_limit(errors: &mut Vec<String>, config: &LilyConfig) {
    let limit = &config.rate_limit;
    if limit.enabled {
        validate_range(errors, "rate_limit.requests_per_second", limit.requests_per_second, 1, 10_000);
        validate_range(errors, "rate_limit.burst", limit.burst, 1, 100_000);
    }
}

pub(crate) fn validate_health(errors: &mut Vec<String>, config: &LilyConfig) {
    validate_range(errors, "health.port", config.health.port, 1, u16::MAX);
    if config.health.port == config.platform.port
        && config.health.bind_address == config.platform.bind_address
    {
        errors.push(format!(
            "health.port and platform.port are both {}",
            config.health.port
        ));
    }
}

pub(crate) fn validate_discovery(errors: &mut Vec<String>, config: &LilyConfig) {
    let discovery = &config.discovery;
    if discovery.enabled || config.backend.discovery_service.is_some() {
        validate_non_empty(errors, "discovery.consul_address", &discovery.consul_address);
    }
    if discovery.enabled {
        validate_non_empty(errors, "discovery.service_name", &discovery.service_name);
        validate_range(
            errors,
            "discovery.retry_interval_secs",
            discovery.retry_interval_secs,
            1,
            3_600,
        );
    }
}
