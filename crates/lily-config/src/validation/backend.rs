//! Validation for the backend link section.

use crate::schema::LilyConfig;

use super::helpers::validate_range;

pub(crate) fn validate_backend(errors: &mut Vec<String>, config: &LilyConfig) {
    let backend = &config.backend;

    let has_service = backend
        .discovery_service
        .as_deref()
        .is_some_and(|s| !s.trim().is_empty());
    if !has_service {
        let url = backend.url.trim();
        if url.is_empty() {
            errors.push("backend.url or backend.discovery_service must be set".into());
        } else if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            errors.push(format!("backend.url = {url} must use ws:// or wss://"));
        }
    }

    validate_range(errors, "backend.connect_timeout_secs", backend.connect_timeout_secs, 1, 120);
    validate_range(errors, "backend.request_timeout_secs", backend.request_timeout_secs, 1, 600);
    validate_range(
        errors,
        "backend.heartbeat_interval_ms",
        backend.heartbeat_interval_ms,
        100,
        300_000,
    );
    if backend.heartbeat_timeout_ms <= backend.heartbeat_interval_ms {
        errors.push(format!(
            "backend.heartbeat_timeout_ms = {} must exceed heartbeat_interval_ms = {}",
            backend.heartbeat_timeout_ms, backend.heartbeat_interval_ms
        ));
    }

    validate_range(errors, "backend.reconnect_base_ms", backend.reconnect_base_ms, 10, 600_000);
    if backend.reconnect_max_ms < backend.reconnect_base_ms {
        errors.push(format!(
            "backend.reconnect_max_ms = {} must be >= reconnect_base_ms = {}",
            backend.reconnect_max_ms, backend.reconnect_base_ms
        ));
    }
    validate_range(errors, "backend.reconnect_jitter", backend.reconnect_jitter, 0.0, 1.0);
    if backend.max_reconnect_attempts == Some(0) {
        errors.push("backend.max_reconnect_attempts must be at least 1 when set".into());
    }
    validate_range(errors, "backend.outbound_queue", backend.outbound_queue, 1, 65_536);
}
