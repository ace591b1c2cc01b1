//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Lily Discord adapter configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.
# Environment overrides: PORT, CONSUL_HTTP_ADDR, DOMAIN_NAME,
# LILY_BACKEND_URL, RATE_LIMIT_RPS, BURST_LIMIT, LILY_LOG

[backend]
# url = "ws://lily-core:8000/ws"
# discovery_service = "lily-core"   # resolve the url through Consul instead
# discovery_tag = "websocket"
# connect_timeout_secs = 15          # 1-120
# request_timeout_secs = 30          # 1-600
# heartbeat_interval_ms = 15000
# heartbeat_timeout_ms = 45000       # must exceed heartbeat_interval_ms
# reconnect_base_ms = 1000
# reconnect_max_ms = 30000
# reconnect_jitter = 0.2             # 0.0-1.0
# max_reconnect_attempts = 20        # unset = retry forever
# outbound_queue = 256

[platform]
# bind_address = "127.0.0.1"
# port = 8005
# ack_timeout_secs = 10
# wake_phrase = "hey lily"
# goodbye_phrase = "goodbye lily"
# reply_prefix = "**Lily:**"
# message_limit = 2000               # 100-4000

[sessions]
# idle_timeout_secs = 1800
# sweep_interval_secs = 60
# worker_idle_secs = 300

[voice]
# enabled = true
# frame_queue_capacity = 64          # 1-4096
# join_timeout_secs = 10
# leave_grace_secs = 3
# frame_bytes = 640

# [voice.encoder]
# program = "ffmpeg"
# args = ["-f", "s16le", "-ar", "48000", "-ac", "2", "-i", "pipe:0", "-f", "s16le", "-ar", "16000", "-ac", "1", "pipe:1"]

# [voice.decoder]
# program = "ffmpeg"
# args = ["-f", "s16le", "-ar", "16000", "-ac", "1", "-i", "pipe:0", "-f", "s16le", "-ar", "48000", "-ac", "2", "pipe:1"]

[music]
# enabled = true
# max_queue = 50                     # 1-500
# resolve_timeout_secs = 30
# idle_leave_secs = 300
# frame_bytes = 3840
# cookies_path = "/app/data/cookies.txt"

# [music.resolver]
# program = "yt-dlp"
# args = ["--no-playlist", "--quiet", "--no-warnings", "--default-search", "auto", "--dump-single-json", "-f", "bestaudio/best"]

# [music.player]
# program = "ffmpeg"
# args = ["-hide_banner", "-loglevel", "error", "-re", "-reconnect", "1", "-reconnect_streamed", "1", "-reconnect_delay_max", "5", "-i", "{url}", "-vn", "-f", "s16le", "-ar", "48000", "-ac", "2", "pipe:1"]

[rate_limit]
# enabled = true
# requests_per_second = 10
# burst = 20

[health]
# bind_address = "0.0.0.0"
# port = 8004

[discovery]
# enabled = false
# consul_address = "consul:8500"
# service_name = "lily-discord-adapter"
# tags = ["discord", "adapter"]
# domain_name = "example.org"
# retry_interval_secs = 5

[logging]
# level = "info"                     # trace, debug, info, warn, error
# json = false
"##
    .to_string()
}
