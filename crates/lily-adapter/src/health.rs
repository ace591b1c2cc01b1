//! Health and bot control HTTP server.
//!
//! `GET /health` answers 200 while the backend link is up and 503 otherwise,
//! with the bridge stats as the body either way. `GET /ready` always
//! answers 200. The `/api/bot` routes switch event handling on and off;
//! `/api/cookies` reads and replaces the cookies file handed to the music
//! track resolver.

use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use lily_bridge::Bridge;
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::gateway::PlatformGateway;

#[derive(Clone)]
pub struct HealthState {
    pub bridge: Bridge,
    pub gateway: PlatformGateway,
    pub cookies_path: PathBuf,
}

#[derive(Debug, Serialize)]
struct BotStatus {
    success: bool,
    bot_enabled: bool,
    platform_connected: bool,
    backend_healthy: bool,
    active_sessions: usize,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/bot/enable", post(enable_bot))
        .route("/api/bot/disable", post(disable_bot))
        .route("/api/bot/status", get(bot_status))
        .route("/api/cookies", get(get_cookies).post(upload_cookies))
        .with_state(state)
}

/// Serve until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: HealthState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "health server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let stats = state.bridge.stats().await;
    let status = if stats.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(stats))
}

async fn ready(State(state): State<HealthState>) -> impl IntoResponse {
    Json(state.bridge.stats().await)
}

async fn enable_bot(State(state): State<HealthState>) -> impl IntoResponse {
    let message = if state.bridge.is_enabled() {
        "Bot is already enabled"
    } else {
        state.bridge.set_enabled(true);
        "Bot enabled"
    };
    Json(json!({ "success": true, "message": message }))
}

async fn disable_bot(State(state): State<HealthState>) -> impl IntoResponse {
    let message = if state.bridge.is_enabled() {
        state.bridge.set_enabled(false);
        "Bot disabled"
    } else {
        "Bot is already disabled"
    };
    Json(json!({ "success": true, "message": message }))
}

async fn bot_status(State(state): State<HealthState>) -> impl IntoResponse {
    Json(BotStatus {
        success: true,
        bot_enabled: state.bridge.is_enabled(),
        platform_connected: state.gateway.is_connected(),
        backend_healthy: state.bridge.is_healthy(),
        active_sessions: state.bridge.active_session_count().await,
    })
}

// ---------------------------------------------------------------------------
// Cookies
// ---------------------------------------------------------------------------

fn server_error(detail: String) -> Response {
    error!(detail = %detail, "cookies request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": detail })),
    )
        .into_response()
}

async fn get_cookies(State(state): State<HealthState>) -> Response {
    let path = state.cookies_path.display().to_string();
    match tokio::fs::read_to_string(&state.cookies_path).await {
        Ok(content) => Json(json!({ "exists": true, "content": content, "path": path })).into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Json(json!({ "exists": false, "content": null, "path": path })).into_response()
        }
        Err(e) => server_error(format!("Error reading file: {e}")),
    }
}

/// Takes the file as the `file` field of a multipart form, or as the raw
/// request body.
async fn upload_cookies(State(state): State<HealthState>, request: Request) -> Response {
    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));
    let content = if is_form {
        form_file(request, &state).await
    } else {
        Bytes::from_request(request, &state)
            .await
            .map_err(|e| format!("Error reading upload: {}", e.body_text()))
    };
    let content = match content {
        Ok(content) => content,
        Err(detail) => return server_error(detail),
    };

    match write_cookies(&state.cookies_path, &content).await {
        Ok(size) => {
            info!(path = %state.cookies_path.display(), size, "cookies file updated");
            Json(json!({
                "success": true,
                "message": "Cookies file updated successfully",
                "path": state.cookies_path.display().to_string(),
                "size": size,
            }))
            .into_response()
        }
        Err(e) => server_error(format!("Error writing file: {e}")),
    }
}

async fn form_file(request: Request, state: &HealthState) -> Result<Bytes, String> {
    let mut form = Multipart::from_request(request, state)
        .await
        .map_err(|e| format!("Error reading upload: {}", e.body_text()))?;
    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| format!("Error reading upload: {e}"))?
    {
        if field.name() == Some("file") {
            return field
                .bytes()
                .await
                .map_err(|e| format!("Error reading upload: {e}"));
        }
    }
    Err("Error reading upload: no `file` field".to_string())
}

async fn write_cookies(path: &Path, content: &[u8]) -> std::io::Result<u64> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(tokio::fs::metadata(path).await?.len())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use lily_bridge::{BackendLink, BridgeSettings, LinkConfig, ProcessTranscoder, StaticEndpoint};
    use lily_config::schema::VoiceConfig;
    use serde_json::Value;

    use super::*;

    struct Server {
        base: String,
        state: HealthState,
        cancel: CancellationToken,
    }

    impl Drop for Server {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    /// A bridge whose backend never answers, so it reports unhealthy.
    async fn start() -> Server {
        start_with_cookies(PathBuf::from("/nonexistent/lily/cookies.txt")).await
    }

    async fn start_with_cookies(cookies_path: PathBuf) -> Server {
        let (link, _link_events) = BackendLink::connect(
            LinkConfig::default(),
            Arc::new(StaticEndpoint::new("ws://127.0.0.1:9/ws")),
        );
        let (gateway, _events) = PlatformGateway::new(Duration::from_secs(1), 8);
        let bridge = Bridge::new(
            link,
            Arc::new(gateway.clone()),
            Arc::new(ProcessTranscoder::from_config(&VoiceConfig::default())),
            BridgeSettings::default(),
        );
        let state = HealthState {
            bridge,
            gateway,
            cookies_path,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let cancel = CancellationToken::new();
        tokio::spawn(serve(listener, state.clone(), cancel.clone()));
        Server {
            base,
            state,
            cancel,
        }
    }

    #[tokio::test]
    async fn health_is_503_while_backend_is_down() {
        let server = start().await;
        let resp = reqwest::get(format!("{}/health", server.base)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["healthy"], false);
        assert_eq!(body["active_sessions"], 0);
    }

    #[tokio::test]
    async fn ready_is_always_ok() {
        let server = start().await;
        let resp = reqwest::get(format!("{}/ready", server.base)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["enabled"], true);
    }

    #[tokio::test]
    async fn disable_and_enable_toggle_the_bridge() {
        let server = start().await;
        let client = reqwest::Client::new();

        let body: Value = client
            .post(format!("{}/api/bot/disable", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["message"], "Bot disabled");
        assert!(!server.state.bridge.is_enabled());

        let body: Value = client
            .post(format!("{}/api/bot/disable", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["message"], "Bot is already disabled");

        let body: Value = client
            .post(format!("{}/api/bot/enable", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["message"], "Bot enabled");
        assert!(server.state.bridge.is_enabled());
    }

    #[tokio::test]
    async fn status_reports_connections() {
        let server = start().await;
        let body: Value = reqwest::get(format!("{}/api/bot/status", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["bot_enabled"], true);
        assert_eq!(body["platform_connected"], false);
        assert_eq!(body["backend_healthy"], false);
    }

    #[tokio::test]
    async fn missing_cookies_file_is_reported() {
        let server = start().await;
        let body: Value = reqwest::get(format!("{}/api/cookies", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["exists"], false);
        assert_eq!(body["content"], Value::Null);
        assert_eq!(body["path"], "/nonexistent/lily/cookies.txt");
    }

    #[tokio::test]
    async fn cookies_upload_replaces_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("cookies.txt");
        let server = start_with_cookies(path.clone()).await;
        let client = reqwest::Client::new();

        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(b"# Netscape HTTP Cookie File\n".to_vec())
                .file_name("cookies.txt"),
        );
        let body: Value = client
            .post(format!("{}/api/cookies", server.base))
            .multipart(form)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Cookies file updated successfully");
        assert_eq!(body["size"], 28);

        let resp = client
            .post(format!("{}/api/cookies", server.base))
            .body("replaced")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "replaced");

        let body: Value = reqwest::get(format!("{}/api/cookies", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["exists"], true);
        assert_eq!(body["content"], "replaced");
    }

    #[tokio::test]
    async fn form_without_file_field_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let server = start_with_cookies(dir.path().join("cookies.txt")).await;
        let form = reqwest::multipart::Form::new().text("other", "x");
        let resp = reqwest::Client::new()
            .post(format!("{}/api/cookies", server.base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = resp.json().await.unwrap();
        assert!(body["detail"].as_str().unwrap().contains("file"));
    }
}
