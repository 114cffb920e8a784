// crates/server/src/routes/download.rs
//! Download control endpoints.
//!
//! - POST /download - start (or replace) the download of `url`
//! - POST /stop - stop the running download

use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, State},
    http::HeaderMap,
    routing::post,
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tidal_dl_web_core::{JobSpec, StopOutcome};

use crate::auth::require_token;
use crate::error::{ApiError, ApiResult, NO_URL};
use crate::state::AppState;

/// Form body of a download request.
#[derive(Debug, Deserialize)]
pub struct DownloadForm {
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

/// POST /download - Start downloading `url`, replacing any running download.
///
/// A process that fails to spawn still answers 200; the failure is reported
/// on the stream.
pub async fn start_download(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    form: Result<Form<DownloadForm>, FormRejection>,
) -> ApiResult<Json<MessageResponse>> {
    require_token(state.settings.download_token.as_deref(), &headers)?;

    let Form(form) = form?;
    let url = form
        .url
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::BadRequest(NO_URL.to_string()))?;

    tracing::info!(url = %url, "Starting download");
    let spec = JobSpec::new(&state.settings.tidal_dl_bin, ["dl".to_string(), url])
        .with_timeout_secs(state.settings.download_timeout);
    if let Err(e) = state.supervisor.start(spec).await {
        tracing::debug!(error = %e, "download failed to start; reported on stream");
    }

    Ok(MessageResponse::new("Download started"))
}

/// POST /stop - Stop the running download, if any.
pub async fn stop_download(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    match state.supervisor.stop().await {
        StopOutcome::Stopped => {
            tracing::info!("Download stopped");
            MessageResponse::new("Download stopped")
        }
        StopOutcome::NotRunning => MessageResponse::new("No download running"),
    }
}

/// Create the download routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/download", post(start_download))
        .route("/stop", post(stop_download))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app(settings: Settings) -> Router {
        router().with_state(AppState::new(settings))
    }

    fn form_request(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_download_without_url_is_400() {
        let (status, json) = send(app(Settings::default()), form_request("/download", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No URL provided");

        let (status, json) =
            send(app(Settings::default()), form_request("/download", "url=")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No URL provided");
    }

    #[tokio::test]
    async fn test_download_token_checked_before_url() {
        let settings = Settings {
            download_token: Some("s3cret".to_string()),
            ..Settings::default()
        };
        let (status, json) = send(app(settings), form_request("/download", "")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_download_spawn_failure_still_started() {
        let settings = Settings {
            tidal_dl_bin: "/nonexistent/tidal-dl-ng".to_string(),
            ..Settings::default()
        };
        let state = AppState::new(settings);
        let app = router().with_state(Arc::clone(&state));
        let (status, json) = send(app, form_request("/download", "url=https%3A%2F%2Ftidal.com%2Ftrack%2F1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Download started");

        let lines = state.supervisor.buffer().snapshot();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Error: failed to start /nonexistent/tidal-dl-ng"));
    }

    #[tokio::test]
    async fn test_stop_with_nothing_running() {
        let request = Request::builder()
            .method("POST")
            .uri("/stop")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(app(Settings::default()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "No download running");
    }
}
