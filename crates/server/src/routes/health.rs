// crates/server/src/routes/health.rs
//! Liveness plus a one-glance view of the download machinery.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// A download process is registered with the supervisor.
    pub downloading: bool,
    pub buffered_lines: usize,
    /// Open `/stream` connections.
    pub subscribers: usize,
    /// Lines closed streams missed because they fell behind the buffer.
    pub skipped_lines: u64,
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        downloading: state.supervisor.is_running().await,
        buffered_lines: state.supervisor.buffer().len(),
        subscribers: state.publisher.active_subscribers(),
        skipped_lines: state.publisher.skipped_lines(),
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
