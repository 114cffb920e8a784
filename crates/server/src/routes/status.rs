// crates/server/src/routes/status.rs
//! Status endpoint: what the supervisor is doing and how full the buffer is.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use tidal_dl_web_core::SupervisorStatus;

use crate::state::AppState;

/// GET /status - Current or last job plus buffer occupancy.
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<SupervisorStatus> {
    Json(state.supervisor.status())
}

/// Create the status routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/status", get(get_status))
}
