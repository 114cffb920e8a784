// crates/server/src/routes/mod.rs
//! Route handlers for the tidal-dl web server.

pub mod download;
pub mod health;
pub mod pages;
pub mod status;
pub mod stream;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Prefix every endpoint is also reachable under, for reverse-proxy setups.
pub const PREFIX: &str = "/tidal-dl";

/// Create the combined router.
///
/// Routes, each also under `/tidal-dl`:
/// - POST /download - Start a download (form field `url`)
/// - POST /stop - Stop the running download
/// - GET /stream - SSE stream of download output
/// - GET /status - Current or last job snapshot
/// - GET /health - Health check
///
/// Plus the page itself at `/` and `/tidal-dl/`, `/favicon.ico` and `/static/*`.
pub fn app_routes(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .merge(download::router())
        .merge(stream::router())
        .merge(status::router())
        .merge(health::router());

    Router::new()
        .merge(api.clone())
        .nest(PREFIX, api)
        .merge(pages::router(&state.settings))
        .with_state(state)
}
