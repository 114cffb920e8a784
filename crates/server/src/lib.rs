// crates/server/src/lib.rs
//! tidal-dl web server library.
//!
//! Axum control surface for a single `tidal-dl-ng` download at a time: start
//! and stop the download, stream its output over SSE, serve the page.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{Cli, ConfigError, Settings};
pub use error::*;
pub use routes::app_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - download control, stream, status and health routes (root and `/tidal-dl`)
/// - the page and static assets
/// - CORS allowing any origin
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(app_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
