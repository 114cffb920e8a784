// crates/server/src/routes/pages.rs
//! The page and its assets, served straight from the configured folders.

use std::sync::Arc;

use axum::Router;
use tower_http::services::{ServeDir, ServeFile};

use crate::config::Settings;
use crate::routes::PREFIX;
use crate::state::AppState;

/// `index.html` at `/` and `/tidal-dl/`, `favicon.ico`, and `/static/*`.
/// Missing files answer 404.
pub fn router(settings: &Settings) -> Router<Arc<AppState>> {
    let index = ServeFile::new(settings.index_path());
    Router::new()
        .route_service("/", index.clone())
        .route_service(&format!("{PREFIX}/"), index)
        .route_service("/favicon.ico", ServeFile::new(settings.favicon_path()))
        .nest_service("/static", ServeDir::new(&settings.static_folder))
}
