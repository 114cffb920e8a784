// crates/server/src/routes/stream.rs
//! GET /stream - SSE feed of download output.
//!
//! Each buffered line becomes one `data:` event. When no line arrives within
//! the poll interval the client gets a `: keep-alive` comment instead.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::header,
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    routing::get,
    Router,
};
use tidal_dl_web_core::StreamEvent;
use tokio_stream::StreamExt;

use crate::state::AppState;

fn to_sse(event: StreamEvent) -> Event {
    match event {
        StreamEvent::KeepAlive => Event::default().comment("keep-alive"),
        StreamEvent::Line(line) => Event::default().data(&*line),
    }
}

/// GET /stream - SSE stream of the download's output lines.
pub async fn stream_output(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let events = state
        .publisher
        .subscribe()
        .map(|event| Ok::<_, Infallible>(to_sse(event)));

    ([(header::CONNECTION, "keep-alive")], Sse::new(events))
}

/// Create the stream routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/stream", get(stream_output))
}
