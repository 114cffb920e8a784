// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use tidal_dl_web_core::{JobSupervisor, LineBuffer, StreamPublisher, DEFAULT_CAPACITY};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub settings: Settings,
    /// Owner of the single download process.
    pub supervisor: Arc<JobSupervisor>,
    /// Hands out `/stream` subscriptions over the supervisor's buffer.
    pub publisher: StreamPublisher,
    /// Cancelled once on shutdown; ends every open stream.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(settings: Settings) -> Arc<Self> {
        let buffer = Arc::new(LineBuffer::new(DEFAULT_CAPACITY));
        let supervisor = Arc::new(JobSupervisor::new(Arc::clone(&buffer)));
        let shutdown = CancellationToken::new();
        let publisher = StreamPublisher::new(buffer, shutdown.clone());
        Self::from_parts(settings, supervisor, publisher, shutdown)
    }

    /// Assemble from pre-built parts, e.g. a publisher with a shorter poll.
    pub fn from_parts(
        settings: Settings,
        supervisor: Arc<JobSupervisor>,
        publisher: StreamPublisher,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            settings,
            supervisor,
            publisher,
            shutdown,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// End all streams, then terminate the running download.
    pub async fn begin_shutdown(&self) {
        self.shutdown.cancel();
        if self.supervisor.shutdown().await {
            tracing::info!("terminated running download for shutdown");
        }
    }
}
