// crates/core/src/publisher.rs
//! Live view of the line buffer for any number of stream consumers.
//!
//! Each consumer gets its own [`Subscription`](crate::buffer::Subscription),
//! so every consumer sees every retained line. The publisher is agnostic of
//! the transport; the server maps [`StreamEvent`]s onto SSE frames.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::buffer::{LineBuffer, Subscription};

/// Longest a consumer waits for a line before it is sent a keep-alive.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    KeepAlive,
    Line(Arc<str>),
}

#[derive(Clone)]
pub struct StreamPublisher {
    buffer: Arc<LineBuffer>,
    poll_interval: Duration,
    shutdown: CancellationToken,
    active: Arc<AtomicUsize>,
    skipped: Arc<AtomicU64>,
}

impl StreamPublisher {
    pub fn new(buffer: Arc<LineBuffer>, shutdown: CancellationToken) -> Self {
        Self::with_poll_interval(buffer, shutdown, POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        buffer: Arc<LineBuffer>,
        shutdown: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            buffer,
            poll_interval,
            shutdown,
            active: Arc::new(AtomicUsize::new(0)),
            skipped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of streams currently open.
    pub fn active_subscribers(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Lines lost to eviction across all closed streams.
    pub fn skipped_lines(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Open a stream: one keep-alive, then lines as they arrive with a
    /// keep-alive after each idle poll interval.
    ///
    /// Ends when the shutdown token fires. Dropping the stream is how a
    /// consumer disconnects.
    pub fn subscribe(&self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let mut open = OpenStream::new(
            self.buffer.subscribe(),
            Arc::clone(&self.active),
            Arc::clone(&self.skipped),
        );
        let shutdown = self.shutdown.clone();
        let poll_interval = self.poll_interval;

        async_stream::stream! {
            yield StreamEvent::KeepAlive;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    line = open.subscription.pop(poll_interval) => line,
                };
                match next {
                    Some(line) => yield StreamEvent::Line(line),
                    None => yield StreamEvent::KeepAlive,
                }
            }
            tracing::debug!("stream closed by shutdown");
        }
    }
}

/// One open stream's cursor plus its bookkeeping; the drop runs whether the
/// stream finished or the consumer went away.
struct OpenStream {
    subscription: Subscription,
    active: Arc<AtomicUsize>,
    skipped: Arc<AtomicU64>,
}

impl OpenStream {
    fn new(subscription: Subscription, active: Arc<AtomicUsize>, skipped: Arc<AtomicU64>) -> Self {
        let now = active.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(subscribers = now, "stream subscriber connected");
        Self {
            subscription,
            active,
            skipped,
        }
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        let skipped = self.subscription.skipped();
        self.skipped.fetch_add(skipped, Ordering::Relaxed);
        let now = self.active.fetch_sub(1, Ordering::Relaxed) - 1;
        if skipped > 0 {
            tracing::info!(skipped, subscribers = now, "stream subscriber disconnected after falling behind");
        } else {
            tracing::debug!(subscribers = now, "stream subscriber disconnected");
        }
    }
}
