// crates/core/src/buffer.rs
//! Bounded, drop-oldest line buffer shared between the running job and the
//! stream subscribers.
//!
//! Producers call [`LineBuffer::push`], which never waits on consumers: when
//! the buffer is full the oldest record is evicted and the new one admitted.
//! Consumers read through a [`Subscription`], a private cursor over the
//! buffer. Reads are non-destructive, so every subscriber sees every record
//! that is still retained when it gets to it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Capacity used by the server. Not configurable from the outside.
pub const DEFAULT_CAPACITY: usize = 2000;

#[derive(Debug)]
struct Record {
    seq: u64,
    line: Arc<str>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Contiguous by `seq`, oldest first.
    records: VecDeque<Record>,
    /// Sequence number the next pushed record will get.
    next_seq: u64,
    /// Everything below this was removed by `drain`, not by eviction.
    drain_mark: u64,
}

impl Inner {
    fn front_seq(&self) -> u64 {
        self.records.front().map_or(self.next_seq, |r| r.seq)
    }
}

/// Bounded FIFO of output lines with drop-oldest overflow.
#[derive(Debug)]
pub struct LineBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl LineBuffer {
    /// Create a buffer holding at most `capacity` lines (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                records: VecDeque::with_capacity(capacity),
                ..Inner::default()
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding this lock cannot leave `Inner` half-updated in
        // a way that matters to readers, so keep serving.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit one line, evicting the oldest when full.
    ///
    /// Returns `true` if a record was evicted to make room.
    pub fn push(&self, line: impl Into<String>) -> bool {
        let line: Arc<str> = Arc::from(line.into());
        let evicted = {
            let mut inner = self.lock();
            let evicted = if inner.records.len() >= self.capacity {
                inner.records.pop_front();
                true
            } else {
                false
            };
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.records.push_back(Record { seq, line });
            evicted
        };
        self.notify.notify_waiters();
        evicted
    }

    /// Remove everything currently buffered. Returns how many lines were dropped.
    pub fn drain(&self) -> usize {
        let mut inner = self.lock();
        let dropped = inner.records.len();
        inner.records.clear();
        inner.drain_mark = inner.next_seq;
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the retained lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock()
            .records
            .iter()
            .map(|r| r.line.to_string())
            .collect()
    }

    /// Open a cursor starting at the oldest retained line.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let cursor = self.lock().front_seq();
        Subscription {
            buffer: Arc::clone(self),
            cursor,
            skipped: 0,
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One consumer's read position over a [`LineBuffer`].
#[derive(Debug)]
pub struct Subscription {
    buffer: Arc<LineBuffer>,
    cursor: u64,
    skipped: u64,
}

impl Subscription {
    /// Next line for this subscriber without waiting.
    pub fn try_pop(&mut self) -> Option<Arc<str>> {
        let inner = self.buffer.lock();
        let front = inner.front_seq();
        if self.cursor < front {
            // Lines between our cursor and the front were either evicted while
            // we lagged or cleared by a drain. Only the former count as lost.
            let from = self.cursor.max(inner.drain_mark);
            self.skipped += front.saturating_sub(from);
            self.cursor = front;
        }
        let idx = usize::try_from(self.cursor - front).ok()?;
        let record = inner.records.get(idx)?;
        self.cursor = record.seq + 1;
        Some(Arc::clone(&record.line))
    }

    /// Next line, waiting up to `timeout` for one to arrive.
    ///
    /// `None` means nothing arrived in time; callers emit a keep-alive.
    pub async fn pop(&mut self, timeout: Duration) -> Option<Arc<str>> {
        let deadline = Instant::now() + timeout;
        let buffer = Arc::clone(&self.buffer);
        loop {
            let notified = buffer.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await still wakes us.
            notified.as_mut().enable();

            if let Some(line) = self.try_pop() {
                return Some(line);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Lines this subscriber lost to eviction because it fell behind.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("line {i}")).collect()
    }

    #[test]
    fn test_push_preserves_order() {
        let buffer = LineBuffer::new(10);
        for line in lines(0..5) {
            assert!(!buffer.push(line));
        }
        assert_eq!(buffer.snapshot(), lines(0..5));
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_overflow_keeps_most_recent_capacity_lines() {
        let buffer = LineBuffer::new(3);
        for (i, line) in lines(0..10).into_iter().enumerate() {
            let evicted = buffer.push(line);
            assert_eq!(evicted, i >= 3);
            assert!(buffer.len() <= 3);
        }
        assert_eq!(buffer.snapshot(), lines(7..10));
    }

    #[test]
    fn test_default_capacity() {
        let buffer = LineBuffer::default();
        assert_eq!(buffer.capacity(), DEFAULT_CAPACITY);
        for line in lines(0..DEFAULT_CAPACITY + 25) {
            buffer.push(line);
        }
        assert_eq!(buffer.len(), DEFAULT_CAPACITY);
        assert_eq!(buffer.snapshot()[0], "line 25");
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = LineBuffer::new(0);
        buffer.push("a");
        buffer.push("b");
        assert_eq!(buffer.snapshot(), vec!["b".to_string()]);
    }

    #[test]
    fn test_drain_empties_and_reports_count() {
        let buffer = LineBuffer::new(10);
        buffer.push("a");
        buffer.push("b");
        assert_eq!(buffer.drain(), 2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.drain(), 0);
    }

    #[test]
    fn test_subscription_starts_at_oldest_retained() {
        let buffer = Arc::new(LineBuffer::new(10));
        buffer.push("before");
        let mut sub = buffer.subscribe();
        buffer.push("after");
        assert_eq!(sub.try_pop().as_deref(), Some("before"));
        assert_eq!(sub.try_pop().as_deref(), Some("after"));
        assert_eq!(sub.try_pop(), None);
    }

    #[test]
    fn test_every_subscriber_sees_every_line() {
        let buffer = Arc::new(LineBuffer::new(10));
        let mut a = buffer.subscribe();
        let mut b = buffer.subscribe();
        buffer.push("one");
        buffer.push("two");

        let read = |sub: &mut Subscription| {
            std::iter::from_fn(|| sub.try_pop().map(|l| l.to_string())).collect::<Vec<_>>()
        };
        assert_eq!(read(&mut a), vec!["one", "two"]);
        assert_eq!(read(&mut b), vec!["one", "two"]);
        // Reads do not consume the buffer itself.
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_lagging_subscriber_skips_evicted_lines() {
        let buffer = Arc::new(LineBuffer::new(3));
        let mut sub = buffer.subscribe();
        for line in lines(0..8) {
            buffer.push(line);
        }
        assert_eq!(sub.try_pop().as_deref(), Some("line 5"));
        assert_eq!(sub.skipped(), 5);
        assert_eq!(sub.try_pop().as_deref(), Some("line 6"));
        assert_eq!(sub.try_pop().as_deref(), Some("line 7"));
        assert_eq!(sub.try_pop(), None);
    }

    #[test]
    fn test_drain_hides_old_lines_without_counting_them_skipped() {
        let buffer = Arc::new(LineBuffer::new(10));
        let mut sub = buffer.subscribe();
        buffer.push("old job");
        buffer.drain();
        buffer.push("new job");
        assert_eq!(sub.try_pop().as_deref(), Some("new job"));
        assert_eq!(sub.skipped(), 0);
    }

    #[tokio::test]
    async fn test_pop_times_out_when_empty() {
        let buffer = Arc::new(LineBuffer::new(10));
        let mut sub = buffer.subscribe();
        let started = std::time::Instant::now();
        assert_eq!(sub.pop(Duration::from_millis(50)).await, None);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let buffer = Arc::new(LineBuffer::new(10));
        let mut sub = buffer.subscribe();

        let producer = Arc::clone(&buffer);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push("hello");
        });

        let started = std::time::Instant::now();
        let line = sub.pop(Duration::from_secs(5)).await;
        assert_eq!(line.as_deref(), Some("hello"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_waiting_pop_is_woken_by_push() {
        let buffer = Arc::new(LineBuffer::new(10));
        let mut sub = buffer.subscribe();
        let mut pop = tokio_test::task::spawn(sub.pop(Duration::from_secs(60)));

        tokio_test::assert_pending!(pop.poll());
        buffer.push("ready");
        assert!(pop.is_woken());
        let line = tokio_test::assert_ready!(pop.poll());
        assert_eq!(line.as_deref(), Some("ready"));
    }

    #[test]
    fn test_concurrent_producers_stay_bounded() {
        let buffer = Arc::new(LineBuffer::new(50));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        buffer.push(format!("{t}-{i}"));
                        assert!(buffer.len() <= 50);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(buffer.len(), 50);

        // Per-producer order survives interleaving.
        for t in 0..4 {
            let prefix = format!("{t}-");
            let seen: Vec<usize> = buffer
                .snapshot()
                .iter()
                .filter_map(|l| l.strip_prefix(&prefix).map(|n| n.parse().unwrap()))
                .collect();
            assert!(seen.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
