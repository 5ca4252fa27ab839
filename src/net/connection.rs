//! Connection lifecycle tracking and drain coordination.
//!
//! # Responsibilities
//! - Count open connections without locking
//! - Generate per-listener connection IDs for tracing
//! - Report connection closure back to the tracker
//! - Signal exactly once when a shutdown finds zero open connections

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::Notify;

use crate::observability::metrics;

/// Unique identifier for a connection within one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Draining did not finish before the deadline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrainError {
    #[error("cannot complete graceful shutdown: {open} connection(s) still open after {waited:?}")]
    Timeout { open: u64, waited: Duration },
}

/// Shared drain state for one listener.
///
/// The open-connection counter and shutdown flag are plain atomics; the
/// completion signal is a `Notify` guarded by a compare-and-swap so it fires
/// at most once no matter how many connections close concurrently.
#[derive(Debug)]
pub struct DrainTracker {
    open: AtomicU64,
    shutdown: AtomicBool,
    completed: AtomicBool,
    done: Notify,
    next_id: AtomicU64,
    max_wait: Duration,
}

impl DrainTracker {
    /// Create a tracker that waits at most `max_wait` for connections to drain.
    pub fn new(max_wait: Duration) -> Arc<Self> {
        Arc::new(Self {
            open: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            done: Notify::new(),
            next_id: AtomicU64::new(1),
            max_wait,
        })
    }

    /// Record a new open connection. The returned guard reports closure on drop.
    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        self.open.fetch_add(1, Ordering::SeqCst);
        metrics::connection_opened();
        ConnectionGuard {
            tracker: Arc::downgrade(self),
            id: ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Current number of open connections.
    pub fn open_connections(&self) -> u64 {
        self.open.load(Ordering::SeqCst)
    }

    /// Whether a drain has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Whether the completion signal has fired.
    pub fn is_drained(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Configured maximum drain wait.
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Begin shutdown and wait until every tracked connection has closed.
    ///
    /// Returns immediately when nothing is open. Otherwise waits for the
    /// completion signal or `max_wait`, whichever comes first.
    pub async fn wait_for_zero(&self) -> Result<(), DrainError> {
        // Register interest before publishing the shutdown flag so a
        // completion fired in between is not missed.
        let notified = self.done.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        self.shutdown.store(true, Ordering::SeqCst);
        if self.open.load(Ordering::SeqCst) == 0 {
            self.complete();
        }

        if self.is_drained() {
            return Ok(());
        }

        match tokio::time::timeout(self.max_wait, notified).await {
            Ok(()) => Ok(()),
            Err(_) => Err(DrainError::Timeout {
                open: self.open_connections(),
                waited: self.max_wait,
            }),
        }
    }

    fn release(&self, id: ConnectionId) {
        let previous = self.open.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "connection released more times than tracked");
        metrics::connection_closed();
        tracing::trace!(connection_id = %id, open = previous - 1, "Connection closed");

        if previous == 1 && self.shutdown.load(Ordering::SeqCst) {
            self.complete();
        }
    }

    fn complete(&self) {
        if self
            .completed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.done.notify_waiters();
        }
    }
}

/// Guard that tracks a connection's lifetime.
///
/// Holds only a weak reference to the tracker; decrements the open count
/// when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: Weak<DrainTracker>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.release(self.id);
        }
    }
}

/// An accepted stream that reports its closure to the listener's tracker.
///
/// Reads and writes pass straight through to the inner stream.
#[derive(Debug)]
pub struct TrackedStream<S> {
    inner: S,
    guard: ConnectionGuard,
}

impl<S> TrackedStream<S> {
    pub fn new(inner: S, guard: ConnectionGuard) -> Self {
        Self { inner, guard }
    }

    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TrackedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TrackedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn connection_ids_unique_per_tracker() {
        let tracker = DrainTracker::new(Duration::from_secs(1));
        let a = tracker.track();
        let b = tracker.track();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().to_string(), "conn-1");
    }

    #[test]
    fn tracker_counts() {
        let tracker = DrainTracker::new(Duration::from_secs(1));
        assert_eq!(tracker.open_connections(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.open_connections(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.open_connections(), 2);

        drop(guard1);
        assert_eq!(tracker.open_connections(), 1);

        drop(guard2);
        assert_eq!(tracker.open_connections(), 0);
    }

    #[test]
    fn guard_outliving_tracker_is_harmless() {
        let tracker = DrainTracker::new(Duration::from_secs(1));
        let guard = tracker.track();
        drop(tracker);
        drop(guard);
    }

    #[tokio::test]
    async fn wait_returns_immediately_with_no_connections() {
        let tracker = DrainTracker::new(Duration::from_secs(30));
        let start = Instant::now();
        tracker.wait_for_zero().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(tracker.is_shutting_down());
        assert!(tracker.is_drained());
    }

    #[tokio::test]
    async fn wait_completes_when_last_connection_closes() {
        let tracker = DrainTracker::new(Duration::from_secs(5));
        let guards: Vec<_> = (0..3).map(|_| tracker.track()).collect();

        let closer = tokio::spawn(async move {
            for guard in guards {
                tokio::time::sleep(Duration::from_millis(20)).await;
                drop(guard);
            }
        });

        tracker.wait_for_zero().await.unwrap();
        assert_eq!(tracker.open_connections(), 0);
        closer.await.unwrap();
    }

    #[tokio::test]
    async fn wait_times_out_with_lingering_connection() {
        let tracker = DrainTracker::new(Duration::from_millis(100));
        let _lingering = tracker.track();

        let err = tracker.wait_for_zero().await.unwrap_err();
        assert_eq!(
            err,
            DrainError::Timeout {
                open: 1,
                waited: Duration::from_millis(100)
            }
        );
        assert!(!tracker.is_drained());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_closes_fire_completion_once() {
        let tracker = DrainTracker::new(Duration::from_secs(5));
        let guards: Vec<_> = (0..64).map(|_| tracker.track()).collect();

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_for_zero().await })
        };
        while !tracker.is_shutting_down() {
            tokio::task::yield_now().await;
        }

        let closers: Vec<_> = guards
            .into_iter()
            .map(|guard| tokio::spawn(async move { drop(guard) }))
            .collect();
        for closer in closers {
            closer.await.unwrap();
        }

        waiter.await.unwrap().unwrap();
        assert_eq!(tracker.open_connections(), 0);
        assert!(tracker.is_drained());

        // A late open/close cycle must not fire again or underflow.
        drop(tracker.track());
        assert_eq!(tracker.open_connections(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn counter_never_underflows_under_concurrent_churn() {
        let tracker = DrainTracker::new(Duration::from_secs(1));
        let workers: Vec<_> = (0..16)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    for _ in 0..200 {
                        let guard = tracker.track();
                        assert!(tracker.open_connections() >= 1);
                        tokio::task::yield_now().await;
                        drop(guard);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.await.unwrap();
        }
        assert_eq!(tracker.open_connections(), 0);
    }

    #[tokio::test]
    async fn tracked_stream_passes_io_through_and_releases_on_drop() {
        let tracker = DrainTracker::new(Duration::from_secs(1));
        let (client, server) = tokio::io::duplex(64);
        let mut tracked = TrackedStream::new(server, tracker.track());
        let mut client = client;

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        tracked.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        tracked.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        assert_eq!(tracker.open_connections(), 1);
        drop(tracked);
        assert_eq!(tracker.open_connections(), 0);
    }
}
