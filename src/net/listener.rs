//! TCP listener that drains open connections on close.
//!
//! # Responsibilities
//! - Bind to the configured address with port reuse
//! - Accept incoming TCP connections and wrap them for tracking
//! - Stop accepting on close, then wait for the drain to finish
//! - Graceful handling of accept errors

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::config::ListenerConfig;
use crate::net::connection::{DrainError, DrainTracker, TrackedStream};

const LISTEN_BACKLOG: i32 = 1024;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    /// Failed to accept connection.
    #[error("draining listener accept error: {0}")]
    Accept(#[source] io::Error),
    /// The listener has been closed for shutdown.
    #[error("listener closed")]
    Closed,
}

impl ListenerError {
    /// Accept errors that concern a single peer rather than the listener.
    pub fn is_transient(&self) -> bool {
        match self {
            ListenerError::Accept(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Errors that mean the listener itself is unusable.
    ///
    /// Anything else, including descriptor or buffer exhaustion, is worth
    /// retrying after a pause.
    pub fn is_fatal(&self) -> bool {
        match self {
            ListenerError::Bind { .. } => true,
            ListenerError::Accept(e) => matches!(
                e.kind(),
                io::ErrorKind::NotConnected | io::ErrorKind::InvalidInput
            ),
            ListenerError::Closed => false,
        }
    }
}

/// Bind a TCP listener with `SO_REUSEADDR` and, where supported and
/// requested, `SO_REUSEPORT` so several processes can share the port.
pub async fn bind(config: &ListenerConfig) -> Result<TcpListener, ListenerError> {
    let address = config.listen_address.as_str();
    let bind_err = |source: io::Error| ListenerError::Bind {
        address: address.to_string(),
        source,
    };

    let addr = tokio::net::lookup_host(address)
        .await
        .map_err(bind_err)?
        .next()
        .ok_or_else(|| {
            bind_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no socket addresses found",
            ))
        })?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;

    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    if config.reuse_port {
        socket.set_reuse_port(true).map_err(bind_err)?;
    }

    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;

    let listener = TcpListener::from_std(socket.into()).map_err(bind_err)?;
    let local_addr = listener.local_addr().map_err(bind_err)?;

    tracing::info!(
        address = %local_addr,
        reuse_port = config.reuse_port,
        "Listener bound"
    );

    Ok(listener)
}

/// A listener that counts the connections it hands out.
///
/// Owned by the accept loop. The paired [`CloseHandle`] stops it from
/// another task and waits for every tracked connection to close.
#[derive(Debug)]
pub struct DrainingListener {
    /// The underlying TCP listener.
    inner: TcpListener,
    tracker: Arc<DrainTracker>,
    stop: watch::Receiver<bool>,
}

impl DrainingListener {
    /// Wrap `inner`, allowing at most `max_wait` for connections to drain on close.
    pub fn new(inner: TcpListener, max_wait: Duration) -> (Self, CloseHandle) {
        let tracker = DrainTracker::new(max_wait);
        let (stop_tx, stop_rx) = watch::channel(false);

        let listener = Self {
            inner,
            tracker: Arc::clone(&tracker),
            stop: stop_rx,
        };
        let handle = CloseHandle {
            stop: stop_tx,
            tracker,
        };
        (listener, handle)
    }

    /// Accept a new connection.
    ///
    /// Returns [`ListenerError::Closed`] once close has been requested; no
    /// connection is accepted after that point.
    pub async fn accept(&mut self) -> Result<(TrackedStream<TcpStream>, SocketAddr), ListenerError> {
        tokio::select! {
            biased;
            _ = stop_requested(&mut self.stop) => Err(ListenerError::Closed),
            accepted = self.inner.accept() => {
                let (stream, peer_addr) = accepted.map_err(ListenerError::Accept)?;
                let guard = self.tracker.track();

                tracing::debug!(
                    peer_addr = %peer_addr,
                    connection_id = %guard.id(),
                    open_connections = self.tracker.open_connections(),
                    "Connection accepted"
                );

                Ok((TrackedStream::new(stream, guard), peer_addr))
            }
        }
    }

    /// Pause accepting for `delay`, returning [`ListenerError::Closed`] early
    /// if close is requested meanwhile.
    pub async fn backoff(&mut self, delay: Duration) -> Result<(), ListenerError> {
        tokio::select! {
            biased;
            _ = stop_requested(&mut self.stop) => Err(ListenerError::Closed),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.inner.local_addr()
    }

    /// Current number of open connections.
    pub fn open_connections(&self) -> u64 {
        self.tracker.open_connections()
    }
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        // The close handle is gone, so nobody can stop this listener.
        std::future::pending::<()>().await;
    }
}

/// Closes a [`DrainingListener`] and waits for its connections to drain.
#[derive(Debug)]
pub struct CloseHandle {
    stop: watch::Sender<bool>,
    tracker: Arc<DrainTracker>,
}

impl CloseHandle {
    /// Stop accepting, then wait until all open connections have closed.
    ///
    /// The inner listener is dropped before the drain wait begins. Returns
    /// [`DrainError::Timeout`] if connections are still open after the
    /// configured maximum wait.
    pub async fn close(self) -> Result<(), DrainError> {
        self.stop.send_replace(true);
        // Resolves once the accept loop has dropped the listener.
        self.stop.closed().await;
        tracing::debug!(
            open_connections = self.tracker.open_connections(),
            "Listener closed, draining connections"
        );

        match self.tracker.wait_for_zero().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    max_wait = ?self.tracker.max_wait(),
                    "Graceful drain timed out"
                );
                Err(e)
            }
        }
    }

    /// Current number of open connections.
    pub fn open_connections(&self) -> u64 {
        self.tracker.open_connections()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn local_config() -> ListenerConfig {
        ListenerConfig {
            listen_address: "127.0.0.1:0".to_string(),
            reuse_port: true,
        }
    }

    #[tokio::test]
    async fn bind_rejects_unresolvable_address() {
        let config = ListenerConfig {
            listen_address: "not an address".to_string(),
            reuse_port: false,
        };
        let err = bind(&config).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
    }

    #[tokio::test]
    async fn bind_fails_on_occupied_port_without_reuse() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ListenerConfig {
            listen_address: taken.local_addr().unwrap().to_string(),
            reuse_port: false,
        };
        let err = bind(&config).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
    }

    #[tokio::test]
    async fn accept_counts_and_close_drains() {
        let inner = bind(&local_config()).await.unwrap();
        let (mut listener, handle) = DrainingListener::new(inner, Duration::from_secs(5));
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        assert_eq!(handle.open_connections(), 1);

        let accept_loop = tokio::spawn(async move {
            loop {
                if let Err(ListenerError::Closed) = listener.accept().await {
                    break;
                }
            }
        });

        let closer = tokio::spawn(handle.close());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!closer.is_finished());

        drop(stream);
        closer.await.unwrap().unwrap();
        accept_loop.await.unwrap();
    }

    #[tokio::test]
    async fn close_with_no_connections_is_immediate() {
        let inner = bind(&local_config()).await.unwrap();
        let (mut listener, handle) = DrainingListener::new(inner, Duration::from_secs(30));

        let accept_loop = tokio::spawn(async move { listener.accept().await });

        let start = Instant::now();
        handle.close().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(
            accept_loop.await.unwrap(),
            Err(ListenerError::Closed)
        ));
    }

    #[tokio::test]
    async fn close_reports_timeout_with_open_connection() {
        let inner = bind(&local_config()).await.unwrap();
        let (mut listener, handle) = DrainingListener::new(inner, Duration::from_millis(100));
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _) = listener.accept().await.unwrap();
        drop(listener);

        let err = handle.close().await.unwrap_err();
        assert!(matches!(err, DrainError::Timeout { open: 1, .. }));
    }

    #[test]
    fn only_peer_errors_are_transient() {
        let reset = ListenerError::Accept(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(reset.is_transient());

        let other = ListenerError::Accept(io::Error::other("too many open files"));
        assert!(!other.is_transient());
        assert!(!ListenerError::Closed.is_transient());
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_exhaustion_is_retryable() {
        // EMFILE, ENFILE and ENOMEM share these values on Linux and the BSDs.
        for code in [24, 23, 12] {
            let err = ListenerError::Accept(io::Error::from_raw_os_error(code));
            assert!(!err.is_fatal(), "os error {code} treated as fatal");
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn broken_listener_is_fatal() {
        let err = ListenerError::Accept(io::Error::from(io::ErrorKind::InvalidInput));
        assert!(err.is_fatal());
        let err = ListenerError::Accept(io::Error::from(io::ErrorKind::NotConnected));
        assert!(err.is_fatal());
        assert!(!ListenerError::Closed.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_sleeps_for_delay() {
        let inner = bind(&local_config()).await.unwrap();
        let (mut listener, _handle) = DrainingListener::new(inner, Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        listener.backoff(Duration::from_secs(1)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn backoff_ends_when_closed() {
        let inner = bind(&local_config()).await.unwrap();
        let (mut listener, handle) = DrainingListener::new(inner, Duration::from_secs(5));

        let paused = tokio::spawn(async move {
            let result = listener.backoff(Duration::from_secs(60)).await;
            drop(listener);
            result
        });

        let start = Instant::now();
        handle.close().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(paused.await.unwrap(), Err(ListenerError::Closed)));
    }
}
