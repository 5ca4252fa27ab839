//! Accept loop and per-connection serving.
//!
//! # Responsibilities
//! - Accept connections from the draining listener until it is closed
//! - Enforce the per-IP connection limit
//! - Drive each connection through hyper on its own task
//! - Disable keep-alive on live connections once draining starts
//! - Close idle keep-alive connections and connections that reached
//!   their request budget

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderValue, Request, Version},
    Router,
};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto,
};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tower::ServiceExt;

use crate::config::ServerConfig;
use crate::net::connection::TrackedStream;
use crate::net::listener::{DrainingListener, ListenerError};
use crate::observability::metrics;
use crate::security::limits::{ConnectionLimiter, IpPermit};

/// Pause after an accept error that is neither per-peer nor fatal.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Per-connection settings taken from the server configuration.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionSettings {
    read_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    max_requests: Option<usize>,
}

impl ConnectionSettings {
    pub(crate) fn from_config(config: &ServerConfig) -> Self {
        Self {
            read_timeout: config.timeouts.read_timeout(),
            idle_timeout: config.timeouts.idle_timeout(),
            max_requests: (config.limits.max_requests_per_conn > 0)
                .then_some(config.limits.max_requests_per_conn),
        }
    }
}

/// Accept connections until the listener is closed.
///
/// Returns `Ok(())` after a close and `Err` only when the listener itself is
/// broken; resource exhaustion such as `EMFILE` is retried after a pause. The listener is dropped on return.
pub(crate) async fn accept_loop(
    mut listener: DrainingListener,
    app: Router,
    settings: Arc<ConnectionSettings>,
    limiter: ConnectionLimiter,
    draining: watch::Receiver<bool>,
) -> Result<(), ListenerError> {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(ListenerError::Closed) => {
                tracing::debug!("Accept loop stopped");
                return Ok(());
            }
            Err(e) if e.is_transient() => {
                tracing::debug!(error = %e, "Dropped connection during accept");
                continue;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    backoff = ?ACCEPT_BACKOFF,
                    "Accept failed, retrying"
                );
                if listener.backoff(ACCEPT_BACKOFF).await.is_err() {
                    tracing::debug!("Accept loop stopped");
                    return Ok(());
                }
                continue;
            }
        };

        let Some(permit) = limiter.try_acquire(peer_addr.ip()) else {
            tracing::warn!(
                peer_addr = %peer_addr,
                connection_id = %stream.id(),
                "Too many connections from client, closing"
            );
            metrics::connection_rejected();
            continue;
        };

        tokio::spawn(serve_connection(
            stream,
            peer_addr,
            app.clone(),
            Arc::clone(&settings),
            draining.clone(),
            permit,
        ));
    }
}

async fn serve_connection(
    stream: TrackedStream<TcpStream>,
    peer_addr: SocketAddr,
    app: Router,
    settings: Arc<ConnectionSettings>,
    mut draining: watch::Receiver<bool>,
    _permit: IpPermit,
) {
    let connection_id = stream.id();
    let activity = Arc::new(Activity::new());

    let service = {
        let activity = Arc::clone(&activity);
        let max_requests = settings.max_requests;
        hyper::service::service_fn(move |mut request: Request<Incoming>| {
            let app = app.clone();
            let active = activity.begin();
            async move {
                let close_after = request.version() < Version::HTTP_2
                    && max_requests.is_some_and(|max| active.served() >= max);
                request.extensions_mut().insert(ConnectInfo(peer_addr));

                let mut response = match app.oneshot(request.map(Body::new)).await {
                    Ok(response) => response,
                    Err(never) => match never {},
                };
                drop(active);

                if close_after {
                    response
                        .headers_mut()
                        .insert(header::CONNECTION, HeaderValue::from_static("close"));
                }
                Ok::<_, Infallible>(response)
            }
        })
    };

    let mut builder = auto::Builder::new(TokioExecutor::new());
    {
        let mut http1 = builder.http1();
        http1.timer(TokioTimer::new());
        if let Some(read_timeout) = settings.read_timeout {
            http1.header_read_timeout(read_timeout);
        }
    }

    let connection = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let mut closing = false;
    loop {
        tokio::select! {
            biased;
            result = connection.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(
                        connection_id = %connection_id,
                        peer_addr = %peer_addr,
                        error = %e,
                        "Connection ended with error"
                    );
                }
                break;
            }
            _ = drain_requested(&mut draining, &activity), if !closing => {
                closing = true;
                connection.as_mut().graceful_shutdown();
            }
            _ = idle_expired(&activity, settings.idle_timeout), if !closing => {
                tracing::trace!(connection_id = %connection_id, "Closing idle connection");
                closing = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }
}

/// Resolves once draining has started and the connection has begun at least
/// one request. A connection accepted just before the listener stopped still
/// gets its first request answered.
async fn drain_requested(draining: &mut watch::Receiver<bool>, activity: &Activity) {
    if draining.wait_for(|draining| *draining).await.is_err() {
        std::future::pending::<()>().await;
    }
    activity.first_request().await;
}

async fn idle_expired(activity: &Activity, idle_timeout: Option<Duration>) {
    let Some(idle_timeout) = idle_timeout else {
        return std::future::pending().await;
    };

    loop {
        let deadline = if activity.in_flight() > 0 {
            Instant::now() + idle_timeout
        } else {
            activity.last_active() + idle_timeout
        };
        tokio::time::sleep_until(deadline).await;
        if activity.in_flight() == 0 && activity.last_active().elapsed() >= idle_timeout {
            return;
        }
    }
}

/// Request activity on one connection.
#[derive(Debug)]
struct Activity {
    epoch: Instant,
    last_active_ms: AtomicU64,
    in_flight: AtomicUsize,
    served: AtomicUsize,
    started: Notify,
}

impl Activity {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_active_ms: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            served: AtomicUsize::new(0),
            started: Notify::new(),
        }
    }

    /// Mark a request as started. The request ends when the returned guard
    /// drops, including when hyper abandons the request future.
    fn begin(self: &Arc<Self>) -> ActiveRequest {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let served = self.served.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.notify_waiters();
        ActiveRequest {
            activity: Arc::clone(self),
            served,
        }
    }

    fn end(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.last_active_ms.store(elapsed, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    fn last_active(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_active_ms.load(Ordering::SeqCst))
    }

    async fn first_request(&self) {
        let started = self.started.notified();
        tokio::pin!(started);
        started.as_mut().enable();
        if self.served() > 0 {
            return;
        }
        started.await;
    }
}

/// One in-flight request.
#[derive(Debug)]
struct ActiveRequest {
    activity: Arc<Activity>,
    served: usize,
}

impl ActiveRequest {
    /// Requests received on this connection, including this one.
    fn served(&self) -> usize {
        self.served
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.activity.end();
    }
}
