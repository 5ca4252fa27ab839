//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Wrap the application router in the middleware pipeline
//! - Bind the listener with port reuse
//! - Run the accept loop on its own task
//! - Wait for a termination signal or a fatal accept error
//! - Drain in-flight connections and report the outcome

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::config::ServerConfig;
use crate::http::pipeline::Pipeline;
use crate::http::serve::{accept_loop, ConnectionSettings};
use crate::lifecycle::{ServerState, TerminationSignals};
use crate::net::connection::DrainError;
use crate::net::listener::{self, CloseHandle, DrainingListener, ListenerError};
use crate::observability::metrics;
use crate::security::limits::ConnectionLimiter;

/// Fatal server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// No router was attached before starting.
    #[error("router is nil")]
    MissingRouter,
    /// The listen address could not be bound.
    #[error(transparent)]
    Bind(ListenerError),
    /// The accept loop failed.
    #[error("listener error: {0}")]
    Serve(#[source] ListenerError),
    /// Signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),
}

/// How a shutdown ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight connection finished before the deadline.
    Drained,
    /// The deadline passed with connections still open; they were abandoned.
    TimedOut { abandoned: u64 },
}

/// HTTP server with graceful shutdown.
pub struct HttpServer {
    config: Arc<ServerConfig>,
    router: Option<Router>,
    state: watch::Sender<ServerState>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let (state, _) = watch::channel(ServerState::Idle);
        Self {
            config: Arc::new(config),
            router: None,
            state,
        }
    }

    /// Attach the application router, wrapped in the configured pipeline.
    pub fn set_router(&mut self, router: Router) -> &mut Self {
        self.router = Some(Pipeline::from_config(&self.config).wrap(router));
        self
    }

    /// Observe lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Bind the listen address. Bind failures are fatal and not retried.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let router = self.router.ok_or_else(|| {
            tracing::error!("Server started without a router");
            ServerError::MissingRouter
        })?;

        let inner = listener::bind(&self.config.listener).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to bind listener");
            set_state(&self.state, ServerState::ErrorStopped);
            ServerError::Bind(e)
        })?;
        let local_addr = inner.local_addr().map_err(|source| {
            ServerError::Bind(ListenerError::Bind {
                address: self.config.listener.listen_address.clone(),
                source,
            })
        })?;

        let (listener, close) =
            DrainingListener::new(inner, self.config.timeouts.shutdown_timeout());

        Ok(BoundServer {
            config: self.config,
            router,
            listener,
            close,
            local_addr,
            state: self.state,
        })
    }

    /// Bind and serve until SIGINT or SIGTERM, then drain.
    pub async fn run(self) -> Result<DrainOutcome, ServerError> {
        let signals = TerminationSignals::os().map_err(ServerError::Signals)?;
        self.bind().await?.run_until(signals).await
    }
}

fn set_state(state: &watch::Sender<ServerState>, next: ServerState) {
    let previous = state.send_replace(next);
    debug_assert!(!previous.is_terminal(), "state changed after {previous}");
    tracing::debug!(from = %previous, to = %next, "Server state changed");
}

/// A server whose listener is bound but not yet accepting.
pub struct BoundServer {
    config: Arc<ServerConfig>,
    router: Router,
    listener: DrainingListener,
    close: CloseHandle,
    local_addr: SocketAddr,
    state: watch::Sender<ServerState>,
}

impl BoundServer {
    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Observe lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Serve until the first termination event, then drain.
    ///
    /// Returns `Err` only if the accept loop fails. A drain that hits the
    /// shutdown deadline is logged and reported as [`DrainOutcome::TimedOut`].
    pub async fn run_until(
        self,
        mut termination: TerminationSignals,
    ) -> Result<DrainOutcome, ServerError> {
        let BoundServer {
            config,
            router,
            listener,
            close,
            local_addr,
            state,
        } = self;

        let (draining_tx, draining_rx) = watch::channel(false);
        let (error_tx, mut error_rx) = mpsc::channel::<ListenerError>(1);

        let settings = Arc::new(ConnectionSettings::from_config(&config));
        let limiter = ConnectionLimiter::new(config.limits.max_conns_per_ip);

        tokio::spawn(async move {
            if let Err(e) = accept_loop(listener, router, settings, limiter, draining_rx).await {
                let _ = error_tx.send(e).await;
            }
        });

        set_state(&state, ServerState::Serving);
        tracing::info!(address = %local_addr, "HTTP server started");

        let signal = tokio::select! {
            Some(e) = error_rx.recv() => {
                tracing::error!(error = %e, "Listener error");
                set_state(&state, ServerState::ErrorStopped);
                return Err(ServerError::Serve(e));
            }
            signal = termination.recv() => signal,
        };

        tracing::info!(
            signal = %signal,
            open_connections = close.open_connections(),
            "Shutdown signal received"
        );
        set_state(&state, ServerState::Draining);

        // Connections stop keeping alive before the listener closes.
        draining_tx.send_replace(true);

        let drain = close.close();
        tokio::pin!(drain);
        let result = loop {
            tokio::select! {
                result = &mut drain => break result,
                ignored = termination.recv() => {
                    tracing::debug!(signal = %ignored, "Already draining, signal ignored");
                }
            }
        };

        let outcome = match result {
            Ok(()) => {
                tracing::info!(address = %local_addr, "Server gracefully stopped");
                DrainOutcome::Drained
            }
            Err(DrainError::Timeout { open, .. }) => {
                metrics::record_drain_timeout();
                tracing::warn!(
                    address = %local_addr,
                    abandoned = open,
                    "Server stopped with connections still open"
                );
                DrainOutcome::TimedOut { abandoned: open }
            }
        };

        set_state(&state, ServerState::Stopped);
        Ok(outcome)
    }
}
