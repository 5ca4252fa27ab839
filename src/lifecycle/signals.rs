//! Termination signal sources.
//!
//! # Responsibilities
//! - Register SIGINT/SIGTERM handlers once per server run
//! - Translate signals and programmatic requests to [`Termination`] events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Streams are owned by the server instance, not installed globally
//! - A closed programmatic source never fires rather than firing spuriously

use std::io;

use tokio::sync::broadcast;

/// Why the server was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// SIGINT / Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// [`Shutdown::trigger`](crate::lifecycle::Shutdown::trigger).
    Requested,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Termination::Interrupt => "SIGINT",
            Termination::Terminate => "SIGTERM",
            Termination::Requested => "shutdown requested",
        };
        f.write_str(name)
    }
}

/// A stream of termination events.
#[derive(Debug)]
pub struct TerminationSignals {
    source: Source,
}

#[derive(Debug)]
enum Source {
    #[cfg(unix)]
    Os {
        interrupt: tokio::signal::unix::Signal,
        terminate: tokio::signal::unix::Signal,
    },
    #[cfg(not(unix))]
    CtrlC,
    Requested(broadcast::Receiver<()>),
}

impl TerminationSignals {
    /// Subscribe to the process's interrupt and terminate signals.
    #[cfg(unix)]
    pub fn os() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            source: Source::Os {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            },
        })
    }

    /// Subscribe to Ctrl+C.
    #[cfg(not(unix))]
    pub fn os() -> io::Result<Self> {
        Ok(Self {
            source: Source::CtrlC,
        })
    }

    /// Fire whenever the paired broadcast sender sends.
    pub fn requested(rx: broadcast::Receiver<()>) -> Self {
        Self {
            source: Source::Requested(rx),
        }
    }

    /// Wait for the next termination event.
    pub async fn recv(&mut self) -> Termination {
        match &mut self.source {
            #[cfg(unix)]
            Source::Os {
                interrupt,
                terminate,
            } => {
                tokio::select! {
                    Some(()) = interrupt.recv() => Termination::Interrupt,
                    Some(()) = terminate.recv() => Termination::Terminate,
                    else => std::future::pending().await,
                }
            }
            #[cfg(not(unix))]
            Source::CtrlC => match tokio::signal::ctrl_c().await {
                Ok(()) => Termination::Interrupt,
                Err(_) => std::future::pending().await,
            },
            Source::Requested(rx) => loop {
                match rx.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        break Termination::Requested
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        std::future::pending::<()>().await;
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use std::time::Duration;

    #[tokio::test]
    async fn requested_source_fires_on_trigger() {
        let shutdown = Shutdown::new();
        let mut signals = shutdown.termination();
        shutdown.trigger();
        assert_eq!(signals.recv().await, Termination::Requested);
    }

    #[tokio::test]
    async fn requested_source_fires_every_trigger() {
        let shutdown = Shutdown::new();
        let mut signals = shutdown.termination();
        shutdown.trigger();
        assert_eq!(signals.recv().await, Termination::Requested);
        shutdown.trigger();
        assert_eq!(signals.recv().await, Termination::Requested);
    }

    #[tokio::test]
    async fn closed_source_never_fires() {
        let shutdown = Shutdown::new();
        let mut signals = shutdown.termination();
        drop(shutdown);

        let waited = tokio::time::timeout(Duration::from_millis(50), signals.recv()).await;
        assert!(waited.is_err());
    }
}
