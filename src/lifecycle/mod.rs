//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (http::server):
//!     Bind listener → Spawn accept loop → Serving
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT or Shutdown::trigger
//!         → Draining: disable keep-alive → stop accept → drain connections
//!         → Stopped
//! ```
//!
//! # Design Decisions
//! - Fail fast: bind errors are fatal and not retried
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: connections still open at the deadline are abandoned
//! - Shutdown is one-shot; signals received while draining are ignored

pub mod shutdown;
pub mod signals;
pub mod state;

pub use shutdown::Shutdown;
pub use signals::{Termination, TerminationSignals};
pub use state::ServerState;
