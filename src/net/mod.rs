//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind with SO_REUSEPORT, accept, close + drain)
//!     → connection.rs (open-connection counting, closure reporting)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - The open-connection counter is lock-free; only the one-shot drain
//!   completion is guarded, by a compare-and-swap
//! - Connections report closure through a weak back-reference, so a
//!   connection never keeps its listener's state alive
//! - Close stops accepting before it starts waiting

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, DrainError, DrainTracker, TrackedStream};
pub use listener::{CloseHandle, DrainingListener, ListenerError};
