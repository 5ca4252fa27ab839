//! Graceful HTTP service runtime.
//!
//! Accepts connections, routes them through a composable middleware
//! pipeline, and on SIGINT/SIGTERM stops accepting and waits (bounded) for
//! in-flight connections before returning.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;

pub use config::schema::ServerConfig;
pub use http::{DrainOutcome, HttpServer, ServerError};
pub use lifecycle::Shutdown;
