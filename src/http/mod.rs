//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Tracked TCP connection
//!     → serve.rs (hyper HTTP/1.1 + HTTP/2, keep-alive and idle control)
//!     → pipeline.rs (CORS → compression → request id → logging
//!                    → recovery → decompression → deadline)
//!     → application Router
//!     → response back through the same layers
//! ```
//!
//! server.rs owns the lifecycle around all of this.

pub mod auth;
pub mod middleware;
pub mod pipeline;
pub mod request;
pub(crate) mod serve;
pub mod server;

pub use auth::BasicCredentials;
pub use pipeline::Pipeline;
pub use request::X_REQUEST_ID;
pub use server::{BoundServer, DrainOutcome, HttpServer, ServerError};
