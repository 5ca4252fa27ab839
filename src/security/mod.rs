//! Connection admission limits.
//!
//! # Design Decisions
//! - Limits are enforced at accept time, before hyper sees the connection
//! - Zero disables a limit

pub mod limits;
