//! Middleware used by the request pipeline.

pub mod cors;
pub mod decompress;
pub mod logging;
pub mod recovery;
