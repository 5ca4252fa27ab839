//! Panic recovery.
//!
//! The boundary itself is `tower-http`'s `CatchPanicLayer`; this module
//! supplies the fixed response it returns and logs the panic payload.

use std::any::Any;

use axum::{
    body::Body,
    http::{header, HeaderValue, Response, StatusCode},
};

/// Body of the response returned when a handler panics.
pub const INTERNAL_ERROR_BODY: &str = "internal server error";

/// Convert a caught panic into a fixed 500 response.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else {
        "non-string panic payload"
    };
    tracing::error!(panic = %detail, "Recovered from handler panic");

    let mut response = Response::new(Body::from(INTERNAL_ERROR_BODY));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
