//! Access logging.
//!
//! One structured event per request, emitted after the inner chain
//! completes. Severity follows the status class: 4xx → WARN, 5xx → ERROR,
//! everything else DEBUG.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::Level;

use crate::http::request::X_REQUEST_ID;
use crate::observability::metrics;

/// Log level for a response status.
pub fn severity(status: StatusCode) -> Level {
    if status.is_server_error() {
        Level::ERROR
    } else if status.is_client_error() {
        Level::WARN
    } else {
        Level::DEBUG
    }
}

/// Middleware that logs method, path, client IP, status, latency and user agent.
pub async fn log_request(request: Request, next: Next) -> Response {
    let begin = Instant::now();

    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = header_str(&request, header::USER_AGENT.as_str());
    let request_id = header_str(&request, X_REQUEST_ID);

    let response = next.run(request).await;

    let latency = begin.elapsed();
    let status = response.status();
    metrics::record_request(method.as_str(), status.as_u16(), latency);

    macro_rules! access_log {
        ($level:expr) => {
            tracing::event!(
                $level,
                status = status.as_u16(),
                method = %method,
                path = %path,
                ip = %client_ip,
                latency = ?latency,
                user_agent = %user_agent,
                request_id = %request_id,
                "Request completed"
            )
        };
    }

    let level = severity(status);
    if level == Level::ERROR {
        access_log!(Level::ERROR);
    } else if level == Level::WARN {
        access_log!(Level::WARN);
    } else {
        access_log!(Level::DEBUG);
    }

    response
}

fn header_str(request: &Request, name: &str) -> String {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}
