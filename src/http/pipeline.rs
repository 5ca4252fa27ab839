//! Middleware composition around the application router.
//!
//! # Layer Order
//! ```text
//! outermost  CORS                    (cors.enabled)
//!            response compression    (compression.enabled)
//!            request id
//!            access logging
//!            panic recovery
//!            request decompression   (compression.enabled)
//!            response deadline       (timeouts.write_secs > 0)
//! innermost  application router
//! ```
//!
//! Axum applies `.layer` calls inside-out, so `wrap` adds them from the
//! innermost outwards.

use std::time::Duration;

use axum::{
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};

use crate::config::{CorsConfig, ServerConfig};
use crate::http::middleware::{cors, decompress, logging, recovery};
use crate::http::request::UuidRequestId;

/// The configured middleware stack.
#[derive(Debug, Clone)]
pub struct Pipeline {
    compression: bool,
    cors: Option<CorsConfig>,
    response_timeout: Option<Duration>,
    max_request_body: usize,
}

impl Pipeline {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            compression: config.compression.enabled,
            cors: config.cors.enabled.then(|| config.cors.clone()),
            response_timeout: config.timeouts.write_timeout(),
            max_request_body: config.limits.max_request_body_bytes,
        }
    }

    /// Wrap `app` in every enabled layer.
    pub fn wrap(&self, app: Router) -> Router {
        let mut router = app;

        if let Some(timeout) = self.response_timeout {
            router = router.layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                timeout,
            ));
        }

        if self.compression {
            router = router.layer(from_fn_with_state(
                self.max_request_body,
                decompress::decompress_request,
            ));
        }

        router = router
            .layer(CatchPanicLayer::custom(recovery::panic_response))
            .layer(from_fn(logging::log_request))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId));

        if self.compression {
            router = router.layer(CompressionLayer::new());
        }

        if let Some(cors_config) = &self.cors {
            router = router.layer(cors::cors_layer(cors_config));
        }

        tracing::debug!(
            compression = self.compression,
            cors = self.cors.is_some(),
            response_timeout = ?self.response_timeout,
            "Middleware pipeline assembled"
        );

        router
    }
}
