//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (shutdown wait > 0, addresses present)
//! - Reject CORS policies `tower-http` would refuse at runtime
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::{HeaderName, HeaderValue, Method};
use thiserror::Error;

use crate::config::schema::{CorsConfig, ServerConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.listen_address must not be empty")]
    EmptyListenAddress,
    #[error("timeouts.shutdown_secs must be greater than zero")]
    ZeroShutdownTimeout,
    #[error("cors.allowed_methods contains invalid method `{0}`")]
    InvalidCorsMethod(String),
    #[error("cors.allowed_origins contains invalid origin `{0}`")]
    InvalidCorsOrigin(String),
    #[error("cors.allowed_headers contains invalid header `{0}`")]
    InvalidCorsHeader(String),
    #[error("cors.allow_credentials cannot be combined with a `*` origin")]
    CredentialsWithWildcardOrigin,
    #[error("observability.metrics_address `{0}` is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Check a configuration for semantic problems.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.listen_address.trim().is_empty() {
        errors.push(ValidationError::EmptyListenAddress);
    }

    if config.timeouts.shutdown_secs == 0 {
        errors.push(ValidationError::ZeroShutdownTimeout);
    }

    if config.cors.enabled {
        validate_cors(&config.cors, &mut errors);
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_cors(cors: &CorsConfig, errors: &mut Vec<ValidationError>) {
    for method in &cors.allowed_methods {
        if method.parse::<Method>().is_err() {
            errors.push(ValidationError::InvalidCorsMethod(method.clone()));
        }
    }

    for origin in &cors.allowed_origins {
        if origin == "*" {
            if cors.allow_credentials {
                errors.push(ValidationError::CredentialsWithWildcardOrigin);
            }
        } else if HeaderValue::from_str(origin).is_err() {
            errors.push(ValidationError::InvalidCorsOrigin(origin.clone()));
        }
    }

    for header in &cors.allowed_headers {
        if header.parse::<HeaderName>().is_err() {
            errors.push(ValidationError::InvalidCorsHeader(header.clone()));
        }
    }
}
