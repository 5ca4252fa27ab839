//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the HTTP server.
///
/// Read once when the server is constructed and never mutated afterwards.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, socket options).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Per-client and per-connection limits.
    pub limits: LimitsConfig,

    /// Response compression and request decompression.
    pub compression: CompressionConfig,

    /// CORS policy.
    pub cors: CorsConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Listen address (e.g., "0.0.0.0:8080").
    pub listen_address: String,

    /// Set SO_REUSEPORT so several processes can share the port.
    pub reuse_port: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            reuse_port: true,
        }
    }
}

/// Timeout configuration. A value of zero disables the timeout,
/// except for `shutdown_secs` which must be positive.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed for a client to send request headers.
    pub read_secs: u64,

    /// Time allowed for the handler to produce a response.
    pub write_secs: u64,

    /// Keep-alive connections with no request in flight are closed after this.
    pub idle_secs: u64,

    /// Maximum time to wait for in-flight connections during shutdown.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_secs: 10,
            write_secs: 30,
            idle_secs: 60,
            shutdown_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.read_secs)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.write_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.idle_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Connection and request limits. Zero means unlimited.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent connections from a single client IP.
    pub max_conns_per_ip: usize,

    /// Maximum requests served on one connection before it is closed.
    pub max_requests_per_conn: usize,

    /// Largest request body buffered for decompression.
    pub max_request_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_conns_per_ip: 0,
            max_requests_per_conn: 0,
            max_request_body_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Compression configuration.
///
/// When enabled, responses are compressed according to `Accept-Encoding`
/// and compressed request bodies are decoded before reaching handlers.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS enforcement.
    pub enabled: bool,

    /// Allowed origins. Empty mirrors the request origin.
    pub allowed_origins: Vec<String>,

    /// Allowed methods for cross-origin requests.
    pub allowed_methods: Vec<String>,

    /// Allowed request headers. Empty mirrors the preflight request.
    pub allowed_headers: Vec<String>,

    /// Send `Access-Control-Allow-Credentials: true`.
    pub allow_credentials: bool,

    /// Preflight cache duration in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: Vec::new(),
            allowed_methods: ["HEAD", "GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: Vec::new(),
            allow_credentials: true,
            max_age_secs: 5600,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub log_filter: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Expose Prometheus metrics.
    pub metrics_enabled: bool,

    /// Metrics listener address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "graceful_http=debug,tower_http=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.listen_address, "0.0.0.0:8080");
        assert!(config.listener.reuse_port);
        assert_eq!(config.timeouts.shutdown_timeout(), Duration::from_secs(30));
        assert!(!config.compression.enabled);
        assert!(!config.cors.enabled);
        assert_eq!(config.cors.max_age_secs, 5600);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [listener]
            listen_address = "127.0.0.1:9000"

            [timeouts]
            idle_secs = 0
            shutdown_secs = 5

            [cors]
            enabled = true
            allowed_methods = ["GET"]

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.listen_address, "127.0.0.1:9000");
        assert_eq!(config.timeouts.idle_timeout(), None);
        assert_eq!(config.timeouts.read_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.timeouts.shutdown_timeout(), Duration::from_secs(5));
        assert!(config.cors.enabled);
        assert_eq!(config.cors.allowed_methods, vec!["GET".to_string()]);
        assert!(config.cors.allow_credentials);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
