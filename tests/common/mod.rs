//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::{body::Bytes, routing::get, routing::post, Router};
use graceful_http::config::ServerConfig;
use graceful_http::{DrainOutcome, HttpServer, ServerError, Shutdown};
use tokio::task::JoinHandle;

/// A running server under test.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<DrainOutcome, ServerError>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the drain result.
    pub async fn stop(self) -> Result<DrainOutcome, ServerError> {
        self.shutdown.trigger();
        self.handle.await.expect("server task panicked")
    }
}

/// Configuration bound to an ephemeral localhost port.
pub fn local_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.listen_address = "127.0.0.1:0".to_string();
    config
}

/// Routes used across the integration tests.
pub fn test_router() -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/echo", post(|body: Bytes| async move { body }))
        .route("/panic", get(panic_handler))
        .route(
            "/sleep/{millis}",
            get(|axum::extract::Path(millis): axum::extract::Path<u64>| async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                "done"
            }),
        )
}

/// Handler that always panics; explicit return type avoids never-type fallback.
async fn panic_handler() -> &'static str {
    panic!("handler fault")
}

/// Bind `config` and serve `router` until the returned server is stopped.
pub async fn start_server(config: ServerConfig, router: Router) -> TestServer {
    let mut server = HttpServer::new(config);
    server.set_router(router);
    let bound = server.bind().await.expect("bind failed");
    let addr = bound.local_addr();

    let shutdown = Shutdown::new();
    let termination = shutdown.termination();
    let handle = tokio::spawn(bound.run_until(termination));

    TestServer {
        addr,
        shutdown,
        handle,
    }
}

/// A client that never reuses connections between tests.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("client build failed")
}
