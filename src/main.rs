//! graceful-http server binary.
//!
//! Serves a small demo router behind the full middleware pipeline and
//! drains in-flight connections on SIGINT/SIGTERM.
//!
//! ```text
//! graceful-http --config server.toml
//! ```

use std::path::PathBuf;

use axum::{routing::get, Json, Router};
use clap::Parser;
use serde_json::json;

use graceful_http::config::{load_config, ServerConfig};
use graceful_http::observability::{logging, metrics};
use graceful_http::http::BasicCredentials;
use graceful_http::{DrainOutcome, HttpServer};

#[derive(Parser)]
#[command(name = "graceful-http")]
#[command(about = "HTTP server with connection draining on shutdown", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn demo_router() -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route(
            "/whoami",
            get(|credentials: BasicCredentials| async move {
                Json(json!({ "user": credentials.user }))
            }),
        )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    logging::init(&config.observability)?;

    tracing::info!(
        listen_address = %config.listener.listen_address,
        shutdown_secs = config.timeouts.shutdown_secs,
        compression = config.compression.enabled,
        cors = config.cors.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut server = HttpServer::new(config);
    server.set_router(demo_router());

    match server.run().await? {
        DrainOutcome::Drained => tracing::info!("Shutdown complete"),
        DrainOutcome::TimedOut { abandoned } => {
            tracing::warn!(abandoned, "Shutdown complete, drain timed out")
        }
    }
    Ok(())
}
