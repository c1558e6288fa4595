//! Chunked ingestion API - main entry point.
//!
//! Handles:
//! - Application configuration loading
//! - Logging initialization
//! - Bootstrap and dependency injection (composition root)
//! - Axum server setup and routing
//! - Graceful shutdown handling

mod app_state;
mod auth;
mod bootstrap;
mod config;
mod handlers;

use crate::app_state::AppState;
use crate::config::Config;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use std::time::Duration;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = Config::from_env();
    config.validate()?;

    initialize_logging(&config)?;

    info!("starting chunked ingestion API");
    info!("server: {}", config.server_address());
    info!("uploads path: {}", config.ingestion.uploads_path);
    info!("chunk size: {} bytes", config.ingestion.chunk_size);

    let app_state = bootstrap::bootstrap(&config).await.map_err(|e| {
        eprintln!("bootstrap failed: {e}");
        std::process::exit(1);
    })?;

    let app = build_router(app_state, &config);

    let listener = tokio::net::TcpListener::bind(config.server_address()).await?;
    let addr = listener.local_addr()?;

    info!("ingestion API is ready");
    info!("listening on http://{addr}");
    info!("health check: http://{addr}/health");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("ingestion API shut down gracefully");
    Ok(())
}

fn initialize_logging(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ingestion_api={0},ingestion={0},kernel={0}", config.logging.level)));

    match config.logging.format.as_str() {
        "json" => {
            tracing_subscriber::registry().with(env_filter).with(fmt::layer().json()).init();
        }
        "compact" => {
            tracing_subscriber::registry().with(env_filter).with(fmt::layer().compact()).init();
        }
        _ => {
            tracing_subscriber::registry().with(env_filter).with(fmt::layer().pretty()).init();
        }
    }

    Ok(())
}

/// Builds the full Axum router: health probe, the chunked-upload REST
/// surface, and the progress push channel, layered with the same
/// trace/timeout/CORS stack the rest of the pack wires in this order.
///
/// `DefaultBodyLimit` is raised to `SERVER_MAX_BODY_SIZE` (default 100MiB)
/// so a chunk near spec.md §6's 10MiB-per-chunk ceiling plus multipart
/// framing overhead doesn't trip axum's 2MiB built-in default first.
fn build_router(app_state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::health_check))
        .nest("/chunked", chunked_routes())
        .route("/ws/upload-progress", get(handlers::ws::upgrade))
        .with_state(app_state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs)))
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(config.server.max_body_size))
}

/// The chunked ingestion REST surface (spec.md §6), nested under `/chunked`.
fn chunked_routes() -> Router<AppState> {
    use handlers::chunked::{cancel, complete, init, resume, status, upload_chunk, validate};

    Router::new()
        .route("/init", post(init))
        .route("/upload/{fileId}/{chunkIndex}", post(upload_chunk))
        .route("/resume/{fileId}", get(resume))
        .route("/complete/{fileId}", post(complete))
        .route("/{fileId}", delete(cancel))
        .route("/status/{fileId}", get(status))
        .route("/validate/{fileId}", post(validate))
}

/// Listens for SIGTERM/SIGINT and returns once one arrives, so
/// `axum::serve` can drain in-flight requests before exiting.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("received Ctrl+C signal"),
        _ = terminate => warn!("received SIGTERM signal"),
    }

    info!("starting graceful shutdown...");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn bootstrap_with_default_config_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.ingestion.uploads_path = dir.path().to_string_lossy().to_string();

        let result = bootstrap::bootstrap(&config).await;
        assert!(result.is_ok(), "bootstrap should succeed");
    }
}
