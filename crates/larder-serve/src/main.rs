//! Larder Serve - HTTP API server for recipe submission.
//!
//! This binary starts the submission API in front of the larder ingestion
//! pipeline: it recovers the durable buffer, starts the background commit
//! scheduler, and serves the HTTP surface.
//!
//! # Graceful Shutdown
//!
//! On SIGINT (Ctrl+C) the server stops accepting requests, the scheduler is
//! stopped, and one final flush attempt drains whatever is buffered. Records
//! that cannot be flushed stay on disk and are recovered on the next start.

use axum::http::Request;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use larder_core::metrics::{init_metrics, start_metrics_server};
use larder_serve::{AppState, Config, router};

/// Larder API server for recipe submission.
#[derive(Parser, Debug)]
#[command(name = "larder-serve")]
#[command(about = "HTTP API server for recipe submission", long_about = None)]
#[command(version)]
struct Args {
    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load .env file if it exists
    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let bind_addr = config.bind_addr.clone();
    let metrics_port = config.metrics_port;

    // Initialize metrics
    if metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(metrics_port, metrics_handle).await?;
    }

    // Create application state and start the pipeline
    let state = AppState::new(config)?;
    state.pipeline.start();
    let pipeline = state.pipeline.clone();

    // Build router with middleware
    let app = router(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the scheduler and flush whatever is still buffered
    tracing::info!("shutting down pipeline");
    pipeline.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("shutdown signal received");
}
