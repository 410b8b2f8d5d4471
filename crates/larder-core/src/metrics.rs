//! Prometheus metrics helpers for the larder system.
//!
//! This module provides centralized metrics initialization and the metric
//! descriptions used across larder components.
//!
//! # Usage
//!
//! ```rust,ignore
//! use larder_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Initialize the Prometheus recorder
//!     let handle = init_metrics();
//!
//!     // Start the HTTP server for /metrics endpoint
//!     start_metrics_server(9091, handle).await.unwrap();
//!
//!     // Now use metrics anywhere in your code
//!     use metrics::{counter, gauge};
//!     counter!("submit_accepted_total").increment(1);
//!     gauge!("buffer_pending_segments").set(2.0);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (e.g., `submit_`, `segment_`, `commit_`)
//! - Suffix: unit or type (e.g., `_total`, `_seconds`)
//! - Labels: use sparingly to avoid cardinality explosion

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
/// Returns a handle that can be used with [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if the recorder is already
/// installed, instead of panicking. Useful for tests or optional metrics.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves the `/metrics` endpoint on the specified port.
/// This spawns a background task and returns immediately.
///
/// # Arguments
///
/// * `port` - TCP port to listen on (e.g., 9091)
/// * `handle` - Prometheus handle from [`init_metrics`]
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server exited: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics used across larder.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    // =========================================================================
    // Submission Path Metrics
    // =========================================================================

    describe_counter!(
        "submit_accepted_total",
        "Recipes accepted into the durable buffer"
    );
    describe_counter!(
        "submit_duplicate_total",
        "Submissions rejected because the name already exists"
    );
    describe_counter!(
        "submit_failed_total",
        "Submissions that failed with a local write fault"
    );

    // =========================================================================
    // Durable Buffer Metrics
    // =========================================================================

    describe_counter!(
        "segment_entries_written_total",
        "Entries appended to segment files"
    );
    describe_counter!("segment_sealed_total", "Number of segments sealed");
    describe_counter!(
        "segment_deleted_total",
        "Sealed segments deleted after a confirmed commit"
    );
    describe_gauge!(
        "buffer_active_entries",
        "Entries in the current active segment"
    );
    describe_gauge!(
        "buffer_pending_segments",
        "Sealed segments awaiting a successful commit"
    );
    describe_gauge!(
        "buffer_pending_entries",
        "Entries in sealed segments awaiting a successful commit"
    );

    // =========================================================================
    // Commit Scheduler Metrics
    // =========================================================================

    describe_counter!(
        "commit_batches_total",
        "Commit batches durably accepted by the remote store"
    );
    describe_counter!(
        "commit_entries_total",
        "Entries committed to the remote store"
    );
    describe_counter!(
        "commit_failures_total",
        "Commit attempts that failed (label: kind)"
    );
    describe_histogram!(
        "commit_duration_seconds",
        "Time spent on remote batch commits"
    );

    // =========================================================================
    // Remote Snapshot Metrics
    // =========================================================================

    describe_counter!(
        "snapshot_refresh_total",
        "Successful remote snapshot refreshes"
    );
    describe_counter!(
        "snapshot_refresh_failures_total",
        "Failed remote snapshot refreshes"
    );
    describe_gauge!(
        "snapshot_names",
        "Names in the cached remote snapshot"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    // Ensure metrics are initialized exactly once for all tests
    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();

        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_register_common_metrics_does_not_panic() {
        ensure_metrics_init();
        register_common_metrics();
        register_common_metrics();
    }
}
