//! API route definitions.

mod health;
mod recipes;
mod stats;

use axum::Router;
use axum::middleware;
use axum::routing::{get, put};

use crate::auth::require_auth;
use crate::state::AppState;

/// Build the complete API router.
///
/// # Route Structure
///
/// ## Public (no auth)
/// - `GET /health` - Health check
///
/// ## Protected (auth required)
/// - `GET /api/v1/ping` - Token check
/// - `PUT /api/v1/recipes` - Submit a recipe
/// - `GET /api/v1/stats` - Pipeline statistics
pub fn router(state: AppState) -> Router {
    // Public routes (no authentication)
    let public = Router::new().route("/health", get(health::health_check));

    // Protected API routes
    let api_v1 = Router::new()
        .route("/ping", get(health::authenticated_ping))
        .route("/recipes", put(recipes::submit))
        .route("/stats", get(stats::stats))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public)
        .nest("/api/v1", api_v1)
        .with_state(state)
}
