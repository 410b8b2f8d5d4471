//! Recipe submission endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use larder_core::Recipe;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Response body for an accepted submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    /// The accepted recipe name.
    pub name: String,
    /// Segment the record was buffered into.
    pub segment: u64,
    /// Position within that segment.
    pub sequence: u64,
}

/// `PUT /api/v1/recipes`
///
/// Submit a recipe for ingestion. On success the record is durably buffered
/// and `202 Accepted` is returned; the commit to the remote dataset happens
/// asynchronously.
///
/// # Errors
///
/// - `400` - field validation failed
/// - `409` - a recipe with this name already exists (buffered or remote)
/// - `503` - the remote dataset cannot be consulted safely right now
pub async fn submit(
    State(state): State<AppState>,
    Json(recipe): Json<Recipe>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let name = recipe.name.clone();
    let handle = state.pipeline.submit(recipe).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            name,
            segment: handle.segment.0,
            sequence: handle.sequence,
        }),
    ))
}
