//! Operational stats endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Pipeline statistics in JSON form.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Durable buffer state.
    pub buffer: BufferSection,
    /// Commit scheduler counters.
    pub commits: CommitSection,
    /// Remote snapshot state.
    pub snapshot: SnapshotSection,
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferSection {
    pub active_entries: usize,
    pub pending_segments: usize,
    pub pending_entries: usize,
    pub total_entries: usize,
    pub total_sealed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitSection {
    pub batches_committed: usize,
    pub entries_committed: usize,
    pub consecutive_failures: u32,
    pub scheduler_running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSection {
    pub registered_names: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_names: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_age_secs: Option<u64>,
}

/// `GET /api/v1/stats`
///
/// Returns operational statistics for the pipeline. This is the surface for
/// the main capacity concern: `pending_segments`/`pending_entries` growing
/// without bound means the remote store has been unreachable for a while.
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.pipeline.stats();

    Ok(Json(StatsResponse {
        buffer: BufferSection {
            active_entries: stats.buffer.active_entries,
            pending_segments: stats.buffer.pending_segments,
            pending_entries: stats.buffer.pending_entries,
            total_entries: stats.buffer.total_entries,
            total_sealed: stats.buffer.total_sealed,
        },
        commits: CommitSection {
            batches_committed: stats.scheduler.batches_committed,
            entries_committed: stats.scheduler.entries_committed,
            consecutive_failures: stats.scheduler.consecutive_failures,
            scheduler_running: stats.scheduler.is_running,
        },
        snapshot: SnapshotSection {
            registered_names: stats.dedupe.registered_names,
            snapshot_names: stats.dedupe.snapshot_names,
            snapshot_age_secs: stats.dedupe.snapshot_age.map(|d| d.as_secs()),
        },
    }))
}
