// crates/server/src/routes/jobs.rs
//! API routes for active conversion jobs.
//!
//! - GET /jobs: List all active jobs

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use reelgrab_core::JobSnapshot;
use std::sync::Arc;

use crate::state::AppState;

/// GET /api/jobs: List all active jobs, oldest first.
async fn list_jobs(State(state): State<Arc<AppState>>) -> axum::Json<Vec<JobSnapshot>> {
    axum::Json(state.service.registry().snapshot())
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/jobs", get(list_jobs))
}
