//! API route handlers for the reelgrab server.

pub mod download;
pub mod health;
pub mod info;
pub mod jobs;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET  /api/health - Health check with job and client counts
/// - POST /api/video-info - Metadata for one media URL
/// - POST /api/playlist-info - Flat playlist listing
/// - POST /api/batch-download - Metadata for many URLs
/// - POST /api/download - Convert and stream the finished file
/// - GET  /api/progress?clientId= - SSE progress feed
/// - POST /api/cancel - Cancel the client's active conversion
/// - GET  /api/jobs - Active job snapshots
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", info::router())
        .nest("/api", download::router())
        .nest("/api", jobs::router())
        .with_state(state)
}
