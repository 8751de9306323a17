// crates/server/src/routes/info.rs
//! Metadata lookups.
//!
//! - POST /video-info: single media metadata
//! - POST /playlist-info: flat playlist listing
//! - POST /batch-download: metadata for many URLs at once

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use reelgrab_core::{BatchFailure, BatchItem, PlaylistEntry};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfoResponse {
    pub success: bool,
    pub title: String,
    pub thumbnail: String,
    pub duration: f64,
    pub resolutions: Vec<String>,
    pub has_audio_only: bool,
    pub audio_qualities: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistResponse {
    pub success: bool,
    pub title: String,
    pub item_count: usize,
    pub entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub results: Vec<BatchItem>,
    pub errors: Vec<BatchFailure>,
}

pub(crate) fn require_url(url: &str) -> ApiResult<&str> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ApiError::BadRequest("URL is required".to_string()));
    }
    Ok(url)
}

/// POST /api/video-info
async fn video_info(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UrlRequest>,
) -> ApiResult<Json<VideoInfoResponse>> {
    let url = require_url(&body.url)?;
    let info = state.service.fetch_metadata(url).await?;
    tracing::info!(url, title = %info.title, "Video info fetched");

    Ok(Json(VideoInfoResponse {
        success: true,
        title: info.title,
        thumbnail: info.thumbnail_url,
        duration: info.duration_seconds,
        resolutions: info.available_qualities,
        has_audio_only: info.has_audio_only,
        audio_qualities: info.audio_qualities,
    }))
}

/// POST /api/playlist-info
async fn playlist_info(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UrlRequest>,
) -> ApiResult<Json<PlaylistResponse>> {
    let url = require_url(&body.url)?;
    let playlist = state.service.fetch_playlist(url).await?;

    Ok(Json(PlaylistResponse {
        success: true,
        title: playlist.title,
        item_count: playlist.entries.len(),
        entries: playlist.entries,
    }))
}

/// POST /api/batch-download
async fn batch_info(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchRequest>,
) -> ApiResult<Json<BatchResponse>> {
    if body.urls.is_empty() {
        return Err(ApiError::BadRequest("At least one URL is required".to_string()));
    }
    let max = state.config.max_batch_items;
    if body.urls.len() > max {
        return Err(ApiError::BadRequest(format!("At most {max} URLs per batch")));
    }

    let outcome = state.service.fetch_batch(body.urls).await;
    Ok(Json(BatchResponse {
        success: true,
        results: outcome.results,
        errors: outcome.errors,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/video-info", post(video_info))
        .route("/playlist-info", post(playlist_info))
        .route("/batch-download", post(batch_info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_url() {
        assert_eq!(require_url("  https://a.test/v ").unwrap(), "https://a.test/v");
        assert!(matches!(require_url("   "), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_video_info_wire_names() {
        let response = VideoInfoResponse {
            success: true,
            title: "t".into(),
            thumbnail: String::new(),
            duration: 3.0,
            resolutions: vec!["best".into()],
            has_audio_only: true,
            audio_qualities: vec![],
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["hasAudioOnly"], true);
        assert!(json.get("audioQualities").is_some());
        assert_eq!(json["resolutions"][0], "best");
    }
}
