// crates/server/src/routes/download.rs
//! Conversion, progress and cancellation.
//!
//! - POST /download: run one conversion and stream the finished file
//! - GET /progress?clientId=: SSE stream of progress events for a client
//! - POST /cancel: cancel the client's active conversion

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use reelgrab_core::{CancelOutcome, ConversionRequest, HubMessage, OutputKind, Quality};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::routes::info::require_url;
use crate::state::AppState;

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: String,
    pub format: Option<String>,
    pub resolution: Option<String>,
    pub client_id: Option<String>,
}

impl DownloadRequest {
    /// Validate and convert into the orchestrator's request.
    pub fn into_conversion(self) -> ApiResult<ConversionRequest> {
        let locator = require_url(&self.url)?.to_string();
        let kind = match self.format.as_deref() {
            Some(format) if !format.trim().is_empty() => format
                .parse::<OutputKind>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
            _ => OutputKind::default(),
        };
        let quality = match self.resolution.as_deref() {
            Some(resolution) if !resolution.trim().is_empty() => resolution
                .parse::<Quality>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
            _ => Quality::Best,
        };
        Ok(ConversionRequest {
            locator,
            client_id: self.client_id,
            kind,
            quality,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientQuery {
    pub client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    #[serde(default)]
    pub client_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub success: bool,
    pub cancelled: bool,
}

/// `Content-Disposition` with an ASCII fallback and the RFC 5987 UTF-8 name.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii() && c != '"' && c != '\\' { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

/// POST /api/download: the response body is the converted file.
///
/// Dropping this future (client gone) kills the tool and removes the
/// artifact.
async fn download(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DownloadRequest>,
) -> ApiResult<Response> {
    let request = body.into_conversion()?;
    let delivery = state.service.start_conversion(request).await?;

    Response::builder()
        .header(header::CONTENT_TYPE, delivery.content_type)
        .header(header::CONTENT_LENGTH, delivery.content_length)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&delivery.filename),
        )
        .body(Body::from_stream(delivery.stream))
        .map_err(|e| ApiError::Internal(format!("Failed to build download response: {e}")))
}

/// GET /api/progress?clientId=: SSE progress feed.
///
/// Opens with a comment frame so proxies flush headers, then one `data:`
/// frame per event. A newer subscription for the same client id ends this
/// stream.
async fn progress(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientQuery>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let client_id = query
        .client_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("clientId is required".to_string()))?;

    let mut subscription = state.service.subscribe(&client_id);
    tracing::debug!(client_id = %client_id, "Progress stream opened");

    let stream = async_stream::stream! {
        while let Some(message) = subscription.recv().await {
            match message {
                HubMessage::KeepAlive => yield Ok(Event::default().comment("")),
                HubMessage::Event(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok(Event::default().data(json));
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE)))
}

/// POST /api/cancel
async fn cancel(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CancelRequest>,
) -> ApiResult<Json<CancelResponse>> {
    let client_id = body.client_id.trim();
    if client_id.is_empty() {
        return Err(ApiError::BadRequest("clientId is required".to_string()));
    }
    match state.service.cancel(client_id) {
        CancelOutcome::Accepted => Ok(Json(CancelResponse {
            success: true,
            cancelled: true,
        })),
        CancelOutcome::NotFound => Err(ApiError::NoActiveJob(client_id.to_string())),
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/download", post(download))
        .route("/progress", get(progress))
        .route("/cancel", post(cancel))
}
