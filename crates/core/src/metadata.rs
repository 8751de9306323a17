// crates/core/src/metadata.rs
//! Metadata-only tool runs and shaping of the JSON they print.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{DownloadError, ProcessError, UpstreamKind};
use crate::process::{self, OutputStream};
use crate::tool::{watch_url, ToolInvocation};

/// Longest slice of tool stderr that is ever logged.
pub const STDERR_LOG_LIMIT: usize = 500;

const MIN_LISTED_HEIGHT: u32 = 144;
const DEFAULT_ABR_KBPS: u32 = 128;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    pub title: String,
    pub duration_seconds: f64,
    pub thumbnail_url: String,
    /// `"1080p"`, `"720p"`, ... highest first, or `["best"]`.
    pub available_qualities: Vec<String>,
    pub has_audio_only: bool,
    pub audio_qualities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistEntry {
    pub id: String,
    pub title: String,
    pub url: String,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistInfo {
    pub title: String,
    pub entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItem {
    pub url: String,
    pub title: String,
    pub thumbnail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<BatchItem>,
    pub errors: Vec<BatchFailure>,
}

#[derive(Debug, Deserialize)]
struct RawVideo {
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    formats: Option<Vec<RawFormat>>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    height: Option<f64>,
    ext: Option<String>,
    acodec: Option<String>,
    abr: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawPlaylist {
    title: Option<String>,
    entries: Option<Vec<Option<RawEntry>>>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
    thumbnails: Option<Vec<RawThumbnail>>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: Option<String>,
}

/// Cut `s` to at most `max` bytes on a char boundary.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Run a metadata invocation and return its stdout.
///
/// A run that outlives `timeout` is tree-killed and reported as
/// [`UpstreamKind::CannotConnect`]. A non-zero exit is classified from stderr.
pub async fn run_json(invocation: &ToolInvocation, timeout: Duration) -> Result<Vec<u8>, DownloadError> {
    let started = Instant::now();
    let mut handle = process::start(&invocation.program, &invocation.args, &invocation.envs)?;
    let killer = handle.killer();
    let mut output = handle
        .take_output()
        .ok_or(ProcessError::MissingPipe { stream: "output" })?;

    let collect = async {
        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        while let Some(chunk) = output.recv().await {
            let chunk = chunk.map_err(ProcessError::Io)?;
            match chunk.stream {
                OutputStream::Stdout => stdout.extend_from_slice(&chunk.data),
                OutputStream::Stderr => stderr.extend_from_slice(&chunk.data),
            }
        }
        let exit = handle.wait().await;
        Ok::<_, ProcessError>((stdout, stderr, exit))
    };

    match tokio::time::timeout(timeout, collect).await {
        Err(_) => {
            killer.kill();
            tracing::warn!(
                pid = killer.pid(),
                timeout_secs = timeout.as_secs(),
                "Metadata fetch timed out"
            );
            Err(DownloadError::Upstream {
                kind: UpstreamKind::CannotConnect,
                detail: format!("metadata fetch timed out after {}s", timeout.as_secs()),
            })
        }
        Ok(Err(e)) => {
            killer.kill();
            Err(e.into())
        }
        Ok(Ok((stdout, stderr, exit))) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            if exit.success() {
                tracing::debug!(duration_ms, bytes = stdout.len(), "Metadata fetched");
                return Ok(stdout);
            }

            let stderr = String::from_utf8_lossy(&stderr);
            let kind = UpstreamKind::classify(&stderr);
            let detail = truncate_utf8(stderr.trim(), STDERR_LOG_LIMIT).to_string();
            tracing::error!(
                exit_code = ?exit.shell_code(),
                duration_ms,
                ?kind,
                stderr = %detail,
                "Metadata fetch failed"
            );
            Err(DownloadError::Upstream { kind, detail })
        }
    }
}

pub fn parse_media_info(json: &[u8]) -> Result<MediaInfo, DownloadError> {
    let raw: RawVideo =
        serde_json::from_slice(json).map_err(|e| DownloadError::MalformedMetadata(e.to_string()))?;
    let formats = raw.formats.unwrap_or_default();

    let heights: BTreeSet<u32> = formats
        .iter()
        .filter_map(|f| f.height)
        .filter(|h| h.is_finite() && *h >= f64::from(MIN_LISTED_HEIGHT))
        .map(|h| h as u32)
        .collect();
    let mut available_qualities: Vec<String> = heights.iter().rev().map(|h| format!("{h}p")).collect();
    if available_qualities.is_empty() {
        available_qualities.push("best".to_string());
    }

    let has_audio_only = formats
        .iter()
        .any(|f| matches!(f.ext.as_deref(), Some("m4a" | "mp3" | "webm")));

    let mut audio_qualities: Vec<String> = Vec::new();
    for format in &formats {
        let is_aac = format
            .acodec
            .as_deref()
            .is_some_and(|c| c.starts_with("mp4a") || c == "aac");
        if !is_aac {
            continue;
        }
        let kbps = format
            .abr
            .filter(|abr| abr.is_finite() && *abr > 0.0)
            .map(|abr| abr.round() as u32)
            .unwrap_or(DEFAULT_ABR_KBPS);
        let label = format!("{kbps}kbps");
        if !audio_qualities.contains(&label) {
            audio_qualities.push(label);
        }
    }

    Ok(MediaInfo {
        title: raw.title.unwrap_or_else(|| "Unknown Title".to_string()),
        duration_seconds: raw.duration.unwrap_or(0.0),
        thumbnail_url: raw.thumbnail.unwrap_or_default(),
        available_qualities,
        has_audio_only,
        audio_qualities,
    })
}

pub fn parse_playlist(json: &[u8]) -> Result<PlaylistInfo, DownloadError> {
    let raw: RawPlaylist =
        serde_json::from_slice(json).map_err(|e| DownloadError::MalformedMetadata(e.to_string()))?;
    let Some(entries) = raw.entries else {
        return Err(DownloadError::Upstream {
            kind: UpstreamKind::Unknown,
            detail: "Invalid playlist or no entries found".to_string(),
        });
    };

    let entries = entries
        .into_iter()
        .flatten()
        .map(|entry| {
            let id = entry.id.unwrap_or_default();
            PlaylistEntry {
                url: entry.url.unwrap_or_else(|| watch_url(&id)),
                title: entry.title.unwrap_or_else(|| "Unknown Title".to_string()),
                duration: entry.duration,
                thumbnail: entry
                    .thumbnails
                    .and_then(|thumbs| thumbs.into_iter().last())
                    .and_then(|t| t.url),
                id,
            }
        })
        .collect();

    Ok(PlaylistInfo {
        title: raw.title.unwrap_or_else(|| "Unknown Playlist".to_string()),
        entries,
    })
}
