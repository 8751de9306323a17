// crates/core/src/tool.rs
//! Argument construction for the external conversion tool (yt-dlp).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::error::DownloadError;

const AUDIO_SELECTOR: &str = "bestaudio[ext=m4a]/bestaudio[ext=mp3]/bestaudio";
const BEST_SELECTOR: &str = "bestvideo+bestaudio/best";
const CANONICAL_WATCH: &str = "https://www.youtube.com/watch?v=";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionError {
    #[error("Unknown format '{0}', expected audio, mp4 or webm")]
    Format(String),

    #[error("Invalid resolution '{0}', expected 'best' or '<height>p'")]
    Resolution(String),
}

/// Requested container / codec family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Audio,
    #[default]
    Mp4,
    Webm,
}

impl OutputKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Audio => "mp3",
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
        }
    }
}

impl FromStr for OutputKind {
    type Err = OptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" | "mp3" => Ok(Self::Audio),
            "mp4" | "video" => Ok(Self::Mp4),
            "webm" => Ok(Self::Webm),
            _ => Err(OptionError::Format(s.to_string())),
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Audio => "audio",
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
        })
    }
}

/// Vertical resolution ceiling for video output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    #[default]
    Best,
    MaxHeight(u32),
}

impl Quality {
    /// `"best"` or `"720p"`.
    pub fn label(self) -> String {
        match self {
            Self::Best => "best".to_string(),
            Self::MaxHeight(h) => format!("{h}p"),
        }
    }
}

impl FromStr for Quality {
    type Err = OptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_lowercase();
        if trimmed.is_empty() || trimmed == "best" {
            return Ok(Self::Best);
        }
        let digits = trimmed.strip_suffix('p').unwrap_or(&trimmed);
        match digits.parse::<u32>() {
            Ok(h) if h > 0 => Ok(Self::MaxHeight(h)),
            _ => Err(OptionError::Resolution(s.to_string())),
        }
    }
}

/// Format selection expression for the tool's `--format`.
pub fn format_selector(kind: OutputKind, quality: Quality) -> String {
    match (kind, quality) {
        (OutputKind::Audio, _) => AUDIO_SELECTOR.to_string(),
        (_, Quality::MaxHeight(h)) => format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]"),
        (_, Quality::Best) => BEST_SELECTOR.to_string(),
    }
}

/// Reduce a media URL to the form the tool handles best.
///
/// YouTube watch and short links collapse to the canonical watch URL without
/// playlist or radio parameters. Other http(s) URLs pass through unchanged.
pub fn normalize_locator(raw: &str) -> Result<String, DownloadError> {
    let url = parse_locator(raw)?;
    let trimmed = raw.trim();

    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if host == "youtube.com" || host.ends_with(".youtube.com") {
        if let Some((_, id)) = url.query_pairs().find(|(k, _)| k == "v") {
            if !id.is_empty() {
                return Ok(format!("{CANONICAL_WATCH}{id}"));
            }
        }
    } else if host == "youtu.be" {
        let id = url.path().trim_start_matches('/').split('/').next().unwrap_or_default();
        if !id.is_empty() {
            return Ok(format!("{CANONICAL_WATCH}{id}"));
        }
    }

    Ok(trimmed.to_string())
}

/// Check that `raw` is an http(s) URL without rewriting it. Playlist
/// requests use this since their `list` parameter must survive.
pub fn validate_locator(raw: &str) -> Result<String, DownloadError> {
    parse_locator(raw).map(|_| raw.trim().to_string())
}

fn parse_locator(raw: &str) -> Result<Url, DownloadError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DownloadError::InvalidLocator("empty URL".to_string()));
    }
    let url = Url::parse(trimmed)
        .map_err(|e| DownloadError::InvalidLocator(format!("{trimmed}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DownloadError::InvalidLocator(format!(
            "{trimmed}: unsupported scheme {}",
            url.scheme()
        )));
    }
    Ok(url)
}

/// Canonical watch URL for a bare video id.
pub fn watch_url(id: &str) -> String {
    format!("{CANONICAL_WATCH}{id}")
}

/// A fully built command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

/// Where the tool and its helpers live.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub tool_path: PathBuf,
    pub ffmpeg_location: Option<PathBuf>,
    pub cookies_path: Option<PathBuf>,
}

impl ToolSettings {
    /// Resolve the executable against `PATH` (or check it directly when it
    /// is a path). `None` means the tool is not installed.
    pub fn resolve_tool(&self) -> Option<PathBuf> {
        which::which(&self.tool_path).ok()
    }

    fn cookies(&self) -> Option<&Path> {
        self.cookies_path.as_deref().filter(|p| p.is_file())
    }

    fn envs() -> Vec<(String, String)> {
        vec![("PYTHONUNBUFFERED".to_string(), "1".to_string())]
    }

    /// Arguments for a full download into `output`.
    pub fn download(
        &self,
        locator: &str,
        output: &Path,
        kind: OutputKind,
        quality: Quality,
    ) -> ToolInvocation {
        let mut args: Vec<String> = vec![
            locator.to_string(),
            "--output".into(),
            output.to_string_lossy().into_owned(),
            "--no-check-certificates".into(),
            "--newline".into(),
            "--add-header".into(),
            "user-agent:googlebot".into(),
            "--add-metadata".into(),
            "--embed-thumbnail".into(),
        ];
        if let Some(cookies) = self.cookies() {
            args.push("--cookies".into());
            args.push(cookies.to_string_lossy().into_owned());
        }
        if let Some(ffmpeg) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }
        args.push("--format".into());
        args.push(format_selector(kind, quality));

        match kind {
            OutputKind::Audio => args.extend(
                ["--extract-audio", "--audio-format", "mp3", "--audio-quality", "0"]
                    .map(String::from),
            ),
            OutputKind::Mp4 | OutputKind::Webm => {
                args.push("--merge-output-format".into());
                args.push(kind.extension().into());
            }
        }

        ToolInvocation {
            program: self.tool_path.clone(),
            args,
            envs: Self::envs(),
        }
    }

    /// Arguments for a metadata-only JSON dump.
    pub fn metadata(&self, locator: &str, playlist: bool) -> ToolInvocation {
        let mut args: Vec<String> = vec![locator.to_string(), "--dump-single-json".into()];
        if playlist {
            args.push("--flat-playlist".into());
        }
        args.extend(
            [
                "--no-check-certificates",
                "--no-warnings",
                "--prefer-free-formats",
                "--add-header",
                "referer:youtube.com",
                "--add-header",
                "user-agent:googlebot",
            ]
            .map(String::from),
        );
        if let Some(cookies) = self.cookies() {
            args.push("--cookies".into());
            args.push(cookies.to_string_lossy().into_owned());
        }

        ToolInvocation {
            program: self.tool_path.clone(),
            args,
            envs: Self::envs(),
        }
    }
}
