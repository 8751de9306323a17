// crates/core/src/artifacts.rs
//! Scratch-directory artifacts: reservation, delivery, cleanup and sweeping.
//!
//! Every job gets an [`Artifact`] guard naming a unique path in the scratch
//! directory. The guard owns cleanup: when it is dropped (job failed, client
//! went away, or the delivery stream finished) the reserved file and every
//! sibling sharing its stem are removed. A periodic [`ArtifactStore::sweep`]
//! catches anything a crash left behind.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures_util::Stream;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use ulid::Ulid;

use crate::error::DownloadError;

const MAX_FILENAME_CHARS: usize = 200;
const FALLBACK_FILENAME: &str = "video";
const PROBE_FILE: &str = ".reelgrab-write-probe";

/// Bytes available on the filesystem holding a directory, if known.
type DiskSpaceFn = fn(PathBuf) -> Option<u64>;

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    scratch_dir: PathBuf,
    disk_space: DiskSpaceFn,
}

impl ArtifactStore {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            disk_space: available_space,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_disk_space(mut self, lookup: DiskSpaceFn) -> Self {
        self.disk_space = lookup;
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    fn scratch_error(&self, source: std::io::Error) -> DownloadError {
        DownloadError::Scratch {
            path: self.scratch_dir.clone(),
            source,
        }
    }

    /// Create the scratch directory if needed and prove it is writable.
    pub async fn ensure_writable(&self) -> Result<(), DownloadError> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| self.scratch_error(e))?;
        let probe = self.scratch_dir.join(PROBE_FILE);
        tokio::fs::write(&probe, b"ok")
            .await
            .map_err(|e| self.scratch_error(e))?;
        tokio::fs::remove_file(&probe)
            .await
            .map_err(|e| self.scratch_error(e))?;
        Ok(())
    }

    /// Allocate a unique output path for `job_id`.
    ///
    /// The file itself is not created; the conversion tool writes it.
    pub async fn reserve(&self, job_id: &str, extension: &str) -> Result<Artifact, DownloadError> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| self.scratch_error(e))?;

        let stem = Ulid::new().to_string().to_lowercase();
        let path = self.scratch_dir.join(format!("{stem}.{extension}"));
        tracing::debug!(job_id, path = %path.display(), "Artifact reserved");

        Ok(Artifact {
            job_id: job_id.to_string(),
            dir: self.scratch_dir.clone(),
            stem,
            path,
        })
    }

    /// Fail with [`DownloadError::InsufficientSpace`] when the filesystem
    /// holding the scratch directory has less than `min_free` bytes available.
    /// Passes when no disk can be matched.
    pub async fn check_free_space(&self, min_free: u64) -> Result<(), DownloadError> {
        if min_free == 0 {
            return Ok(());
        }
        let dir = self.scratch_dir.clone();
        let disk_space = self.disk_space;
        let available = match tokio::task::spawn_blocking(move || disk_space(dir)).await {
            Ok(available) => available,
            Err(e) => {
                tracing::warn!(error = %e, "Free space lookup panicked, skipping check");
                None
            }
        };

        match available {
            Some(available) if available < min_free => {
                tracing::warn!(available, required = min_free, "Rejecting job, scratch disk low on space");
                Err(DownloadError::InsufficientSpace {
                    available,
                    required: min_free,
                })
            }
            _ => Ok(()),
        }
    }

    /// Delete every regular file in the scratch directory older than `max_age`.
    pub async fn sweep(&self, max_age: Duration) -> SweepReport {
        let mut report = SweepReport::default();
        let mut entries = match tokio::fs::read_dir(&self.scratch_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
            Err(e) => {
                tracing::warn!(dir = %self.scratch_dir.display(), error = %e, "Sweep could not read scratch dir");
                return report;
            }
        };

        let now = SystemTime::now();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            report.scanned += 1;

            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Sweep failed to remove artifact");
                    report.failed += 1;
                }
            }
        }

        if report.removed > 0 || report.failed > 0 {
            tracing::info!(
                scanned = report.scanned,
                removed = report.removed,
                failed = report.failed,
                "Scratch sweep finished"
            );
        }
        report
    }

    /// Sweep now and then every `interval` for the life of the runtime.
    pub fn spawn_sweeper(&self, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.sweep(max_age).await;
            }
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

fn available_space(dir: PathBuf) -> Option<u64> {
    let dir = std::fs::canonicalize(&dir).unwrap_or(dir);
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| dir.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// Reserved output location for one job. Dropping it removes the files.
#[derive(Debug)]
pub struct Artifact {
    job_id: String,
    dir: PathBuf,
    stem: String,
    path: PathBuf,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Locate what the tool actually wrote: the reserved path, or failing
    /// that the newest finished file sharing the reserved stem.
    pub async fn resolve_output(&self) -> Result<PathBuf, DownloadError> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(self.path.clone());
        }

        let missing = || DownloadError::OutputMissing {
            path: self.path.clone(),
        };
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|_| missing())?;
        let mut newest: Option<(SystemTime, PathBuf)> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(&self.stem) || name.ends_with(".part") || name.ends_with(".ytdl") {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            match &newest {
                Some((t, _)) if modified <= *t => {}
                _ => newest = Some((modified, entry.path())),
            }
        }

        match newest {
            Some((_, path)) => {
                tracing::debug!(job_id = %self.job_id, path = %path.display(), "Tool wrote output under a different name");
                Ok(path)
            }
            None => Err(missing()),
        }
    }

    fn cleanup(&self) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().starts_with(&self.stem) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Failed to remove artifact");
                }
            }
        }
        removed
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        let removed = self.cleanup();
        tracing::debug!(job_id = %self.job_id, removed, "Artifact cleaned up");
    }
}

/// A finished artifact ready to be sent to the requester.
#[derive(Debug)]
pub struct Delivery {
    pub stream: ArtifactStream,
    pub content_length: u64,
    pub filename: String,
    pub content_type: &'static str,
}

/// Byte stream over an artifact. The artifact is deleted when the stream is
/// dropped, whether or not it was read to the end.
#[derive(Debug)]
pub struct ArtifactStream {
    inner: ReaderStream<tokio::fs::File>,
    artifact: Artifact,
    sent: u64,
}

impl Stream for ArtifactStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => self.sent += chunk.len() as u64,
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!(job_id = %self.artifact.job_id, error = %e, "Artifact read failed mid-stream");
            }
            Poll::Ready(None) => {
                tracing::debug!(job_id = %self.artifact.job_id, bytes = self.sent, "Artifact delivered");
            }
            Poll::Pending => {}
        }
        polled
    }
}

/// Open the finished artifact for streaming under a user-facing filename.
pub async fn deliver(
    artifact: Artifact,
    title: &str,
    quality_label: Option<&str>,
) -> Result<Delivery, DownloadError> {
    let output = artifact.resolve_output().await?;
    let open_err = |_| DownloadError::OutputMissing {
        path: output.clone(),
    };
    let file = tokio::fs::File::open(&output).await.map_err(open_err)?;
    let content_length = file.metadata().await.map_err(open_err)?.len();

    let extension = output
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_ascii_lowercase();

    Ok(Delivery {
        filename: decorated_filename(title, quality_label, &extension),
        content_type: content_type_for(&extension),
        content_length,
        stream: ArtifactStream {
            inner: ReaderStream::new(file),
            artifact,
            sent: 0,
        },
    })
}

/// Make a title safe for filesystems and `Content-Disposition`.
///
/// Illegal characters and control characters become spaces, whitespace runs
/// collapse to one space, and the result is trimmed and capped.
pub fn sanitize_filename(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(MAX_FILENAME_CHARS).collect();
    let trimmed = capped.trim_end_matches([' ', '.']).to_string();

    if trimmed.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        trimmed
    }
}

/// `Title-720p.mp4`, or `Title.mp3` when there is no label.
pub fn decorated_filename(title: &str, quality_label: Option<&str>, extension: &str) -> String {
    let base = sanitize_filename(title);
    match quality_label {
        Some(label) if !label.is_empty() => format!("{base}-{label}.{extension}"),
        _ => format!("{base}.{extension}"),
    }
}

pub fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}
