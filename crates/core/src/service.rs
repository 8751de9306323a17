// crates/core/src/service.rs
//! The conversion orchestrator.
//!
//! [`ConversionService`] owns the two shared maps (client channels and active
//! jobs) plus the limiter and artifact store, and drives one conversion end
//! to end: reserve the client id, check disk space, reserve an artifact,
//! spawn the tool, pump its output through the progress parser into the hub,
//! and hand back the finished file.
//!
//! Every event for a job is published through
//! [`JobRegistry::while_active`], so once a cancel has removed the entry no
//! further progress or error event for that job can reach the client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use crate::artifacts::{self, ArtifactStore, Delivery};
use crate::config::AppConfig;
use crate::error::{DownloadError, ProcessError};
use crate::event::ProgressEvent;
use crate::hub::{NotificationHub, Subscription};
use crate::limiter::ConcurrencyLimiter;
use crate::metadata::{self, BatchFailure, BatchItem, BatchOutcome, MediaInfo, PlaylistInfo, STDERR_LOG_LIMIT};
use crate::process::{self, OutputStream};
use crate::progress::ProgressParser;
use crate::registry::{CancelOutcome, JobRegistry};
use crate::tool::{self, OutputKind, Quality, ToolSettings};

/// Bytes of recent stderr kept for the failure log line.
const STDERR_TAIL_BYTES: usize = 4 * 1024;

/// One conversion request as accepted from the request layer.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub locator: String,
    /// Correlates the job with a progress subscription and cancel requests.
    /// Jobs without one are tracked under a generated id.
    pub client_id: Option<String>,
    pub kind: OutputKind,
    pub quality: Quality,
}

pub struct ConversionService {
    tool: ToolSettings,
    metadata_timeout: Duration,
    playlist_timeout: Duration,
    conversion_timeout: Option<Duration>,
    min_free_bytes: u64,
    hub: Arc<NotificationHub>,
    registry: Arc<JobRegistry>,
    limiter: ConcurrencyLimiter,
    artifacts: ArtifactStore,
}

/// Releases the registry entry when the job ends by any path, including the
/// request future being dropped.
struct JobScope<'a> {
    registry: &'a JobRegistry,
    client_id: String,
    job_id: String,
}

impl Drop for JobScope<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.client_id, &self.job_id);
    }
}

impl ConversionService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            tool: config.tool_settings(),
            metadata_timeout: config.metadata_timeout(),
            playlist_timeout: config.playlist_timeout(),
            conversion_timeout: config.conversion_timeout(),
            min_free_bytes: config.min_free_bytes,
            hub: Arc::new(NotificationHub::new()),
            registry: Arc::new(JobRegistry::new()),
            limiter: ConcurrencyLimiter::new(config.max_concurrency),
            artifacts: ArtifactStore::new(&config.scratch_dir),
        }
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn tool(&self) -> &ToolSettings {
        &self.tool
    }

    pub fn subscribe(&self, client_id: &str) -> Subscription {
        self.hub.subscribe(client_id)
    }

    pub fn cancel(&self, client_id: &str) -> CancelOutcome {
        tracing::info!(client_id, "Cancel requested");
        self.registry.cancel(client_id)
    }

    /// Cancel every active job and close every progress channel, so neither
    /// a conversion process nor an open progress stream outlives the server.
    pub fn shutdown(&self) {
        let cancelled = self.registry.cancel_all();
        let closed = self.hub.close_all();
        tracing::info!(cancelled, closed, "Conversion service shut down");
    }

    /// Metadata for one media URL.
    pub async fn fetch_metadata(&self, locator: &str) -> Result<MediaInfo, DownloadError> {
        let locator = tool::normalize_locator(locator)?;
        let invocation = self.tool.metadata(&locator, false);
        let json = metadata::run_json(&invocation, self.metadata_timeout).await?;
        metadata::parse_media_info(&json)
    }

    /// Flat listing of a playlist.
    pub async fn fetch_playlist(&self, locator: &str) -> Result<PlaylistInfo, DownloadError> {
        let locator = tool::validate_locator(locator)?;
        let invocation = self.tool.metadata(&locator, true);
        let json = metadata::run_json(&invocation, self.playlist_timeout).await?;
        let playlist = metadata::parse_playlist(&json)?;
        tracing::info!(locator = %locator, entries = playlist.entries.len(), "Playlist fetched");
        Ok(playlist)
    }

    /// Metadata for many URLs, at most `max_concurrency` at a time. Each URL
    /// succeeds or fails on its own; input order is kept in both lists.
    pub async fn fetch_batch(&self, urls: Vec<String>) -> BatchOutcome {
        let fetched = self
            .limiter
            .run_all(urls, |url| async move {
                let result = self.fetch_metadata(&url).await;
                (url, result)
            })
            .await;

        let mut outcome = BatchOutcome::default();
        for (url, result) in fetched {
            match result {
                Ok(info) => outcome.results.push(BatchItem {
                    url,
                    title: info.title,
                    thumbnail: info.thumbnail_url,
                }),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Batch item failed");
                    outcome.errors.push(BatchFailure {
                        error: e.user_message().to_string(),
                        url,
                    });
                }
            }
        }
        tracing::info!(
            succeeded = outcome.results.len(),
            failed = outcome.errors.len(),
            "Batch metadata fetched"
        );
        outcome
    }

    /// Run one conversion to completion and return the finished artifact.
    pub async fn start_conversion(&self, request: ConversionRequest) -> Result<Delivery, DownloadError> {
        let locator = tool::normalize_locator(&request.locator)?;
        let client_id = request
            .client_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("anon-{}", uuid::Uuid::new_v4()));
        let job_id = Ulid::new().to_string();
        let output_label = match request.kind {
            OutputKind::Audio => request.kind.to_string(),
            kind => format!("{kind} {}", request.quality.label()),
        };

        self.registry
            .reserve(&client_id, &job_id, &locator, &output_label)?;
        let job = JobScope {
            registry: &self.registry,
            client_id,
            job_id,
        };
        tracing::info!(
            client_id = %job.client_id,
            job_id = %job.job_id,
            locator = %locator,
            output = %output_label,
            "Conversion accepted"
        );

        let started = Instant::now();
        let result = self
            .run_job(&job, &locator, request.kind, request.quality)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(delivery) => tracing::info!(
                client_id = %job.client_id,
                job_id = %job.job_id,
                duration_ms,
                bytes = delivery.content_length,
                "Conversion completed"
            ),
            Err(DownloadError::Cancelled) => tracing::info!(
                client_id = %job.client_id,
                job_id = %job.job_id,
                duration_ms,
                "Conversion cancelled"
            ),
            Err(e) => {
                tracing::warn!(
                    client_id = %job.client_id,
                    job_id = %job.job_id,
                    duration_ms,
                    class = ?e.class(),
                    error = %e,
                    "Conversion failed"
                );
                self.emit(&job, ProgressEvent::error(e.user_message()));
            }
        }
        result
    }

    /// Publish `event` only while the job still owns its registry entry.
    fn emit(&self, job: &JobScope<'_>, event: ProgressEvent) -> bool {
        self.registry
            .while_active(&job.client_id, &job.job_id, || {
                self.hub.publish(&job.client_id, event);
            })
            .is_some()
    }

    async fn run_job(
        &self,
        job: &JobScope<'_>,
        locator: &str,
        kind: OutputKind,
        quality: Quality,
    ) -> Result<Delivery, DownloadError> {
        let artifact = self.artifacts.reserve(&job.job_id, kind.extension()).await?;
        self.artifacts.check_free_space(self.min_free_bytes).await?;

        let info = self.fetch_metadata(locator).await?;

        let invocation = self.tool.download(locator, artifact.path(), kind, quality);
        let mut handle = process::start(&invocation.program, &invocation.args, &invocation.envs)?;
        let killer = handle.killer();
        if let Err(e) = self.registry.register(&job.client_id, &job.job_id, killer.clone()) {
            killer.kill();
            return Err(e.into());
        }

        let mut output = handle
            .take_output()
            .ok_or(ProcessError::MissingPipe { stream: "output" })?;
        let mut stdout_parser = ProgressParser::new();
        let mut stderr_parser = ProgressParser::new();
        let mut stderr_tail: Vec<u8> = Vec::new();
        let mut read_error = None;

        let deadline = self.conversion_timeout.map(|t| tokio::time::Instant::now() + t);
        let timeout = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timeout);
        let mut timed_out = false;

        loop {
            tokio::select! {
                chunk = output.recv() => match chunk {
                    Some(Ok(chunk)) => {
                        let parser = match chunk.stream {
                            OutputStream::Stdout => &mut stdout_parser,
                            OutputStream::Stderr => {
                                stderr_tail.extend_from_slice(&chunk.data);
                                if stderr_tail.len() > STDERR_TAIL_BYTES {
                                    stderr_tail.drain(..stderr_tail.len() - STDERR_TAIL_BYTES);
                                }
                                &mut stderr_parser
                            }
                        };
                        for event in parser.feed(&chunk.data) {
                            self.emit(job, event);
                        }
                    }
                    Some(Err(e)) => {
                        read_error = Some(e);
                        break;
                    }
                    None => break,
                },
                _ = &mut timeout => {
                    timed_out = true;
                    break;
                }
            }
        }
        stdout_parser.finish();
        stderr_parser.finish();

        if timed_out {
            killer.kill();
            handle.wait().await;
            let secs = self.conversion_timeout.map(|t| t.as_secs()).unwrap_or_default();
            return Err(DownloadError::TimedOut { secs });
        }
        if let Some(e) = read_error {
            killer.kill();
            handle.wait().await;
            if !self.registry.is_active(&job.client_id, &job.job_id) {
                return Err(DownloadError::Cancelled);
            }
            return Err(ProcessError::Io(e).into());
        }

        let exit = handle.wait().await;
        if killer.was_killed() || !self.registry.is_active(&job.client_id, &job.job_id) {
            return Err(DownloadError::Cancelled);
        }
        if !exit.success() {
            let stderr = String::from_utf8_lossy(&stderr_tail);
            tracing::error!(
                client_id = %job.client_id,
                job_id = %job.job_id,
                pid = handle.pid(),
                exit_code = ?exit.shell_code(),
                stderr = %metadata::truncate_utf8(stderr.trim(), STDERR_LOG_LIMIT),
                "Conversion process failed"
            );
            return Err(DownloadError::ProcessFailed {
                code: exit.shell_code(),
            });
        }

        let label = match (kind, quality) {
            (OutputKind::Audio, _) | (_, Quality::Best) => None,
            (_, quality) => Some(quality.label()),
        };
        let delivery = artifacts::deliver(artifact, &info.title, label.as_deref()).await?;

        if !self.emit(job, ProgressEvent::complete()) {
            // Cancelled between exit and delivery. The artifact goes with `delivery`.
            return Err(DownloadError::Cancelled);
        }
        Ok(delivery)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::hub::HubMessage;
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Write a stand-in for the conversion tool. Metadata calls print a fixed
    /// JSON document; download calls run `download_body` with `$out` set to
    /// the requested output path.
    fn fake_tool(dir: &Path, download_body: &str) -> PathBuf {
        let script = format!(
            r#"#!/bin/sh
case "$*" in
  *--dump-single-json*)
    printf '%s' '{{"title":"Fake: Clip","duration":10,"formats":[{{"height":720}}]}}'
    exit 0
    ;;
esac
out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "--output" ]; then out="$arg"; fi
  prev="$arg"
done
{download_body}
"#
        );
        let path = dir.join("fake-yt-dlp");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn service(dir: &Path, tool: PathBuf) -> ConversionService {
        let config = AppConfig {
            tool_path: tool,
            cookies_path: None,
            scratch_dir: dir.join("scratch"),
            min_free_bytes: 0,
            ..AppConfig::default()
        };
        ConversionService::new(&config)
    }

    fn request(client_id: &str) -> ConversionRequest {
        ConversionRequest {
            locator: "https://example.com/watch/1".to_string(),
            client_id: Some(client_id.to_string()),
            kind: OutputKind::Mp4,
            quality: Quality::MaxHeight(720),
        }
    }

    fn scratch_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir.join("scratch"))
            .map(|entries| entries.flatten().map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    async fn next_event(sub: &mut Subscription) -> ProgressEvent {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), sub.recv()).await {
                Ok(Some(HubMessage::Event(event))) => return event,
                Ok(Some(HubMessage::KeepAlive)) => continue,
                other => panic!("expected an event, got {other:?}"),
            }
        }
    }

    async fn assert_quiet(sub: &mut Subscription) {
        let got = tokio::time::timeout(Duration::from_millis(300), sub.recv()).await;
        assert!(got.is_err(), "unexpected message: {got:?}");
    }

    #[tokio::test]
    async fn test_successful_conversion_streams_progress_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            r#"echo "  42.5% of 10MiB"
echo "[Merger] Merging formats into \"$out\""
printf 'media-bytes' > "$out"
exit 0"#,
        );
        let svc = service(dir.path(), tool);
        let mut sub = svc.subscribe("c1");
        assert_eq!(sub.recv().await, Some(HubMessage::KeepAlive));

        let delivery = svc.start_conversion(request("c1")).await.unwrap();
        assert_eq!(delivery.filename, "Fake Clip-720p.mp4");
        assert_eq!(delivery.content_type, "video/mp4");
        assert_eq!(delivery.content_length, 11);

        let mut events = Vec::new();
        for _ in 0..3 {
            events.push(next_event(&mut sub).await);
        }
        assert_eq!(
            events,
            vec![
                ProgressEvent::downloading(42.5),
                ProgressEvent::finalizing(),
                ProgressEvent::complete(),
            ]
        );
        assert!(svc.registry().lookup("c1").is_none());

        let body: Vec<u8> = delivery
            .stream
            .map(|chunk| chunk.unwrap())
            .collect::<Vec<_>>()
            .await
            .concat();
        assert_eq!(body, b"media-bytes");
        assert!(scratch_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_suppresses_late_events_and_removes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            r#"echo " 10% of 10MiB"
printf 'partial' > "$out.part"
sleep 30
echo " 90% of 10MiB"
exit 0"#,
        );
        let svc = Arc::new(service(dir.path(), tool));
        let mut sub = svc.subscribe("c2");

        let task = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.start_conversion(request("c2")).await })
        };

        assert_eq!(next_event(&mut sub).await, ProgressEvent::downloading(10.0));
        assert_eq!(svc.cancel("c2"), CancelOutcome::Accepted);
        assert!(svc.registry().lookup("c2").is_none());
        assert_eq!(svc.cancel("c2"), CancelOutcome::NotFound);

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert_quiet(&mut sub).await;
        assert!(scratch_files(dir.path()).is_empty());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_output_after_kill_is_not_published() {
        if which::which("setsid").is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        // A detached writer outlives the tree kill and prints 150ms later.
        let tool = fake_tool(
            dir.path(),
            r#"echo " 10% of 10MiB"
setsid sh -c 'sleep 0.15; echo " 55% of 10MiB"' &
sleep 30"#,
        );
        let svc = Arc::new(service(dir.path(), tool));
        let mut sub = svc.subscribe("c2");

        let task = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.start_conversion(request("c2")).await })
        };
        assert_eq!(next_event(&mut sub).await, ProgressEvent::downloading(10.0));
        assert_eq!(svc.cancel("c2"), CancelOutcome::Accepted);

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert_quiet(&mut sub).await;
    }

    #[tokio::test]
    async fn test_failed_process_publishes_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            r#"echo "ERROR: secret internal detail" 1>&2
printf 'x' > "$out.part"
exit 2"#,
        );
        let svc = service(dir.path(), tool);
        let mut sub = svc.subscribe("c3");

        let err = svc.start_conversion(request("c3")).await.unwrap_err();
        assert!(matches!(err, DownloadError::ProcessFailed { code: Some(2) }));
        assert_eq!(next_event(&mut sub).await, ProgressEvent::error("Download failed."));
        assert!(svc.registry().lookup("c3").is_none());
        assert!(scratch_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_busy_client_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo ' 1%'\nsleep 30");
        let svc = Arc::new(service(dir.path(), tool));
        let mut sub = svc.subscribe("c4");

        let task = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.start_conversion(request("c4")).await })
        };
        next_event(&mut sub).await;

        let err = svc.start_conversion(request("c4")).await.unwrap_err();
        assert!(matches!(err, DownloadError::AlreadyRunning { .. }));

        // The running job is untouched by the rejected one.
        assert!(svc.registry().lookup("c4").is_some());
        svc.cancel("c4");
        let result = task.await.unwrap();
        assert!(matches!(result, Err(DownloadError::Cancelled)));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_jobs_and_ends_subscriptions() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo ' 5%'\nsleep 30");
        let svc = Arc::new(service(dir.path(), tool));
        let mut running = svc.subscribe("c7");
        let mut idle = svc.subscribe("idle");
        assert_eq!(idle.recv().await, Some(HubMessage::KeepAlive));

        let task = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.start_conversion(request("c7")).await })
        };
        assert_eq!(next_event(&mut running).await, ProgressEvent::downloading(5.0));

        svc.shutdown();
        assert_eq!(svc.registry().active_count(), 0);
        assert_eq!(svc.hub().client_count(), 0);

        let ended = tokio::time::timeout(Duration::from_secs(1), idle.recv()).await;
        assert_eq!(ended, Ok(None));
        let ended = tokio::time::timeout(Duration::from_secs(1), running.recv()).await;
        assert_eq!(ended, Ok(None));

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert!(scratch_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_low_disk_rejects_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("tool-ran");
        let tool = dir.path().join("marking-yt-dlp");
        std::fs::write(&tool, format!("#!/bin/sh\ntouch '{}'\nexit 0\n", marker.display())).unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        let config = AppConfig {
            tool_path: tool,
            cookies_path: None,
            scratch_dir: dir.path().join("scratch"),
            min_free_bytes: u64::MAX,
            ..AppConfig::default()
        };
        let mut svc = ConversionService::new(&config);
        svc.artifacts = ArtifactStore::new(&config.scratch_dir).with_disk_space(|_| Some(1024));
        let mut sub = svc.subscribe("c6");

        let err = svc.start_conversion(request("c6")).await.unwrap_err();
        assert!(matches!(
            err,
            DownloadError::InsufficientSpace { available: 1024, required: u64::MAX }
        ));
        assert_eq!(next_event(&mut sub).await, ProgressEvent::error(err.user_message()));
        assert!(svc.registry().lookup("c6").is_none());
        assert_eq!(svc.registry().active_count(), 0);
        assert!(scratch_files(dir.path()).is_empty());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_conversion_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "sleep 30");
        let config = AppConfig {
            tool_path: tool,
            cookies_path: None,
            scratch_dir: dir.path().join("scratch"),
            min_free_bytes: 0,
            conversion_timeout_secs: Some(1),
            ..AppConfig::default()
        };
        let svc = ConversionService::new(&config);
        let mut sub = svc.subscribe("c5");

        let err = svc.start_conversion(request("c5")).await.unwrap_err();
        assert!(matches!(err, DownloadError::TimedOut { secs: 1 }));
        assert_eq!(next_event(&mut sub).await, ProgressEvent::error("Download timed out."));
        assert!(svc.registry().lookup("c5").is_none());
        assert!(scratch_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_metadata_timeout_is_cannot_connect() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("slow-yt-dlp");
        std::fs::write(&tool, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        let config = AppConfig {
            tool_path: tool,
            cookies_path: None,
            scratch_dir: dir.path().join("scratch"),
            metadata_timeout_secs: 1,
            ..AppConfig::default()
        };
        let svc = ConversionService::new(&config);

        let err = svc.fetch_metadata("https://unreachable.invalid/v").await.unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Upstream { kind: crate::error::UpstreamKind::CannotConnect, .. }
        ));
        assert!(scratch_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_missing_client_id_gets_anonymous_job() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "printf 'a' > \"$out\"");
        let svc = service(dir.path(), tool);
        let request = ConversionRequest {
            client_id: None,
            kind: OutputKind::Audio,
            ..request("unused")
        };
        let delivery = svc.start_conversion(request).await.unwrap();
        assert_eq!(delivery.filename, "Fake Clip.mp3");
        assert_eq!(svc.registry().active_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_tool_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), dir.path().join("not-installed"));
        let err = svc.fetch_metadata("https://example.com/v").await.unwrap_err();
        assert!(matches!(err, DownloadError::ToolMissing { .. }));
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "exit 0");
        let svc = service(dir.path(), tool);

        let outcome = svc
            .fetch_batch(vec![
                "https://example.com/a".to_string(),
                "not a url".to_string(),
                "https://example.com/b".to_string(),
            ])
            .await;
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].url, "https://example.com/a");
        assert_eq!(outcome.results[1].url, "https://example.com/b");
        assert_eq!(outcome.results[0].title, "Fake: Clip");
        assert_eq!(
            outcome.errors,
            vec![BatchFailure {
                url: "not a url".to_string(),
                error: "Invalid URL. Please enter a valid media URL.".to_string(),
            }]
        );
    }
}
