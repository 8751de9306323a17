// crates/core/src/process.rs
//! Supervised external processes.
//!
//! [`start`] spawns the conversion tool in its own process group with both
//! output pipes captured. The returned [`ProcessHandle`] is owned by the job
//! that started it; it exposes the pid, a combined stream of output chunks
//! tagged by origin, and the exit status. A cloneable [`ProcessKiller`] is the
//! only capability handed out to others (the job registry), and all it can do
//! is terminate the whole process tree.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use crate::error::ProcessError;

const READ_BUF_BYTES: usize = 8 * 1024;
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Which pipe a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// One read from a child pipe.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub data: Bytes,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Terminating signal (Unix only).
    pub signal: Option<i32>,
}

impl ExitOutcome {
    fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Shell-style code: signal terminations map to `128 + signal`.
    pub fn shell_code(&self) -> Option<i32> {
        self.code.or(self.signal.map(|s| 128 + s))
    }
}

impl From<std::process::ExitStatus> for ExitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Result of a kill request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// Signals were sent to the process tree.
    Killed,
    /// The process had already exited or was killed by an earlier call.
    AlreadyExited,
}

/// Cloneable, idempotent kill capability for one process tree.
#[derive(Debug, Clone)]
pub struct ProcessKiller {
    pid: u32,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
    killed: Arc<AtomicBool>,
}

impl ProcessKiller {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// True once any clone of this killer has sent the kill signal.
    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Terminate the process and every child it spawned.
    ///
    /// Never fails: the first effective call returns [`KillOutcome::Killed`],
    /// every later call (or a call after exit) returns
    /// [`KillOutcome::AlreadyExited`].
    pub fn kill(&self) -> KillOutcome {
        if self.has_exited() || self.killed.swap(true, Ordering::SeqCst) {
            return KillOutcome::AlreadyExited;
        }

        if let Err(err) = kill_tree(self.pid) {
            tracing::warn!(pid = self.pid, error = %err, "Process tree kill failed, signalling pid directly");
            if let Err(err) = kill_pid(self.pid) {
                tracing::warn!(pid = self.pid, error = %err, "Direct kill failed");
            }
        }
        tracing::debug!(pid = self.pid, "Process tree killed");
        KillOutcome::Killed
    }
}

/// Owning handle to a spawned process. Dropping the handle while the
/// process is still running kills the whole tree.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    output: Option<mpsc::Receiver<Result<OutputChunk, std::io::Error>>>,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
    killer: ProcessKiller,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Take the combined stdout/stderr chunk stream. Returns `None` after the
    /// first call. The stream ends when both pipes are closed.
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<Result<OutputChunk, std::io::Error>>> {
        self.output.take()
    }

    pub fn killer(&self) -> ProcessKiller {
        self.killer.clone()
    }

    /// Non-blocking exit check.
    pub fn try_exit(&self) -> Option<ExitOutcome> {
        *self.exit_rx.borrow()
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> ExitOutcome {
        match self.exit_rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).unwrap_or_else(ExitOutcome::unknown),
            Err(_) => {
                tracing::error!(pid = self.pid, "Exit watcher dropped before reporting");
                ExitOutcome::unknown()
            }
        }
    }

    pub fn kill(&self) -> KillOutcome {
        self.killer.kill()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.try_exit().is_none() && self.killer.kill() == KillOutcome::Killed {
            tracing::debug!(pid = self.pid, "Process handle dropped while running, tree killed");
        }
    }
}

/// Spawn `program` with `args` and extra environment `envs`.
pub fn start(
    program: impl AsRef<Path>,
    args: &[String],
    envs: &[(String, String)],
) -> Result<ProcessHandle, ProcessError> {
    let program = program.as_ref();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    // Own process group so the whole tree can be signalled at once.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| ProcessError::spawn(program, e))?;
    let pid = child.id().ok_or_else(|| {
        ProcessError::Io(std::io::Error::other("child exited before its pid was read"))
    })?;
    let stdout = child
        .stdout
        .take()
        .ok_or(ProcessError::MissingPipe { stream: "stdout" })?;
    let stderr = child
        .stderr
        .take()
        .ok_or(ProcessError::MissingPipe { stream: "stderr" })?;

    let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
    spawn_reader(stdout, OutputStream::Stdout, tx.clone());
    spawn_reader(stderr, OutputStream::Stderr, tx);

    let (exit_tx, exit_rx) = watch::channel(None);
    tokio::spawn(async move {
        let outcome = match child.wait().await {
            Ok(status) => ExitOutcome::from(status),
            Err(e) => {
                tracing::warn!(pid, error = %e, "Failed to wait for child");
                ExitOutcome::unknown()
            }
        };
        tracing::debug!(pid, exit_code = ?outcome.code, signal = ?outcome.signal, "Process exited");
        let _ = exit_tx.send(Some(outcome));
    });

    tracing::info!(pid, program = %program.display(), "Process spawned");

    let killer = ProcessKiller {
        pid,
        exit_rx: exit_rx.clone(),
        killed: Arc::new(AtomicBool::new(false)),
    };

    Ok(ProcessHandle {
        pid,
        output: Some(rx),
        exit_rx,
        killer,
    })
}

fn spawn_reader<R>(
    mut reader: R,
    stream: OutputStream,
    tx: mpsc::Sender<Result<OutputChunk, std::io::Error>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUF_BYTES];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = OutputChunk {
                        stream,
                        data: Bytes::copy_from_slice(&buf[..n]),
                    };
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
        tracing::trace!(stream = stream.as_str(), "Output pipe closed");
    });
}

#[cfg(unix)]
fn kill_tree(pid: u32) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(windows)]
fn kill_tree(pid: u32) -> std::io::Result<()> {
    taskkill(pid, true)
}

#[cfg(windows)]
fn kill_pid(pid: u32) -> std::io::Result<()> {
    taskkill(pid, false)
}

#[cfg(windows)]
fn taskkill(pid: u32, tree: bool) -> std::io::Result<()> {
    let pid = pid.to_string();
    let mut args = vec!["/PID", pid.as_str(), "/F"];
    if tree {
        args.push("/T");
    }
    let status = std::process::Command::new("taskkill")
        .args(&args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("taskkill exited with {status}")))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> ProcessHandle {
        start("sh", &["-c".to_string(), script.to_string()], &[]).expect("spawn sh")
    }

    async fn collect(handle: &mut ProcessHandle) -> (String, String) {
        let mut rx = handle.take_output().unwrap();
        let (mut out, mut err) = (String::new(), String::new());
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            let text = String::from_utf8_lossy(&chunk.data).to_string();
            match chunk.stream {
                OutputStream::Stdout => out.push_str(&text),
                OutputStream::Stderr => err.push_str(&text),
            }
        }
        (out, err)
    }

    #[tokio::test]
    async fn test_start_captures_both_streams_and_exit_code() {
        let mut handle = sh("echo out; echo err 1>&2; exit 3");
        assert!(handle.pid() > 0);
        let (out, err) = collect(&mut handle).await;
        assert_eq!(out.trim(), "out");
        assert_eq!(err.trim(), "err");

        let exit = handle.wait().await;
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success());
        assert_eq!(exit.shell_code(), Some(3));
    }

    #[tokio::test]
    async fn test_environment_is_passed() {
        let mut handle = start(
            "sh",
            &["-c".to_string(), "echo $PYTHONUNBUFFERED".to_string()],
            &[("PYTHONUNBUFFERED".to_string(), "1".to_string())],
        )
        .unwrap();
        let (out, _) = collect(&mut handle).await;
        assert_eq!(out.trim(), "1");
        assert!(handle.wait().await.success());
    }

    #[tokio::test]
    async fn test_missing_executable_is_not_found() {
        let err = start("/definitely/not/here/yt-dlp", &[], &[]).unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let mut handle = sh("sleep 30");
        let killer = handle.killer();

        assert_eq!(killer.kill(), KillOutcome::Killed);
        assert_eq!(killer.kill(), KillOutcome::AlreadyExited);
        assert!(killer.was_killed());

        let exit = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("process should die after kill");
        assert_eq!(exit.signal, Some(9));
        assert_eq!(exit.shell_code(), Some(137));

        // After exit, further kills are still harmless.
        assert_eq!(handle.kill(), KillOutcome::AlreadyExited);
        assert!(handle.try_exit().is_some());
    }

    #[tokio::test]
    async fn test_drop_kills_running_process() {
        let handle = sh("sleep 30");
        let killer = handle.killer();
        drop(handle);
        assert!(killer.was_killed());
        assert_eq!(killer.kill(), KillOutcome::AlreadyExited);
    }

    #[tokio::test]
    async fn test_kill_after_natural_exit() {
        let mut handle = sh("exit 0");
        assert!(handle.wait().await.success());
        assert_eq!(handle.kill(), KillOutcome::AlreadyExited);
        assert!(!handle.killer().was_killed());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_kill_reaches_grandchildren() {
        let mut handle = sh("sleep 30 & echo $!; wait");
        let mut rx = handle.take_output().unwrap();
        let first = rx.recv().await.unwrap().unwrap();
        let grandchild: i32 = String::from_utf8_lossy(&first.data).trim().parse().unwrap();

        assert_eq!(handle.kill(), KillOutcome::Killed);
        handle.wait().await;

        // The grandchild is either gone or a zombie awaiting reaping.
        let mut dead = false;
        for _ in 0..50 {
            match std::fs::read_to_string(format!("/proc/{grandchild}/stat")) {
                Err(_) => dead = true,
                Ok(stat) => dead = stat.contains(") Z "),
            }
            if dead {
                break;
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        assert!(dead, "grandchild {grandchild} survived the tree kill");
    }
}
