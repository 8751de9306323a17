// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while starting or supervising the external tool process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Executable not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to capture {stream} of child process")]
    MissingPipe { stream: &'static str },

    #[error("IO error on process output: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    pub fn spawn(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Spawn { path, source },
        }
    }
}

/// Classification of a failure reported by the upstream media source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    Unavailable,
    AccessRestricted,
    CannotConnect,
    InvalidUrl,
    Unknown,
}

impl UpstreamKind {
    /// Classify the error text (usually tool stderr) of a failed invocation.
    pub fn classify(text: &str) -> Self {
        const CONNECT_MARKERS: &[&str] = &[
            "getaddrinfo",
            "Name or service not known",
            "Temporary failure in name resolution",
            "Failed to resolve",
            "Connection refused",
            "Network is unreachable",
            "timed out",
        ];

        if text.contains("Video unavailable") {
            Self::Unavailable
        } else if text.contains("Sign in to confirm your age") {
            Self::AccessRestricted
        } else if CONNECT_MARKERS.iter().any(|m| text.contains(m)) {
            Self::CannotConnect
        } else if text.contains("Unsupported URL") || text.contains("is not a valid URL") {
            Self::InvalidUrl
        } else {
            Self::Unknown
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            Self::Unavailable => {
                "Video unavailable. It may be deleted, private, or blocked in your region."
            }
            Self::AccessRestricted => {
                "Video requires age verification. We cannot download this without authentication."
            }
            Self::CannotConnect => "Cannot connect to the source. Check your internet connection.",
            Self::InvalidUrl => "Invalid URL. Please enter a valid media URL.",
            Self::Unknown => "Failed to fetch video info.",
        }
    }
}

/// Coarse error taxonomy used for logging and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    Upstream,
    Process,
    Resource,
    Conflict,
    Cancelled,
    Invalid,
}

/// Normalized error for everything below the request-handling boundary.
///
/// `Display` carries the operator-facing detail; [`DownloadError::user_message`]
/// is the only text that may reach an end user.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Conversion tool not found: {path}")]
    ToolMissing { path: PathBuf },

    #[error("Scratch directory unusable {path}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Upstream error ({kind:?}): {detail}")]
    Upstream { kind: UpstreamKind, detail: String },

    #[error("Malformed tool output: {0}")]
    MalformedMetadata(String),

    #[error("Conversion process failed with exit code {code:?}")]
    ProcessFailed { code: Option<i32> },

    #[error("Process error: {0}")]
    Process(#[source] ProcessError),

    #[error("Converted file missing: {path}")]
    OutputMissing { path: PathBuf },

    #[error("Insufficient free space: {available} bytes available, {required} required")]
    InsufficientSpace { available: u64, required: u64 },

    #[error("Client {client_id} already has an active download")]
    AlreadyRunning { client_id: String },

    #[error("Download cancelled")]
    Cancelled,

    #[error("Conversion exceeded {secs}s limit")]
    TimedOut { secs: u64 },

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),
}

impl DownloadError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ToolMissing { .. } | Self::Scratch { .. } => ErrorClass::Configuration,
            Self::Upstream { .. } | Self::MalformedMetadata(_) => ErrorClass::Upstream,
            Self::ProcessFailed { .. }
            | Self::Process(_)
            | Self::OutputMissing { .. }
            | Self::TimedOut { .. } => ErrorClass::Process,
            Self::InsufficientSpace { .. } => ErrorClass::Resource,
            Self::AlreadyRunning { .. } => ErrorClass::Conflict,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::InvalidLocator(_) => ErrorClass::Invalid,
        }
    }

    /// Single user-facing sentence. Never contains tool output.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Upstream { kind, .. } => kind.user_message(),
            Self::InvalidLocator(_) => UpstreamKind::InvalidUrl.user_message(),
            Self::MalformedMetadata(_) => UpstreamKind::Unknown.user_message(),
            Self::InsufficientSpace { .. } => {
                "The server is low on disk space. Please try again later."
            }
            Self::AlreadyRunning { .. } => {
                "A download is already in progress for this client."
            }
            Self::Cancelled => "Download cancelled.",
            Self::TimedOut { .. } => "Download timed out.",
            Self::ToolMissing { .. } | Self::Scratch { .. } => {
                "The download service is misconfigured."
            }
            Self::ProcessFailed { .. } | Self::Process(_) | Self::OutputMissing { .. } => {
                "Download failed."
            }
        }
    }
}

impl From<ProcessError> for DownloadError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::NotFound { path } => Self::ToolMissing { path },
            other => Self::Process(other),
        }
    }
}
