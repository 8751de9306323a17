// crates/core/src/event.rs
//! Progress events pushed to subscribed clients.

use serde::Serialize;

pub const DOWNLOADING_TEXT: &str = "Downloading...";
pub const FINALIZING_TEXT: &str = "Merging/Finalizing...";
pub const COMPLETE_TEXT: &str = "Download complete!";

/// A single progress notification for one client.
///
/// Serialized with an internal `type` tag, e.g.
/// `{"type":"progress","percent":42.5,"text":"Downloading..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress { percent: f64, text: String },
    Complete { percent: f64, text: String },
    Error { text: String },
}

impl ProgressEvent {
    pub fn downloading(percent: f64) -> Self {
        Self::Progress {
            percent,
            text: DOWNLOADING_TEXT.to_string(),
        }
    }

    pub fn finalizing() -> Self {
        Self::Progress {
            percent: 99.0,
            text: FINALIZING_TEXT.to_string(),
        }
    }

    pub fn complete() -> Self {
        Self::Complete {
            percent: 100.0,
            text: COMPLETE_TEXT.to_string(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error { text: text.into() }
    }

    pub fn percent(&self) -> Option<f64> {
        match self {
            Self::Progress { percent, .. } | Self::Complete { percent, .. } => Some(*percent),
            Self::Error { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_event_wire_format() {
        let json = serde_json::to_value(ProgressEvent::downloading(42.5)).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["percent"], 42.5);
        assert_eq!(json["text"], "Downloading...");

        let json = serde_json::to_value(ProgressEvent::complete()).unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["percent"], 100.0);

        let json = serde_json::to_value(ProgressEvent::error("Download failed.")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["text"], "Download failed.");
        assert!(json.get("percent").is_none());
    }

    #[test]
    fn test_terminal_events() {
        assert!(!ProgressEvent::finalizing().is_terminal());
        assert!(ProgressEvent::complete().is_terminal());
        assert!(ProgressEvent::error("x").is_terminal());
        assert_eq!(ProgressEvent::finalizing().percent(), Some(99.0));
    }
}
