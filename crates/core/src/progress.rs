// crates/core/src/progress.rs
//! Line-oriented progress extraction from the conversion tool's output.
//!
//! The tool writes free-form text to both stdout and stderr. Chunks from
//! either stream are fed into a [`ProgressParser`], which reassembles lines
//! and turns each complete line into zero or more [`ProgressEvent`]s:
//!
//! - the **last** `NN[.N]%` token on the line becomes `progress(NN)` when it
//!   lies in `[0, 100]`;
//! - a merge/finalize marker becomes `progress(99, "Merging/Finalizing...")`.
//!
//! Anything else is ignored. Unterminated trailing bytes are never parsed.

use std::sync::OnceLock;

use regex_lite::Regex;

use crate::event::ProgressEvent;

/// Phrases the tool prints while merging streams or cleaning up intermediates.
pub const FINALIZE_MARKERS: &[&str] = &["Merger", "Deleting original file"];

/// Upper bound for a buffered, unterminated line. Beyond this the partial
/// line is dropped rather than growing without limit.
const MAX_LINE_BYTES: usize = 64 * 1024;

fn ansi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\x1B(?:\[[0-9;?]*[A-Za-z]|\][^\x07]*\x07)").expect("valid ANSI regex")
    })
}

fn percent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[\s\[])(\d{1,3}(?:\.\d+)?)%").expect("valid percent regex"))
}

/// Remove ANSI colour / cursor escape sequences from a line.
pub fn strip_ansi(line: &str) -> std::borrow::Cow<'_, str> {
    ansi_regex().replace_all(line, "")
}

/// Extract the last percentage on a line, if it is a valid value in `[0, 100]`.
pub fn last_percent(line: &str) -> Option<f64> {
    let last = percent_regex().captures_iter(line).last()?;
    let value: f64 = last.get(1)?.as_str().parse().ok()?;
    (0.0..=100.0).contains(&value).then_some(value)
}

/// Parse one complete line into events.
pub fn parse_line(raw: &str) -> Vec<ProgressEvent> {
    let line = strip_ansi(raw);
    let mut events = Vec::new();

    if let Some(percent) = last_percent(&line) {
        events.push(ProgressEvent::downloading(percent));
    }
    if FINALIZE_MARKERS.iter().any(|m| line.contains(m)) {
        events.push(ProgressEvent::finalizing());
    }

    events
}

/// Incremental parser over raw output chunks.
#[derive(Debug, Default)]
pub struct ProgressParser {
    buf: Vec<u8>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return events for every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ProgressEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            events.extend(parse_line(text.trim_end_matches('\r')));
        }

        if self.buf.len() > MAX_LINE_BYTES {
            tracing::debug!(len = self.buf.len(), "Dropping oversized partial output line");
            self.buf.clear();
        }

        events
    }

    /// Bytes buffered without a terminator yet.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// End of stream: any partial line is discarded.
    pub fn finish(self) {
        if !self.buf.is_empty() {
            tracing::trace!(bytes = self.buf.len(), "Discarding unterminated output");
        }
    }
}
