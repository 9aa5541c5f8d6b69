//! Per-request framing markers
//!
//! Every request gets fresh tokens so user output cannot forge the end of a
//! reply. Tokens are only recognised as whole lines.

use uuid::Uuid;

pub const START_PREFIX: &str = "__REPLBOX_START_";
pub const END_PREFIX: &str = "__REPLBOX_END_";
pub const RESET_PREFIX: &str = "__REPLBOX_RESET_";

/// The three tokens used to frame one request and its reset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSet {
    pub start: String,
    pub end: String,
    pub reset: String,
}

impl MarkerSet {
    /// Generate a fresh set of random markers
    pub fn generate() -> Self {
        Self {
            start: format!("{START_PREFIX}{}", Uuid::new_v4().simple()),
            end: format!("{END_PREFIX}{}", Uuid::new_v4().simple()),
            reset: format!("{RESET_PREFIX}{}", Uuid::new_v4().simple()),
        }
    }

    /// Check if any of the markers appears anywhere in `line`
    pub fn contains_any(&self, line: &str) -> bool {
        line.contains(&self.start) || line.contains(&self.end) || line.contains(&self.reset)
    }
}

/// Check if `line` consists of `marker` alone, ignoring surrounding whitespace
///
/// Echoed control statements contain the marker among other text and so
/// never match.
pub fn is_marker_line(line: &str, marker: &str) -> bool {
    line.trim() == marker
}

/// Check if any line in `text` is exactly `marker`
pub fn has_marker_line(text: &str, marker: &str) -> bool {
    text.lines().any(|line| is_marker_line(line, marker))
}
