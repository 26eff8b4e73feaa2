//! The run log persisted as `Log.txt`.
//!
//! Every line is mirrored to `tracing` as it is recorded. Per-file logs are
//! built independently (possibly on worker threads) and appended to the
//! run log in file-name order.

use startrack_core::TrackingParameters;
use tracing::{error, info, warn};

/// Name of the shared log artifact.
pub const LOG_FILE_NAME: &str = "Log.txt";

/// Ordered user-facing log lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.lines.push(message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.lines.push(format!("Warning: {}", message));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.lines.push(format!("Error: {}", message));
    }

    /// Appends another log without re-emitting its lines.
    pub fn append(&mut self, other: RunLog) {
        self.lines.extend(other.lines);
    }

    /// Records the run header and the parameter section.
    pub fn settings(&mut self, params: &TrackingParameters) {
        self.info("Batch analysis TrackMate");
        self.info("------------------Settings----------------");
        self.info(format!("Linking Max Distance: {:?}", params.linking_max_distance));
        self.info(format!("Allow Gap Closing: {}", params.allow_gap_closing));
        self.info(format!("Gap Closing Max Distance: {:?}", params.gap_closing_max_distance));
        self.info(format!("Gap Closing Max Frame Gap: {}", params.max_frame_gap));
        self.info(format!("Allow Track Splitting: {}", params.allow_track_splitting));
        self.info(format!("Track Splitting Max Distance: {:?}", params.splitting_max_distance));
        self.info("------------------Analysis----------------");
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }

    /// Newline-terminated text of the whole log.
    pub fn to_text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}
