//! Log streamer service
//!
//! Forwards the growing log text of one job to the registry. The engine
//! always returns the complete text, so the streamer keeps a byte cursor of
//! what the registry has acknowledged and only sends the tail beyond it,
//! split into frames of at most [`MAX_LOG_FRAME_CHARS`] characters.

use mlex_client::ClientError;
use mlex_core::dto::job::MAX_LOG_FRAME_CHARS;
use tracing::{debug, warn};

use crate::repository::Registry;

/// Bytes of a job's log already acknowledged by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCursor {
    pub job_uid: String,
    pub bytes_sent: usize,
}

/// Incremental log forwarding for a single job
///
/// Lives for one monitoring loop and is dropped with it.
pub struct LogStreamer {
    cursor: LogCursor,
    max_frame_chars: usize,
}

impl LogStreamer {
    /// Creates a streamer with nothing sent yet
    pub fn new(job_uid: impl Into<String>) -> Self {
        Self::with_frame_limit(job_uid, MAX_LOG_FRAME_CHARS)
    }

    pub fn with_frame_limit(job_uid: impl Into<String>, max_frame_chars: usize) -> Self {
        Self {
            cursor: LogCursor {
                job_uid: job_uid.into(),
                bytes_sent: 0,
            },
            max_frame_chars: max_frame_chars.max(1),
        }
    }

    pub fn cursor(&self) -> &LogCursor {
        &self.cursor
    }

    /// The part of `full` not yet acknowledged
    ///
    /// Empty if the text is shorter than the cursor (e.g. rotated engine logs)
    /// or the cursor is not on a character boundary; `forward` resyncs the
    /// latter before reading.
    pub fn pending<'a>(&self, full: &'a str) -> &'a str {
        full.get(self.cursor.bytes_sent..).unwrap_or_default()
    }

    /// Sends the unsent tail of `full`, one frame per registry update
    ///
    /// The cursor advances after each acknowledged frame, so a failed frame
    /// is resent in full by the next call.
    ///
    /// # Returns
    /// Number of frames sent
    pub async fn forward(&mut self, registry: &dyn Registry, full: &str) -> Result<usize, ClientError> {
        if full.len() < self.cursor.bytes_sent {
            warn!(
                "Log text for job {} shrank below the {} bytes already sent; skipping",
                self.cursor.job_uid, self.cursor.bytes_sent
            );
            return Ok(0);
        }

        if !full.is_char_boundary(self.cursor.bytes_sent) {
            let next = (self.cursor.bytes_sent..full.len())
                .find(|&idx| full.is_char_boundary(idx))
                .unwrap_or(full.len());
            warn!(
                "Log cursor of job {} fell inside a character at byte {}; resuming at byte {}",
                self.cursor.job_uid, self.cursor.bytes_sent, next
            );
            self.cursor.bytes_sent = next;
        }

        let delta = self.pending(full);
        if delta.is_empty() {
            return Ok(0);
        }

        let mut sent = 0;
        for frame in split_frames(delta, self.max_frame_chars) {
            registry
                .report_status(&self.cursor.job_uid, None, Some(frame))
                .await?;
            self.cursor.bytes_sent += frame.len();
            sent += 1;
        }

        debug!(
            "Sent {} log frame(s) for job {} (cursor at {} bytes)",
            sent, self.cursor.job_uid, self.cursor.bytes_sent
        );
        Ok(sent)
    }
}

/// Splits text into consecutive frames of at most `max_chars` characters
pub fn split_frames(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut frames = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let end = rest
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let (frame, tail) = rest.split_at(end);
        frames.push(frame);
        rest = tail;
    }

    frames
}
