//! Writes a window of events as a standalone, replayable capture file.

use std::path::{Path, PathBuf};
use tracing::warn;

use super::format::{CaptureEvent, CaptureHeader};
use crate::atomic::write_atomic;
use crate::error::{Result, TaskwatchError};

#[derive(Debug, Clone, PartialEq)]
pub struct TrimmedTranscript {
    pub path: PathBuf,
    pub header: CaptureHeader,
    /// Events with offsets rebased to the window start.
    pub events: Vec<CaptureEvent>,
    /// Un-rebased offset of the last event; the next window is rebased to it.
    pub source_end_offset: f64,
}

#[derive(Debug, Clone)]
pub struct TranscriptTrimmer {
    output: PathBuf,
}

impl TranscriptTrimmer {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub fn trim(
        &self,
        header: &CaptureHeader,
        events: &[CaptureEvent],
        time_offset: f64,
    ) -> Result<TrimmedTranscript> {
        let mut clamped = 0usize;
        let rebased: Vec<CaptureEvent> = events
            .iter()
            .map(|event| {
                let mut offset = rebase(event.offset, time_offset);
                if offset < 0.0 {
                    clamped += 1;
                    offset = 0.0;
                }
                CaptureEvent {
                    offset,
                    channel: event.channel,
                    data: event.data.clone(),
                }
            })
            .collect();

        if clamped > 0 {
            warn!(
                clamped,
                time_offset, "Events precede the window start; clamped to zero"
            );
        }

        let mut content = serde_json::to_string(header)
            .map_err(|e| TaskwatchError::json("serialize capture header", e))?;
        content.push('\n');
        for event in &rebased {
            let line = serde_json::to_string(event)
                .map_err(|e| TaskwatchError::json("serialize capture event", e))?;
            content.push_str(&line);
            content.push('\n');
        }
        write_atomic(&self.output, content.as_bytes())?;

        Ok(TrimmedTranscript {
            path: self.output.clone(),
            header: header.clone(),
            events: rebased,
            source_end_offset: events.last().map(|e| e.offset).unwrap_or(time_offset),
        })
    }
}

/// Shifts `offset` back by `origin`, rounded to microseconds.
pub fn rebase(offset: f64, origin: f64) -> f64 {
    ((offset - origin) * 1e6).round() / 1e6
}
