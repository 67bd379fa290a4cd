//! Incremental reader for a capture file that another process is still writing.
//!
//! Each read starts at a byte cursor and consumes only complete lines, so a
//! record the recorder is halfway through writing is picked up next time.

use fs_err as fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::format::{CaptureEvent, CaptureHeader};
use crate::config::DecodePolicy;
use crate::error::{Result, TaskwatchError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadCursor {
    pub byte_offset: u64,
    /// Whether the header line has been consumed.
    pub header_read: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadBatch {
    /// Present only when this batch consumed the header line.
    pub header: Option<CaptureHeader>,
    pub events: Vec<CaptureEvent>,
    pub cursor: ReadCursor,
    pub skipped: usize,
    /// The file shrank below the incoming cursor and was re-read from the start.
    pub restarted: bool,
}

#[derive(Debug)]
pub struct SessionTranscriptReader {
    path: PathBuf,
    policy: DecodePolicy,
    cursor: ReadCursor,
    header: Option<CaptureHeader>,
    restarted: bool,
}

impl SessionTranscriptReader {
    pub fn new(path: impl Into<PathBuf>, policy: DecodePolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            cursor: ReadCursor::default(),
            header: None,
            restarted: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> ReadCursor {
        self.cursor
    }

    pub fn header(&self) -> Option<&CaptureHeader> {
        self.header.as_ref()
    }

    /// Returns true once after the capture file was found truncated.
    pub fn take_restart(&mut self) -> bool {
        std::mem::take(&mut self.restarted)
    }

    /// Reads new events and advances the reader's own cursor.
    pub fn poll(&mut self) -> Result<Vec<CaptureEvent>> {
        let batch = self.read_new_events(self.cursor)?;
        if batch.restarted {
            self.header = None;
            self.restarted = true;
        }
        if batch.header.is_some() {
            self.header = batch.header;
        }
        self.cursor = batch.cursor;
        Ok(batch.events)
    }

    /// Reads every complete line past `cursor` without touching reader state.
    pub fn read_new_events(&self, cursor: ReadCursor) -> Result<ReadBatch> {
        let mut file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ReadBatch {
                    cursor,
                    ..Default::default()
                });
            }
            Err(err) => return Err(TaskwatchError::io("open capture file", err)),
        };

        let len = file
            .metadata()
            .map_err(|e| TaskwatchError::io("stat capture file", e))?
            .len();

        let mut cursor = cursor;
        let mut restarted = false;
        if len < cursor.byte_offset {
            warn!(
                path = %self.path.display(),
                cursor = cursor.byte_offset,
                len,
                "Capture file shrank; re-reading from the start"
            );
            cursor = ReadCursor::default();
            restarted = true;
        }

        if len == cursor.byte_offset {
            return Ok(ReadBatch {
                cursor,
                restarted,
                ..Default::default()
            });
        }

        file.seek(SeekFrom::Start(cursor.byte_offset))
            .map_err(|e| TaskwatchError::io("seek capture file", e))?;
        let mut bytes = Vec::with_capacity((len - cursor.byte_offset) as usize);
        file.read_to_end(&mut bytes)
            .map_err(|e| TaskwatchError::io("read capture file", e))?;

        let complete = match bytes.iter().rposition(|b| *b == b'\n') {
            Some(last_newline) => &bytes[..=last_newline],
            None => {
                return Ok(ReadBatch {
                    cursor,
                    restarted,
                    ..Default::default()
                })
            }
        };

        let mut batch = ReadBatch {
            restarted,
            ..Default::default()
        };
        let mut header_read = cursor.header_read;
        let mut line_start = cursor.byte_offset;

        for raw_line in complete.split_inclusive(|b| *b == b'\n') {
            let at = line_start;
            line_start += raw_line.len() as u64;

            let line = String::from_utf8_lossy(raw_line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if !header_read {
                header_read = true;
                match serde_json::from_str::<CaptureHeader>(line) {
                    Ok(header) => {
                        batch.header = Some(header);
                        continue;
                    }
                    Err(err) => {
                        self.reject(at, "header", &err.to_string())?;
                        batch.skipped += 1;
                        // A headerless file still carries events.
                        if let Ok(event) = serde_json::from_str::<CaptureEvent>(line) {
                            batch.events.push(event);
                        }
                        continue;
                    }
                }
            }

            match serde_json::from_str::<CaptureEvent>(line) {
                Ok(event) => batch.events.push(event),
                Err(err) => {
                    self.reject(at, "event", &err.to_string())?;
                    batch.skipped += 1;
                }
            }
        }

        batch.cursor = ReadCursor {
            byte_offset: cursor.byte_offset + complete.len() as u64,
            header_read,
        };
        debug!(
            path = %self.path.display(),
            events = batch.events.len(),
            skipped = batch.skipped,
            offset = batch.cursor.byte_offset,
            "Read capture events"
        );
        Ok(batch)
    }

    fn reject(&self, offset: u64, what: &str, details: &str) -> Result<()> {
        match self.policy {
            DecodePolicy::Skip => {
                warn!(
                    path = %self.path.display(),
                    offset,
                    error = %details,
                    "Skipping malformed capture {}",
                    what
                );
                Ok(())
            }
            DecodePolicy::Strict => Err(TaskwatchError::Decode {
                offset,
                details: format!("{}: {}", what, details),
            }),
        }
    }
}
