//! Decides when enough complete commands have accumulated to publish.
//!
//! The first line the shell prints is taken to be the prompt. Every later
//! output event containing the prompt's first token marks the end of a
//! command; after `prompt_buffer` of them the window up to the last one is
//! flushed, and that prompt opens the next window.

use tracing::debug;

use super::format::CaptureEvent;

#[derive(Debug, Clone)]
pub struct PromptBoundaryDetector {
    prompt_buffer: usize,
    prefix: Option<String>,
}

impl PromptBoundaryDetector {
    pub fn new(prompt_buffer: usize) -> Self {
        Self {
            prompt_buffer: prompt_buffer.max(1),
            prefix: None,
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Locks in the prompt prefix from the first non-blank output event.
    pub fn observe(&mut self, events: &[CaptureEvent]) {
        if self.prefix.is_some() {
            return;
        }
        let first_token = events
            .iter()
            .filter(|event| event.is_output())
            .map(|event| event.data.trim())
            .find(|text| !text.is_empty())
            .and_then(|text| text.split(' ').next())
            .map(str::to_string);

        if let Some(prefix) = first_token {
            debug!(prefix = %prefix, "Detected prompt prefix");
            self.prefix = Some(prefix);
        }
    }

    /// Index of the event that closes the current window, if one is due.
    ///
    /// Events before the returned index are flushed; the event at the index
    /// stays buffered and opens the next window.
    pub fn find_boundary(&mut self, buffered: &[CaptureEvent]) -> Option<usize> {
        self.observe(buffered);
        let prefix = self.prefix.as_deref()?;

        buffered
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, event)| event.is_output() && event.data.contains(prefix))
            .map(|(index, _)| index)
            .nth(self.prompt_buffer - 1)
    }
}
