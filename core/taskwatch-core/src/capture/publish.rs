//! Turns a trimmed window into a text log entry and a rendered image.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fs_err as fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, warn};

use super::format::CaptureEvent;
use super::trim::TrimmedTranscript;
use crate::config::{RecordingMode, RendererConfig};
use crate::error::{Result, TaskwatchError};
use crate::patterns::strip_ansi;
use crate::telemetry::{EntryKind, TelemetrySink};

/// Produces an image from a capture file.
pub trait Renderer: Send + Sync {
    fn render(&self, transcript: &Path, image: &Path) -> Result<()>;
}

/// Runs an external asciicast-to-GIF converter.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    config: RendererConfig,
}

impl CommandRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    pub fn args(&self, transcript: &Path, image: &Path) -> Vec<String> {
        vec![
            transcript.display().to_string(),
            image.display().to_string(),
            format!("--fps-cap={}", self.config.fps_cap),
            format!("--speed={}", self.config.speed),
            format!("--idle-time-limit={}", self.config.idle_time_limit),
            format!("--last-frame-duration={}", self.config.last_frame_duration),
        ]
    }
}

impl Renderer for CommandRenderer {
    fn render(&self, transcript: &Path, image: &Path) -> Result<()> {
        let output = Command::new(&self.config.program)
            .args(self.args(transcript, image))
            .output()
            .map_err(|source| TaskwatchError::Spawn {
                program: self.config.program.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(TaskwatchError::RendererFailed {
            program: self.config.program.clone(),
            code: output.status.code(),
            output: combined.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped,
    Sent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub text: Outcome,
    pub image: Outcome,
    /// The image failed in the renderer rather than in delivery.
    pub renderer_failed: bool,
}

pub struct SnapshotPublisher {
    window_id: u32,
    mode: RecordingMode,
    image_path: PathBuf,
    renderer: Box<dyn Renderer>,
    sink: Arc<dyn TelemetrySink>,
}

impl SnapshotPublisher {
    pub fn new(
        window_id: u32,
        mode: RecordingMode,
        image_path: impl Into<PathBuf>,
        renderer: Box<dyn Renderer>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            window_id,
            mode,
            image_path: image_path.into(),
            renderer,
            sink,
        }
    }

    pub fn publish(&self, flush: &TrimmedTranscript) -> PublishReport {
        self.publish_from(flush, 0)
    }

    /// Like `publish`, but only events from `text_from` on count towards the
    /// text entry. The image always covers the whole window.
    pub fn publish_from(&self, flush: &TrimmedTranscript, text_from: usize) -> PublishReport {
        let unsent = flush.events.get(text_from..).unwrap_or_default();
        let text = if self.mode.publishes_text() {
            self.publish_text(unsent)
        } else {
            Outcome::Skipped
        };

        let (image, renderer_failed) = if self.mode.publishes_images() {
            self.publish_image(&flush.path)
        } else {
            (Outcome::Skipped, false)
        };

        debug!(
            window_id = self.window_id,
            events = flush.events.len(),
            text = ?text,
            image = ?image,
            "Published snapshot"
        );
        PublishReport {
            text,
            image,
            renderer_failed,
        }
    }

    fn publish_text(&self, events: &[CaptureEvent]) -> Outcome {
        let body = render_text(events);
        if body.trim().is_empty() {
            return Outcome::Skipped;
        }
        let text = EntryKind::terminal_text(self.window_id, &body);
        match self.sink.log_with_attributes(EntryKind::Terminal, &text) {
            Ok(()) => Outcome::Sent,
            Err(err) => {
                warn!(window_id = self.window_id, error = %err, "Failed to send terminal text");
                Outcome::Failed(err.to_string())
            }
        }
    }

    fn publish_image(&self, transcript: &Path) -> (Outcome, bool) {
        if let Err(err) = self.renderer.render(transcript, &self.image_path) {
            warn!(window_id = self.window_id, error = %err, "Renderer failed");
            return (Outcome::Failed(err.to_string()), true);
        }

        let url = match image_data_url(&self.image_path) {
            Ok(url) => url,
            Err(err) => {
                warn!(window_id = self.window_id, error = %err, "Rendered image unreadable");
                return (Outcome::Failed(err.to_string()), true);
            }
        };

        match self.sink.log_image(&url) {
            Ok(()) => (Outcome::Sent, false),
            Err(err) => {
                warn!(window_id = self.window_id, error = %err, "Failed to send terminal image");
                (Outcome::Failed(err.to_string()), false)
            }
        }
    }
}

/// Output-channel text with terminal escapes removed.
pub fn render_text(events: &[CaptureEvent]) -> String {
    let raw: String = events
        .iter()
        .filter(|event| event.is_output())
        .map(|event| event.data.as_str())
        .collect();
    strip_ansi(&raw)
}

pub fn image_data_url(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| TaskwatchError::io("read rendered image", e))?;
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("gif")
        .to_ascii_lowercase();
    Ok(format!("data:image/{};base64,{}", ext, STANDARD.encode(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::format::CaptureHeader;
    use std::sync::Mutex;
    use taskwatch_protocol::{HookEnvelope, HookKind};
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingSink {
        hooks: Mutex<Vec<HookEnvelope>>,
    }

    impl TelemetrySink for RecordingSink {
        fn deliver(&self, hook: HookEnvelope) -> Result<()> {
            self.hooks.lock().unwrap().push(hook);
            Ok(())
        }
    }

    struct FileRenderer(&'static [u8]);

    impl Renderer for FileRenderer {
        fn render(&self, _transcript: &Path, image: &Path) -> Result<()> {
            std::fs::write(image, self.0).unwrap();
            Ok(())
        }
    }

    struct BrokenRenderer;

    impl Renderer for BrokenRenderer {
        fn render(&self, _transcript: &Path, _image: &Path) -> Result<()> {
            Err(TaskwatchError::RendererFailed {
                program: "agg".to_string(),
                code: Some(1),
                output: "boom".to_string(),
            })
        }
    }

    fn flush(dir: &Path) -> TrimmedTranscript {
        TrimmedTranscript {
            path: dir.join("trimmed_terminal.cast"),
            header: CaptureHeader::new(80, 24),
            events: vec![
                CaptureEvent::output(0.0, "\x1b[32m$\x1b[0m "),
                CaptureEvent::input(0.1, "ls\r"),
                CaptureEvent::output(0.2, "ls\r\nfile.txt\r\n"),
            ],
            source_end_offset: 0.2,
        }
    }

    #[test]
    fn text_is_stripped_and_prefixed_with_window() {
        let temp = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let publisher = SnapshotPublisher::new(
            4,
            RecordingMode::TextTerminalRecording,
            temp.path().join("terminal.gif"),
            Box::new(BrokenRenderer),
            sink.clone(),
        );

        let report = publisher.publish(&flush(temp.path()));
        assert_eq!(report.text, Outcome::Sent);
        assert_eq!(report.image, Outcome::Skipped);

        let hooks = sink.hooks.lock().unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(
            hooks[0].content.as_deref(),
            Some("Terminal window: 4\n\n$ ls\r\nfile.txt\r\n")
        );
        assert_eq!(hooks[0].attributes, Some(EntryKind::Terminal.attributes()));
    }

    #[test]
    fn image_is_sent_as_base64_data_url() {
        let temp = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let publisher = SnapshotPublisher::new(
            0,
            RecordingMode::GifTerminalRecording,
            temp.path().join("terminal.gif"),
            Box::new(FileRenderer(b"GIF89a")),
            sink.clone(),
        );

        let report = publisher.publish(&flush(temp.path()));
        assert_eq!(report.text, Outcome::Skipped);
        assert_eq!(report.image, Outcome::Sent);

        let hooks = sink.hooks.lock().unwrap();
        assert_eq!(hooks[0].hook, HookKind::LogImage);
        assert_eq!(hooks[0].image_url.as_deref(), Some("data:image/gif;base64,R0lGODlh"));
    }

    #[test]
    fn renderer_failure_does_not_block_text() {
        let temp = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let publisher = SnapshotPublisher::new(
            1,
            RecordingMode::FullTerminalRecording,
            temp.path().join("terminal.gif"),
            Box::new(BrokenRenderer),
            sink.clone(),
        );

        let report = publisher.publish(&flush(temp.path()));
        assert_eq!(report.text, Outcome::Sent);
        assert!(matches!(report.image, Outcome::Failed(ref msg) if msg.contains("boom")));
        assert!(report.renderer_failed);
        assert_eq!(sink.hooks.lock().unwrap().len(), 1);
    }

    #[test]
    fn text_from_skips_events_already_sent() {
        let temp = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let publisher = SnapshotPublisher::new(
            2,
            RecordingMode::TextTerminalRecording,
            temp.path().join("terminal.gif"),
            Box::new(BrokenRenderer),
            sink.clone(),
        );

        let report = publisher.publish_from(&flush(temp.path()), 2);
        assert_eq!(report.text, Outcome::Sent);
        assert_eq!(
            sink.hooks.lock().unwrap()[0].content.as_deref(),
            Some("Terminal window: 2\n\nls\r\nfile.txt\r\n")
        );

        let report = publisher.publish_from(&flush(temp.path()), 3);
        assert_eq!(report.text, Outcome::Skipped);
        assert_eq!(sink.hooks.lock().unwrap().len(), 1);
    }

    #[test]
    fn blank_text_is_not_sent() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = SnapshotPublisher::new(
            1,
            RecordingMode::TextTerminalRecording,
            "/nonexistent/terminal.gif",
            Box::new(BrokenRenderer),
            sink.clone(),
        );
        let mut only_input = flush(Path::new("/nonexistent"));
        only_input.events = vec![CaptureEvent::output(0.0, "\x1b[2J"), CaptureEvent::input(0.1, "x")];

        let report = publisher.publish(&only_input);
        assert_eq!(report.text, Outcome::Skipped);
        assert!(sink.hooks.lock().unwrap().is_empty());
    }

    #[test]
    fn command_renderer_passes_tuning_flags() {
        let renderer = CommandRenderer::new(RendererConfig::default());
        let args = renderer.args(Path::new("in.cast"), Path::new("out.gif"));
        assert_eq!(
            args,
            vec![
                "in.cast",
                "out.gif",
                "--fps-cap=7",
                "--speed=3",
                "--idle-time-limit=1",
                "--last-frame-duration=5",
            ]
        );
    }

    #[test]
    fn command_renderer_reports_missing_program() {
        let renderer = CommandRenderer::new(RendererConfig {
            program: "/nonexistent/agg-binary".to_string(),
            ..RendererConfig::default()
        });
        let err = renderer
            .render(Path::new("in.cast"), Path::new("out.gif"))
            .unwrap_err();
        assert!(matches!(err, TaskwatchError::Spawn { .. }));
    }
}
