//! The capture loop for one terminal window.
//!
//! Each tick: skip if the clock is stopped, otherwise pull new events into
//! the buffer, flush a window when a prompt boundary (or session end) is
//! reached, and publish it. Nothing a single tick does is fatal to the loop.
//! A window whose render failed waits for the next full window before it is
//! retried, and its text is not sent again.

use std::path::PathBuf;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::boundary::PromptBoundaryDetector;
use super::format::{CaptureEvent, CaptureHeader};
use super::publish::{CommandRenderer, PublishReport, SnapshotPublisher};
use super::reader::SessionTranscriptReader;
use super::trim::TranscriptTrimmer;
use super::window::WindowPaths;
use crate::clock::ClockGate;
use crate::config::TaskwatchConfig;
use crate::error::Result;
use crate::telemetry::TelemetrySink;

const FALLBACK_WIDTH: u32 = 80;
const FALLBACK_HEIGHT: u32 = 24;

/// Sleeps between ticks.
pub trait Ticker {
    fn sleep(&mut self, interval: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTicker;

impl Ticker for ThreadTicker {
    fn sleep(&mut self, interval: Duration) {
        std::thread::sleep(interval);
    }
}

/// The process producing the capture file.
pub trait RecorderHandle {
    fn is_alive(&mut self) -> bool;
}

impl RecorderHandle for Child {
    fn is_alive(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }
}

/// Stands in for a recorder when monitoring an existing window.
#[derive(Debug, Default, Clone, Copy)]
pub struct Detached;

impl RecorderHandle for Detached {
    fn is_alive(&mut self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Clock stopped; nothing read.
    Paused,
    /// Running, but the buffer is empty.
    Idle,
    Buffered { pending: usize },
    Flushed {
        events: usize,
        pending: usize,
        report: PublishReport,
    },
    /// The renderer failed; the window stays buffered until a later boundary.
    FlushFailed { pending: usize },
}

pub struct CaptureSupervisor {
    reader: SessionTranscriptReader,
    detector: PromptBoundaryDetector,
    trimmer: TranscriptTrimmer,
    publisher: SnapshotPublisher,
    clock: Arc<dyn ClockGate>,
    buffer: Vec<CaptureEvent>,
    last_flush_offset: f64,
    /// Cut of the last window whose render failed; retried only past it.
    failed_cut: Option<usize>,
    /// Leading buffered events whose text has already been published.
    text_sent: usize,
    markers: Vec<PathBuf>,
    terminating: bool,
    tick_interval: Duration,
}

impl CaptureSupervisor {
    pub fn new(
        reader: SessionTranscriptReader,
        detector: PromptBoundaryDetector,
        trimmer: TranscriptTrimmer,
        publisher: SnapshotPublisher,
        clock: Arc<dyn ClockGate>,
    ) -> Self {
        Self {
            reader,
            detector,
            trimmer,
            publisher,
            clock,
            buffer: Vec::new(),
            last_flush_offset: 0.0,
            failed_cut: None,
            text_sent: 0,
            markers: Vec::new(),
            terminating: false,
            tick_interval: Duration::from_millis(500),
        }
    }

    /// Wires up the real reader, renderer and markers for one window.
    pub fn for_window(
        config: &TaskwatchConfig,
        window: &WindowPaths,
        clock: Arc<dyn ClockGate>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        let publisher = SnapshotPublisher::new(
            window.id,
            config.recording_mode,
            &window.image,
            Box::new(CommandRenderer::new(config.renderer.clone())),
            sink,
        );
        Self::new(
            SessionTranscriptReader::new(&window.capture, config.capture.decode_policy),
            PromptBoundaryDetector::new(config.capture.prompt_buffer),
            TranscriptTrimmer::new(&window.trimmed),
            publisher,
            clock,
        )
        .with_termination_markers(vec![
            window.marker.clone(),
            config.paths.submission_marker(),
        ])
        .with_tick_interval(config.tick_interval())
    }

    /// Files whose appearance means the session is over.
    pub fn with_termination_markers(mut self, markers: Vec<PathBuf>) -> Self {
        self.markers = markers;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn last_flush_offset(&self) -> f64 {
        self.last_flush_offset
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating
    }

    pub fn tick(&mut self) -> Result<TickOutcome> {
        if !self.clock.is_running() {
            return Ok(TickOutcome::Paused);
        }

        let events = self.reader.poll()?;
        if self.reader.take_restart() {
            warn!(
                dropped = self.buffer.len(),
                "Recorder restarted; discarding buffered events"
            );
            self.buffer.clear();
            self.last_flush_offset = 0.0;
            self.failed_cut = None;
            self.text_sent = 0;
        }
        self.buffer.extend(events);

        if !self.terminating {
            if let Some(marker) = self.markers.iter().find(|marker| marker.exists()) {
                info!(marker = %marker.display(), "Session ended; flushing everything buffered");
                self.terminating = true;
            }
        }

        if self.buffer.is_empty() {
            return Ok(TickOutcome::Idle);
        }

        let cut = if self.terminating {
            Some(self.buffer.len())
        } else {
            self.next_boundary()
        };

        match cut {
            Some(cut) if cut > 0 => self.flush(cut, self.terminating),
            _ => Ok(TickOutcome::Buffered {
                pending: self.buffer.len(),
            }),
        }
    }

    /// After a failed render, only a full window beyond the failed cut counts.
    fn next_boundary(&mut self) -> Option<usize> {
        match self.failed_cut {
            None => self.detector.find_boundary(&self.buffer),
            Some(failed) => self
                .detector
                .find_boundary(&self.buffer[failed..])
                .map(|cut| failed + cut),
        }
    }

    fn flush(&mut self, cut: usize, forced: bool) -> Result<TickOutcome> {
        let header = self
            .reader
            .header()
            .cloned()
            .unwrap_or_else(|| CaptureHeader::new(FALLBACK_WIDTH, FALLBACK_HEIGHT));

        let trimmed = self
            .trimmer
            .trim(&header, &self.buffer[..cut], self.last_flush_offset)?;
        let report = self
            .publisher
            .publish_from(&trimmed, self.text_sent.min(cut));
        self.text_sent = self.text_sent.max(cut);

        if report.renderer_failed && !forced {
            warn!(
                pending = self.buffer.len(),
                "Snapshot render failed; keeping window for the next boundary"
            );
            self.failed_cut = Some(cut);
            return Ok(TickOutcome::FlushFailed {
                pending: self.buffer.len(),
            });
        }

        self.buffer.drain(..cut);
        self.failed_cut = None;
        self.text_sent -= cut;
        self.last_flush_offset = trimmed.source_end_offset;
        debug!(
            events = cut,
            pending = self.buffer.len(),
            offset = self.last_flush_offset,
            "Flushed capture window"
        );
        Ok(TickOutcome::Flushed {
            events: cut,
            pending: self.buffer.len(),
            report,
        })
    }

    /// Ticks until `stop` is set or the recorder exits.
    pub fn run(
        &mut self,
        recorder: &mut dyn RecorderHandle,
        ticker: &mut dyn Ticker,
        stop: &AtomicBool,
    ) {
        while !stop.load(Ordering::SeqCst) && recorder.is_alive() {
            if let Err(err) = self.tick() {
                warn!(error = %err, "Capture tick failed");
            }
            ticker.sleep(self.tick_interval);
        }
        info!(pending = self.buffer.len(), "Capture loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::publish::{Outcome, Renderer};
    use crate::clock::ClockStatus;
    use crate::config::{DecodePolicy, RecordingMode};
    use crate::error::TaskwatchError;
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use taskwatch_protocol::HookEnvelope;
    use tempfile::{tempdir, TempDir};

    struct FixedClock(Mutex<ClockStatus>);

    impl ClockGate for FixedClock {
        fn status(&self) -> ClockStatus {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        texts: Mutex<Vec<String>>,
    }

    impl TelemetrySink for RecordingSink {
        fn deliver(&self, hook: HookEnvelope) -> Result<()> {
            if let Some(content) = hook.content {
                self.texts.lock().unwrap().push(content);
            }
            Ok(())
        }
    }

    /// Fails the first `failures` renders, then writes a tiny image.
    struct FlakyRenderer {
        failures: AtomicUsize,
    }

    impl Renderer for FlakyRenderer {
        fn render(&self, _transcript: &Path, image: &Path) -> Result<()> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(TaskwatchError::RendererFailed {
                    program: "agg".to_string(),
                    code: Some(1),
                    output: String::new(),
                });
            }
            std::fs::write(image, b"GIF89a").unwrap();
            Ok(())
        }
    }

    struct Fixture {
        _temp: TempDir,
        capture: PathBuf,
        marker: PathBuf,
        clock: Arc<FixedClock>,
        sink: Arc<RecordingSink>,
        supervisor: CaptureSupervisor,
    }

    fn fixture(mode: RecordingMode, render_failures: usize) -> Fixture {
        let temp = tempdir().unwrap();
        let capture = temp.path().join("terminal.cast");
        let marker = temp.path().join("submitted");
        let clock = Arc::new(FixedClock(Mutex::new(ClockStatus::Running)));
        let sink = Arc::new(RecordingSink::default());

        let publisher = SnapshotPublisher::new(
            0,
            mode,
            temp.path().join("terminal.gif"),
            Box::new(FlakyRenderer {
                failures: AtomicUsize::new(render_failures),
            }),
            sink.clone(),
        );
        let supervisor = CaptureSupervisor::new(
            SessionTranscriptReader::new(&capture, DecodePolicy::Skip),
            PromptBoundaryDetector::new(2),
            TranscriptTrimmer::new(temp.path().join("trimmed_terminal.cast")),
            publisher,
            clock.clone(),
        )
        .with_termination_markers(vec![marker.clone()])
        .with_tick_interval(Duration::from_millis(1));

        Fixture {
            _temp: temp,
            capture,
            marker,
            clock,
            sink,
            supervisor,
        }
    }

    fn append(path: &Path, lines: &[&str]) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    const SESSION: [&str; 7] = [
        r#"{"version":2,"width":80,"height":24}"#,
        r#"[1.0, "o", "$ "]"#,
        r#"[1.5, "o", "$ "]"#,
        r#"[2.0, "i", "ls\r"]"#,
        r#"[2.5, "o", "$ "]"#,
        r#"[3.0, "o", "a.txt\r\n"]"#,
        r#"[3.5, "o", "$ "]"#,
    ];

    #[test]
    fn paused_clock_does_not_read() {
        let mut fx = fixture(RecordingMode::TextTerminalRecording, 0);
        append(&fx.capture, &SESSION);
        *fx.clock.0.lock().unwrap() = ClockStatus::Stopped;

        assert_eq!(fx.supervisor.tick().unwrap(), TickOutcome::Paused);
        assert_eq!(fx.supervisor.pending(), 0);

        *fx.clock.0.lock().unwrap() = ClockStatus::Running;
        assert!(matches!(
            fx.supervisor.tick().unwrap(),
            TickOutcome::Flushed { events: 3, pending: 3, .. }
        ));
    }

    #[test]
    fn idle_until_capture_appears() {
        let mut fx = fixture(RecordingMode::TextTerminalRecording, 0);
        assert_eq!(fx.supervisor.tick().unwrap(), TickOutcome::Idle);
    }

    #[test]
    fn successive_windows_rebase_from_last_flushed_event() {
        let mut fx = fixture(RecordingMode::TextTerminalRecording, 0);
        append(&fx.capture, &SESSION[..3]);
        assert_eq!(
            fx.supervisor.tick().unwrap(),
            TickOutcome::Buffered { pending: 2 }
        );

        append(&fx.capture, &SESSION[3..]);
        fx.supervisor.tick().unwrap();
        assert_eq!(fx.supervisor.last_flush_offset(), 2.0);
        assert_eq!(fx.supervisor.pending(), 3);
    }

    const NEXT_WINDOW: [&str; 2] = [r#"[4.0, "o", "b.txt\r\n"]"#, r#"[4.5, "o", "$ "]"#];

    #[test]
    fn renderer_failure_keeps_window_buffered() {
        let mut fx = fixture(RecordingMode::FullTerminalRecording, 1);
        append(&fx.capture, &SESSION);

        assert_eq!(
            fx.supervisor.tick().unwrap(),
            TickOutcome::FlushFailed { pending: 6 }
        );
        assert_eq!(fx.supervisor.last_flush_offset(), 0.0);
        assert_eq!(
            fx.supervisor.tick().unwrap(),
            TickOutcome::Buffered { pending: 6 }
        );

        append(&fx.capture, &NEXT_WINDOW);
        match fx.supervisor.tick().unwrap() {
            TickOutcome::Flushed {
                events,
                pending,
                report,
            } => {
                assert_eq!(events, 7);
                assert_eq!(pending, 1);
                assert_eq!(report.image, Outcome::Sent);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fx.supervisor.last_flush_offset(), 4.0);
        assert_eq!(
            *fx.sink.texts.lock().unwrap(),
            vec![
                "Terminal window: 0\n\n$ $ ".to_string(),
                "Terminal window: 0\n\n$ a.txt\r\n$ b.txt\r\n".to_string(),
            ]
        );
    }

    #[test]
    fn failing_renderer_sends_text_once_while_idle() {
        let mut fx = fixture(RecordingMode::FullTerminalRecording, usize::MAX);
        append(&fx.capture, &SESSION);

        assert_eq!(
            fx.supervisor.tick().unwrap(),
            TickOutcome::FlushFailed { pending: 6 }
        );
        for _ in 0..10 {
            assert_eq!(
                fx.supervisor.tick().unwrap(),
                TickOutcome::Buffered { pending: 6 }
            );
        }
        assert_eq!(fx.sink.texts.lock().unwrap().len(), 1);

        append(&fx.capture, &NEXT_WINDOW);
        assert_eq!(
            fx.supervisor.tick().unwrap(),
            TickOutcome::FlushFailed { pending: 8 }
        );
        assert_eq!(fx.sink.texts.lock().unwrap().len(), 2);

        std::fs::write(&fx.marker, "").unwrap();
        assert!(matches!(
            fx.supervisor.tick().unwrap(),
            TickOutcome::Flushed { events: 8, pending: 0, .. }
        ));
        let texts = fx.sink.texts.lock().unwrap();
        assert_eq!(texts.len(), 3);
        assert_eq!(texts[2], "Terminal window: 0\n\n$ ");
    }

    #[test]
    fn submission_marker_forces_full_flush() {
        let mut fx = fixture(RecordingMode::FullTerminalRecording, 5);
        append(&fx.capture, &SESSION[..3]);
        std::fs::write(&fx.marker, "").unwrap();

        match fx.supervisor.tick().unwrap() {
            TickOutcome::Flushed {
                events,
                pending,
                report,
            } => {
                assert_eq!(events, 2);
                assert_eq!(pending, 0);
                assert!(report.renderer_failed);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(fx.supervisor.is_terminating());
        assert_eq!(fx.sink.texts.lock().unwrap().len(), 1);
    }

    #[test]
    fn run_stops_when_recorder_exits() {
        struct Countdown(usize);
        impl RecorderHandle for Countdown {
            fn is_alive(&mut self) -> bool {
                if self.0 == 0 {
                    return false;
                }
                self.0 -= 1;
                true
            }
        }

        #[derive(Default)]
        struct CountingTicker(usize);
        impl Ticker for CountingTicker {
            fn sleep(&mut self, _interval: Duration) {
                self.0 += 1;
            }
        }

        let mut fx = fixture(RecordingMode::TextTerminalRecording, 0);
        let mut recorder = Countdown(3);
        let mut ticker = CountingTicker::default();
        let stop = AtomicBool::new(false);

        fx.supervisor.run(&mut recorder, &mut ticker, &stop);
        assert_eq!(ticker.0, 3);
    }

    #[test]
    fn run_honours_stop_flag() {
        let mut fx = fixture(RecordingMode::TextTerminalRecording, 0);
        let stop = AtomicBool::new(true);
        let mut ticker = ThreadTicker;
        fx.supervisor.run(&mut Detached, &mut ticker, &stop);
        assert_eq!(fx.supervisor.pending(), 0);
    }
}
