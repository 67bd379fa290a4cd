//! Terminal capture: reading the recorder's output, cutting it into
//! command-sized windows, and publishing each window.

mod boundary;
mod format;
mod publish;
mod reader;
mod supervisor;
mod trim;
mod window;

pub use boundary::PromptBoundaryDetector;
pub use format::{CaptureEvent, CaptureHeader, Channel};
pub use publish::{
    image_data_url, render_text, CommandRenderer, Outcome, PublishReport, Renderer,
    SnapshotPublisher,
};
pub use reader::{ReadBatch, ReadCursor, SessionTranscriptReader};
pub use supervisor::{
    CaptureSupervisor, Detached, RecorderHandle, ThreadTicker, TickOutcome, Ticker,
};
pub use trim::{rebase, TranscriptTrimmer, TrimmedTranscript};
pub use window::{allocate_window_id, WindowPaths};
