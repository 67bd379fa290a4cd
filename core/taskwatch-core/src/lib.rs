//! # taskwatch-core
//!
//! Observability for a monitored task environment: a pausable work clock
//! and periodic snapshots of the operator's terminal sessions.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. The capture loop is a plain sleep/tick loop.
//! - **Append-only truth**: Clock history lives in a JSONL log; everything else is a cache.
//! - **Graceful degradation**: Missing files are empty, a failed render or delivery
//!   costs one snapshot, and nothing a tick does stops the loop.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use taskwatch_core::{ClockStore, TaskwatchConfig, TaskwatchPaths, sink_from_config};
//!
//! let config = TaskwatchConfig::load(TaskwatchPaths::discover()?)?;
//! let clock = ClockStore::new(&config.paths, sink_from_config(&config));
//! clock.pause(false)?;
//! ```

pub mod atomic;
pub mod capture;
pub mod clock;
pub mod config;
pub mod error;
pub mod event_log;
pub mod patterns;
pub mod recorder;
pub mod shell;
pub mod telemetry;

pub use clock::{
    format_elapsed, ClockEvent, ClockGate, ClockStatus, ClockStore, ClockSummary, Transition,
};
pub use config::{
    CaptureConfig, DecodePolicy, RecordingMode, RendererConfig, TaskwatchConfig, TaskwatchPaths,
    TelemetryConfig,
};
pub use error::{Result, TaskwatchError};
pub use event_log::{EventLog, Replay};
pub use telemetry::{sink_from_config, EntryKind, JsonlSink, NullSink, SocketSink, TelemetrySink};
