//! Task clock: pause/unpause state and elapsed working time.
//!
//! The append-only log at `<home>/.clock/log.jsonl` is the source of truth.
//! `<code_dir>/.clock/status.txt` caches the latest status so the hot path
//! (one read per capture tick) never replays the log.

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDateTime, TimeZone};
use fs_err as fs;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::atomic::write_atomic;
use crate::config::TaskwatchPaths;
use crate::error::Result;
use crate::event_log::EventLog;
use crate::telemetry::{EntryKind, TelemetrySink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClockStatus {
    Running,
    Stopped,
}

impl ClockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockStatus::Running => "RUNNING",
            ClockStatus::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for ClockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClockStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "RUNNING" => Ok(ClockStatus::Running),
            "STOPPED" => Ok(ClockStatus::Stopped),
            other => Err(format!("unknown clock status '{}'", other)),
        }
    }
}

/// One recorded status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockEvent {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<FixedOffset>,
    pub status: ClockStatus,
}

/// Accepts RFC 3339, or a naive ISO timestamp read as local time.
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<FixedOffset>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp '{}'", raw)))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts);
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.fixed_offset())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClockSummary {
    pub status: ClockStatus,
    pub elapsed_seconds: i64,
}

/// Read-only view of the clock used to gate capture work.
pub trait ClockGate: Send + Sync {
    fn status(&self) -> ClockStatus;

    fn is_running(&self) -> bool {
        self.status() == ClockStatus::Running
    }
}

pub struct ClockStore {
    log: EventLog<ClockEvent>,
    snapshot: std::path::PathBuf,
    sink: Arc<dyn TelemetrySink>,
}

impl ClockStore {
    pub fn new(paths: &TaskwatchPaths, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            log: EventLog::new(paths.clock_log()),
            snapshot: paths.clock_status(),
            sink,
        }
    }

    pub fn log(&self) -> &EventLog<ClockEvent> {
        &self.log
    }

    /// Cached status. A missing snapshot means the clock has never been stopped.
    pub fn get_status(&self) -> ClockStatus {
        match fs::read_to_string(&self.snapshot) {
            Ok(raw) => match raw.parse::<ClockStatus>() {
                Ok(status) => status,
                Err(err) => {
                    warn!(path = %self.snapshot.display(), error = %err, "Garbled clock snapshot; replaying log");
                    self.replay_status()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => ClockStatus::Running,
            Err(err) => {
                warn!(path = %self.snapshot.display(), error = %err, "Unreadable clock snapshot; replaying log");
                self.replay_status()
            }
        }
    }

    /// Status according to the log alone.
    pub fn replay_status(&self) -> ClockStatus {
        match self.log.last() {
            Ok(Some(event)) => event.status,
            Ok(None) => ClockStatus::Running,
            Err(err) => {
                warn!(error = %err, "Failed to replay clock log");
                ClockStatus::Running
            }
        }
    }

    pub fn record_status(&self, status: ClockStatus) -> Result<()> {
        self.record_status_at(status, Local::now().fixed_offset())
    }

    pub fn record_status_at(&self, status: ClockStatus, timestamp: DateTime<FixedOffset>) -> Result<()> {
        self.log.append(&ClockEvent { timestamp, status })?;
        write_atomic(&self.snapshot, status.as_str().as_bytes())
    }

    pub fn pause(&self, force: bool) -> Result<Transition> {
        self.transition(ClockStatus::Stopped, force)
    }

    pub fn unpause(&self, force: bool) -> Result<Transition> {
        self.transition(ClockStatus::Running, force)
    }

    fn transition(&self, target: ClockStatus, force: bool) -> Result<Transition> {
        if !force && self.get_status() == target {
            info!(status = %target, "Clock already in requested state");
            return Ok(Transition::Unchanged);
        }

        let now = Local::now();
        let paused = target == ClockStatus::Stopped;
        let text = EntryKind::clock_text(paused, &now.format("%Y-%m-%d %H:%M:%S").to_string());
        if let Err(err) = self.sink.log_with_attributes(EntryKind::Clock, &text) {
            warn!(error = %err, "Failed to send clock log entry");
        }
        let hook = if paused { self.sink.pause() } else { self.sink.unpause() };
        if let Err(err) = hook {
            warn!(error = %err, status = %target, "Failed to notify collector of clock change");
        }

        self.record_status_at(target, now.fixed_offset())?;
        info!(status = %target, "Clock status changed");
        Ok(Transition::Changed)
    }

    pub fn get_time_elapsed(&self) -> Result<Duration> {
        self.time_elapsed_at(Local::now().fixed_offset())
    }

    /// Total RUNNING time up to `now`, truncated to whole seconds.
    pub fn time_elapsed_at(&self, now: DateTime<FixedOffset>) -> Result<Duration> {
        let replay = self.log.replay()?;
        Ok(elapsed_from_events(&replay.records, now))
    }

    pub fn summary(&self) -> Result<ClockSummary> {
        Ok(ClockSummary {
            status: self.get_status(),
            elapsed_seconds: self.get_time_elapsed()?.num_seconds(),
        })
    }
}

impl ClockGate for ClockStore {
    fn status(&self) -> ClockStatus {
        self.get_status()
    }
}

/// `H:MM:SS`, hours unbounded.
pub fn format_elapsed(elapsed_seconds: i64) -> String {
    let total = elapsed_seconds.max(0);
    format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

fn elapsed_from_events(events: &[ClockEvent], now: DateTime<FixedOffset>) -> Duration {
    let mut total = Duration::zero();
    let mut started: Option<DateTime<FixedOffset>> = None;

    for event in events {
        match event.status {
            ClockStatus::Running => {
                if started.is_none() {
                    started = Some(event.timestamp);
                }
            }
            ClockStatus::Stopped => {
                if let Some(start) = started.take() {
                    total = total + span(start, event.timestamp);
                }
            }
        }
    }

    if let Some(start) = started {
        total = total + span(start, now);
    }

    Duration::seconds(total.num_seconds())
}

fn span(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Duration {
    let span = end.signed_duration_since(start);
    if span < Duration::zero() {
        Duration::zero()
    } else {
        span
    }
}
