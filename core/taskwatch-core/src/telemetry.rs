//! Telemetry forwarding to the hook collector.
//!
//! Delivery is best effort: callers log a failed delivery and carry on.
//! There is no retry queue beyond a single immediate retry on the socket.

use chrono::Local;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use taskwatch_protocol::{
    HookEnvelope, HookKind, Method, Request, Response, MAX_REQUEST_BYTES, MAX_RESPONSE_BYTES,
    PROTOCOL_VERSION,
};
use tracing::warn;

use crate::config::{TaskwatchConfig, TelemetryConfig};
use crate::error::{Result, TaskwatchError};
use crate::event_log::EventLog;

const READ_TIMEOUT_MS: u64 = 2000;
const WRITE_TIMEOUT_MS: u64 = 2000;
const RETRY_DELAY_MS: u64 = 50;

// ═══════════════════════════════════════════════════════════════════════════════
// Entry kinds
// ═══════════════════════════════════════════════════════════════════════════════

/// Producer-selected kind of a text log entry; carries its own presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Terminal,
    Clock,
}

impl EntryKind {
    pub fn attributes(&self) -> Value {
        match self {
            EntryKind::Terminal => json!({
                "style": {
                    "color": "white",
                    "background-color": "#424345",
                }
            }),
            EntryKind::Clock => json!({
                "style": {
                    "background-color": "#f7b7c5",
                    "border-color": "#d17b80",
                }
            }),
        }
    }

    pub fn terminal_text(window_id: u32, body: &str) -> String {
        format!("Terminal window: {}\n\n{}", window_id, body)
    }

    pub fn clock_text(paused: bool, at: &str) -> String {
        if paused {
            format!("⏰ Clock paused at {}", at)
        } else {
            format!("⏰ Clock unpaused at {}", at)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sink trait
// ═══════════════════════════════════════════════════════════════════════════════

pub trait TelemetrySink: Send + Sync {
    /// Delivers one hook call.
    fn deliver(&self, hook: HookEnvelope) -> Result<()>;

    fn log_with_attributes(&self, kind: EntryKind, text: &str) -> Result<()> {
        let mut hook = envelope(HookKind::LogWithAttributes);
        hook.content = Some(text.to_string());
        hook.attributes = Some(kind.attributes());
        self.deliver(hook)
    }

    fn log_image(&self, image_url: &str) -> Result<()> {
        let mut hook = envelope(HookKind::LogImage);
        hook.image_url = Some(image_url.to_string());
        self.deliver(hook)
    }

    fn pause(&self) -> Result<()> {
        self.deliver(envelope(HookKind::Pause))
    }

    fn unpause(&self) -> Result<()> {
        self.deliver(envelope(HookKind::Unpause))
    }
}

pub fn envelope(hook: HookKind) -> HookEnvelope {
    HookEnvelope {
        event_id: make_event_id(),
        recorded_at: Local::now().to_rfc3339(),
        hook,
        content: None,
        attributes: None,
        image_url: None,
    }
}

fn make_event_id() -> String {
    let mut random = rand::thread_rng();
    format!(
        "evt-{}-{}-{:x}",
        Local::now().timestamp_millis(),
        std::process::id(),
        random.next_u64()
    )
}

/// Builds the sink selected by configuration.
pub fn sink_from_config(config: &TaskwatchConfig) -> Arc<dyn TelemetrySink> {
    match &config.telemetry {
        TelemetryConfig::Socket { path } => Arc::new(SocketSink::new(
            path.clone()
                .unwrap_or_else(|| config.paths.hooks_socket()),
        )),
        TelemetryConfig::Jsonl { path } => Arc::new(JsonlSink::new(
            path.clone()
                .unwrap_or_else(|| config.paths.hooks_activity_log()),
        )),
        TelemetryConfig::Disabled => Arc::new(NullSink),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Null sink
// ═══════════════════════════════════════════════════════════════════════════════

/// Accepts and drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn deliver(&self, _hook: HookEnvelope) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JSONL sink (local mode)
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookActivity {
    pub timestamp: String,
    pub hook: HookKind,
    pub content: HookEnvelope,
}

/// Appends each hook call to a local activity log.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    log: EventLog<HookActivity>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            log: EventLog::new(path),
        }
    }

    pub fn log(&self) -> &EventLog<HookActivity> {
        &self.log
    }
}

impl TelemetrySink for JsonlSink {
    fn deliver(&self, hook: HookEnvelope) -> Result<()> {
        hook.validate()
            .map_err(|err| TaskwatchError::Telemetry(format!("{}: {}", err.code, err.message)))?;
        self.log.append(&HookActivity {
            timestamp: Local::now().to_rfc3339(),
            hook: hook.hook,
            content: hook,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Socket sink
// ═══════════════════════════════════════════════════════════════════════════════

/// Sends hook calls to the collector over a Unix socket, one request per connection.
#[derive(Debug, Clone)]
pub struct SocketSink {
    socket: PathBuf,
    retry_delay: Duration,
}

impl SocketSink {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    /// Asks the collector whether it is up.
    pub fn health(&self) -> Option<bool> {
        let request = Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetHealth,
            id: Some("health-check".to_string()),
            params: None,
        };

        let response = send_request(&self.socket, &request).ok()?;
        if !response.ok {
            return Some(false);
        }

        let status = response
            .data
            .as_ref()
            .and_then(|data| data.get("status"))
            .and_then(|value| value.as_str());

        Some(matches!(status, Some("ok")))
    }

    fn send_hook(&self, hook: &HookEnvelope) -> Result<()> {
        let request = Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::Hook,
            id: Some(hook.event_id.clone()),
            params: Some(
                serde_json::to_value(hook)
                    .map_err(|e| TaskwatchError::json("serialize hook", e))?,
            ),
        };

        let response = send_request(&self.socket, &request)?;
        if response.ok {
            Ok(())
        } else {
            let message = response
                .error
                .map(|err| format!("{}: {}", err.code, err.message))
                .unwrap_or_else(|| "Unknown collector error".to_string());
            Err(TaskwatchError::Telemetry(message))
        }
    }
}

impl TelemetrySink for SocketSink {
    fn deliver(&self, hook: HookEnvelope) -> Result<()> {
        hook.validate()
            .map_err(|err| TaskwatchError::Telemetry(format!("{}: {}", err.code, err.message)))?;

        match self.send_hook(&hook) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, hook = hook.hook.as_str(), "Failed to send hook to collector");
                std::thread::sleep(self.retry_delay);
                self.send_hook(&hook).map_err(|retry_err| {
                    warn!(
                        error = %retry_err,
                        hook = hook.hook.as_str(),
                        "Retry failed sending hook to collector"
                    );
                    retry_err
                })
            }
        }
    }
}

fn send_request(socket: &Path, request: &Request) -> Result<Response> {
    let mut payload = serde_json::to_vec(request)
        .map_err(|e| TaskwatchError::json("serialize request", e))?;
    if payload.len() > MAX_REQUEST_BYTES {
        return Err(TaskwatchError::Telemetry(format!(
            "request of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_REQUEST_BYTES
        )));
    }
    payload.push(b'\n');

    let mut stream = UnixStream::connect(socket).map_err(|err| {
        TaskwatchError::Telemetry(format!(
            "Failed to connect to {}: {}",
            socket.display(),
            err
        ))
    })?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    stream
        .write_all(&payload)
        .map_err(|err| TaskwatchError::Telemetry(format!("Failed to write request: {}", err)))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_RESPONSE_BYTES {
                    return Err(TaskwatchError::Telemetry(
                        "Response exceeded maximum size".to_string(),
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Err(TaskwatchError::Telemetry(
                    "Timed out waiting for collector response".to_string(),
                ));
            }
            Err(err) => {
                return Err(TaskwatchError::Telemetry(format!(
                    "Failed to read response: {}",
                    err
                )))
            }
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(TaskwatchError::Telemetry(
            "Collector response was empty".to_string(),
        ));
    }

    serde_json::from_slice(response_bytes)
        .map_err(|e| TaskwatchError::json("parse collector response", e))
}
