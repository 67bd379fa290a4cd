//! Error types for taskwatch-core operations.

use std::path::PathBuf;

/// All errors that can occur in taskwatch-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskwatchError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Could not determine the operator's shell")]
    ShellNotDetected,

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to lock {path}: {source}")]
    LockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Capture Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Malformed capture record at byte {offset}: {details}")]
    Decode { offset: u64, details: String },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Renderer {program} exited with {code:?}: {output}")]
    RendererFailed {
        program: String,
        code: Option<i32>,
        output: String,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Telemetry Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Telemetry delivery failed: {0}")]
    Telemetry(String),
}

impl TaskwatchError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TaskwatchError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        TaskwatchError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using TaskwatchError.
pub type Result<T> = std::result::Result<T, TaskwatchError>;

impl From<TaskwatchError> for String {
    fn from(err: TaskwatchError) -> String {
        err.to_string()
    }
}
