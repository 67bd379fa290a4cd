//! Configuration loading.
//!
//! One [`TaskwatchConfig`] is built at process start and handed to every
//! component constructor. Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. `<code_dir>/taskwatch.toml`
//! 3. `<code_dir>/run_info.json` (`agent.terminal_recording` picks the recording mode)
//! 4. Environment (`TASKWATCH_HOME`, `TASKWATCH_LOCAL_MODE`, `TASKWATCH_HOOKS_SOCKET`)
//! 5. CLI flags, applied by the binary
//!
//! Missing files fall back to defaults; files that exist but do not parse are errors.

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Result, TaskwatchError};

pub const HOME_ENV: &str = "TASKWATCH_HOME";
pub const LOCAL_MODE_ENV: &str = "TASKWATCH_LOCAL_MODE";
pub const HOOKS_SOCKET_ENV: &str = "TASKWATCH_HOOKS_SOCKET";

const DEFAULT_HOME: &str = "/home/agent";
const LOCAL_MODE_FLAG_FILE: &str = "local.flag";
const CONFIG_FILE_NAME: &str = "taskwatch.toml";
const MIN_TICK_INTERVAL_MS: u64 = 50;

pub fn env_flag_enabled(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES")
}

// ═══════════════════════════════════════════════════════════════════════════════
// Paths
// ═══════════════════════════════════════════════════════════════════════════════

/// Filesystem layout of a task environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskwatchPaths {
    pub home_dir: PathBuf,
    pub code_dir: PathBuf,
    #[serde(default)]
    pub local_mode: bool,
}

impl TaskwatchPaths {
    pub fn new(home_dir: impl Into<PathBuf>, code_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            code_dir: code_dir.into(),
            local_mode: false,
        }
    }

    /// Layout rooted at `home`, with the code dir at `<home>/.agent_code`.
    pub fn rooted_at(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let code_dir = home.join(".agent_code");
        Self::new(home, code_dir)
    }

    /// Resolves the layout from the process environment.
    pub fn discover() -> Result<Self> {
        let cwd = env::current_dir().map_err(|e| TaskwatchError::io("current dir", e))?;
        Ok(Self::discover_with(|key| env::var(key).ok(), &cwd))
    }

    pub fn discover_with(lookup: impl Fn(&str) -> Option<String>, cwd: &Path) -> Self {
        let local_mode = lookup(LOCAL_MODE_ENV)
            .map(|value| env_flag_enabled(&value))
            .unwrap_or(false)
            || cwd.join(LOCAL_MODE_FLAG_FILE).exists();

        let home = match lookup(HOME_ENV) {
            Some(home) if !home.trim().is_empty() => PathBuf::from(home),
            _ if local_mode => cwd.to_path_buf(),
            _ => PathBuf::from(DEFAULT_HOME),
        };

        let mut paths = Self::rooted_at(home);
        paths.local_mode = local_mode;
        paths
    }

    pub fn terminals_dir(&self) -> PathBuf {
        self.code_dir.join(".terminals")
    }

    pub fn clock_log(&self) -> PathBuf {
        self.home_dir.join(".clock").join("log.jsonl")
    }

    pub fn clock_status(&self) -> PathBuf {
        self.code_dir.join(".clock").join("status.txt")
    }

    pub fn run_info(&self) -> PathBuf {
        self.code_dir.join("run_info.json")
    }

    pub fn config_file(&self) -> PathBuf {
        self.code_dir.join(CONFIG_FILE_NAME)
    }

    /// Written by the submission flow; its presence ends the task.
    pub fn submission_marker(&self) -> PathBuf {
        self.code_dir.join("submission.txt")
    }

    pub fn hooks_socket(&self) -> PathBuf {
        self.code_dir.join("hooks.sock")
    }

    pub fn hooks_activity_log(&self) -> PathBuf {
        self.home_dir.join("hooks_activity.jsonl")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.code_dir.join(".logs")
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════════════════════════

/// Which snapshot artifacts the operator's run asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingMode {
    #[default]
    NoTerminalRecording,
    TextTerminalRecording,
    GifTerminalRecording,
    FullTerminalRecording,
}

impl RecordingMode {
    pub fn publishes_text(&self) -> bool {
        matches!(
            self,
            RecordingMode::TextTerminalRecording | RecordingMode::FullTerminalRecording
        )
    }

    pub fn publishes_images(&self) -> bool {
        matches!(
            self,
            RecordingMode::GifTerminalRecording | RecordingMode::FullTerminalRecording
        )
    }
}

/// What to do with a capture line that does not decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Warn and move past the line.
    #[default]
    Skip,
    /// Fail the read without advancing the cursor.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Prompt recurrences required before a window is flushed.
    pub prompt_buffer: usize,
    pub tick_interval_ms: u64,
    pub decode_policy: DecodePolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            prompt_buffer: 5,
            tick_interval_ms: 500,
            decode_policy: DecodePolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub program: String,
    pub fps_cap: u32,
    pub speed: f64,
    /// Seconds; longer pauses are compressed to this.
    pub idle_time_limit: f64,
    /// Seconds the final frame is held.
    pub last_frame_duration: f64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: "agg".to_string(),
            fps_cap: 7,
            speed: 3.0,
            idle_time_limit: 1.0,
            last_frame_duration: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub program: String,
    /// Environment variables always carried into the recording.
    pub preserved_env: Vec<String>,
    /// Prefixes of task variables carried into the recording.
    pub preserved_env_prefixes: Vec<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            program: "asciinema".to_string(),
            preserved_env: vec![
                "SHELL".to_string(),
                "TERM".to_string(),
                "API_URL".to_string(),
            ],
            preserved_env_prefixes: ["AGENT_", "METR_", "RUN_", "TASK_"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "sink", rename_all = "snake_case")]
pub enum TelemetryConfig {
    /// Newline-delimited JSON over a Unix socket to the hook collector.
    Socket {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Append hook calls to a local JSONL file.
    Jsonl {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    Disabled,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig::Socket { path: None }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskwatchConfig {
    pub paths: TaskwatchPaths,
    /// Where per-window capture directories live. Defaults to `paths.terminals_dir()`.
    pub terminals_dir: PathBuf,
    pub recording_mode: RecordingMode,
    pub capture: CaptureConfig,
    pub renderer: RendererConfig,
    pub recorder: RecorderConfig,
    pub telemetry: TelemetryConfig,
}

/// Shape of `taskwatch.toml`; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    terminals_dir: Option<PathBuf>,
    #[serde(default)]
    recording_mode: Option<RecordingMode>,
    #[serde(default)]
    capture: Option<CaptureConfig>,
    #[serde(default)]
    renderer: Option<RendererConfig>,
    #[serde(default)]
    recorder: Option<RecorderConfig>,
    #[serde(default)]
    telemetry: Option<TelemetryConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RunInfo {
    #[serde(default)]
    agent: RunInfoAgent,
}

#[derive(Debug, Default, Deserialize)]
struct RunInfoAgent {
    #[serde(default)]
    terminal_recording: Option<RecordingMode>,
}

impl TaskwatchConfig {
    pub fn defaults(paths: TaskwatchPaths) -> Self {
        let telemetry = if paths.local_mode {
            TelemetryConfig::Jsonl { path: None }
        } else {
            TelemetryConfig::default()
        };
        Self {
            terminals_dir: paths.terminals_dir(),
            paths,
            recording_mode: RecordingMode::default(),
            capture: CaptureConfig::default(),
            renderer: RendererConfig::default(),
            recorder: RecorderConfig::default(),
            telemetry,
        }
    }

    /// Loads config files under `paths` and applies process environment overrides.
    pub fn load(paths: TaskwatchPaths) -> Result<Self> {
        let mut config = Self::load_files(paths)?;
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn load_files(paths: TaskwatchPaths) -> Result<Self> {
        let mut config = Self::defaults(paths);

        if let Some(file) = read_config_file(&config.paths.config_file())? {
            if let Some(dir) = file.terminals_dir {
                config.terminals_dir = dir;
            }
            if let Some(mode) = file.recording_mode {
                config.recording_mode = mode;
            }
            if let Some(capture) = file.capture {
                config.capture = capture;
            }
            if let Some(renderer) = file.renderer {
                config.renderer = renderer;
            }
            if let Some(recorder) = file.recorder {
                config.recorder = recorder;
            }
            if let Some(telemetry) = file.telemetry {
                config.telemetry = telemetry;
            }
        }

        if let Some(mode) = read_run_info_mode(&config.paths.run_info())? {
            config.recording_mode = mode;
        }

        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(socket) = lookup(HOOKS_SOCKET_ENV).filter(|v| !v.trim().is_empty()) {
            self.telemetry = TelemetryConfig::Socket {
                path: Some(PathBuf::from(socket)),
            };
        }
    }

    /// Poll interval, never shorter than `MIN_TICK_INTERVAL_MS`.
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.capture.tick_interval_ms.max(MIN_TICK_INTERVAL_MS))
    }
}

fn read_config_file(path: &Path) -> Result<Option<ConfigFile>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(TaskwatchError::io("read config file", err)),
    };

    toml::from_str::<ConfigFile>(&content)
        .map(Some)
        .map_err(|err| TaskwatchError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
}

fn read_run_info_mode(path: &Path) -> Result<Option<RecordingMode>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(TaskwatchError::io("read run info", err)),
    };

    let run_info: RunInfo =
        serde_json::from_str(&content).map_err(|err| TaskwatchError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })?;
    Ok(run_info.agent.terminal_recording)
}
