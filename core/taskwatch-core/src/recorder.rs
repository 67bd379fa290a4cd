//! Launching the terminal recorder.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::capture::WindowPaths;
use crate::config::{env_flag_enabled, RecorderConfig};

/// Set in the recorder's environment so a login shell started inside the
/// recording does not start another one.
pub const RECORDING_STARTED_ENV: &str = "TASKWATCH_RECORDING_STARTED";

pub const STOPPED_BANNER: &str = "\
==================================================
          TERMINAL RECORDING HAS STOPPED
  Open a new terminal window to resume recording.
==================================================";

pub fn recording_already_started(lookup: impl Fn(&str) -> Option<String>) -> bool {
    lookup(RECORDING_STARTED_ENV)
        .map(|value| env_flag_enabled(&value))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderPlan {
    pub program: String,
    pub args: Vec<String>,
    /// Extra variables set for the child.
    pub env: Vec<(String, String)>,
    pub capture: PathBuf,
}

impl RecorderPlan {
    /// `env` is the current process environment.
    pub fn build(
        config: &RecorderConfig,
        window: &WindowPaths,
        shell: &Path,
        env: &[(String, String)],
    ) -> Self {
        let preserved = preserved_env_names(config, env);
        let args = vec![
            "rec".to_string(),
            "--overwrite".to_string(),
            "--quiet".to_string(),
            format!("--env={}", preserved.join(",")),
            format!("--command={} -l", shell.display()),
            window.capture.display().to_string(),
        ];

        Self {
            program: config.program.clone(),
            args,
            env: vec![(RECORDING_STARTED_ENV.to_string(), "1".to_string())],
            capture: window.capture.clone(),
        }
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        command
    }
}

/// Always-kept names first, then task variables present in `env`, sorted.
pub fn preserved_env_names(config: &RecorderConfig, env: &[(String, String)]) -> Vec<String> {
    let mut names: Vec<String> = config.preserved_env.clone();
    let task_vars: BTreeSet<&str> = env
        .iter()
        .map(|(key, _)| key.as_str())
        .filter(|key| {
            config
                .preserved_env_prefixes
                .iter()
                .any(|prefix| key.starts_with(prefix.as_str()))
        })
        .collect();

    for key in task_vars {
        if !names.iter().any(|name| name == key) {
            names.push(key.to_string());
        }
    }
    names
}
