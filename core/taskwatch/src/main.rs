//! taskwatch: terminal recording, capture monitoring and the work clock.
//!
//! ## Subcommands
//!
//! - `record`: Start a recorded login shell and publish snapshots of it
//! - `monitor`: Publish snapshots of an existing window's capture
//! - `clock`: Inspect, pause or resume the work clock
//! - `window-id`: Reserve the next terminal window id

mod clock;
mod logging;
mod record;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use taskwatch_core::{TaskwatchConfig, TaskwatchPaths};

#[derive(Parser)]
#[command(name = "taskwatch")]
#[command(about = "Task environment recorder and work clock")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a login shell in a new terminal window
    Record {
        /// Directory holding per-window capture directories
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Maximum frames per second in rendered images
        #[arg(long)]
        fps_cap: Option<u32>,

        /// Playback speed multiplier for rendered images
        #[arg(long)]
        speed: Option<f64>,
    },

    /// Publish snapshots for an existing window until interrupted
    Monitor {
        /// Window id to monitor
        #[arg(long)]
        window: u32,

        /// Directory holding per-window capture directories
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Work clock operations
    Clock {
        #[command(subcommand)]
        action: ClockAction,
    },

    /// Allocate and print the next terminal window id
    WindowId {
        /// Directory holding per-window capture directories
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ClockAction {
    /// Show clock status and elapsed time
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stop the clock
    Pause {
        /// Record the transition even if already stopped
        #[arg(long)]
        force: bool,
    },
    /// Start the clock
    Unpause {
        /// Record the transition even if already running
        #[arg(long)]
        force: bool,
    },
    /// Print elapsed working time
    Elapsed,
}

fn load_config(log_dir: Option<PathBuf>) -> Result<TaskwatchConfig, String> {
    let paths = TaskwatchPaths::discover()?;
    let mut config = TaskwatchConfig::load(paths)?;
    if let Some(dir) = log_dir {
        config.terminals_dir = dir;
    }
    Ok(config)
}

fn main() {
    let cli = Cli::parse();
    let logs_dir = TaskwatchPaths::discover().ok().map(|paths| paths.logs_dir());
    let _logging_guard = logging::init(logs_dir.as_deref());

    let result = match cli.command {
        Commands::Record {
            log_dir,
            fps_cap,
            speed,
        } => load_config(log_dir).and_then(|mut config| {
            if let Some(fps_cap) = fps_cap {
                config.renderer.fps_cap = fps_cap;
            }
            if let Some(speed) = speed {
                config.renderer.speed = speed;
            }
            record::run_record(&config)
        }),
        Commands::Monitor { window, log_dir } => {
            load_config(log_dir).and_then(|config| record::run_monitor(&config, window))
        }
        Commands::Clock { action } => load_config(None).and_then(|config| match action {
            ClockAction::Status { json } => clock::status(&config, json),
            ClockAction::Pause { force } => clock::pause(&config, force),
            ClockAction::Unpause { force } => clock::unpause(&config, force),
            ClockAction::Elapsed => clock::elapsed(&config),
        }),
        Commands::WindowId { log_dir } => {
            load_config(log_dir).and_then(|config| record::print_window_id(&config))
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "taskwatch failed");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_clock_pause_with_force() {
        let cli = Cli::try_parse_from(["taskwatch", "clock", "pause", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Clock {
                action: ClockAction::Pause { force: true }
            }
        ));
    }

    #[test]
    fn parses_record_overrides() {
        let cli = Cli::try_parse_from([
            "taskwatch",
            "record",
            "--log-dir",
            "/tmp/terminals",
            "--fps-cap",
            "4",
            "--speed",
            "2.5",
        ])
        .unwrap();
        match cli.command {
            Commands::Record {
                log_dir,
                fps_cap,
                speed,
            } => {
                assert_eq!(log_dir, Some(PathBuf::from("/tmp/terminals")));
                assert_eq!(fps_cap, Some(4));
                assert_eq!(speed, Some(2.5));
            }
            _ => panic!("expected record"),
        }
    }

    #[test]
    fn monitor_requires_window() {
        assert!(Cli::try_parse_from(["taskwatch", "monitor"]).is_err());
    }
}
