//! Logging setup: a daily-rotated file under `<code_dir>/.logs`, with
//! warnings and errors also echoed to stderr.

use std::env;
use std::path::Path;

use fs_err as fs;
use taskwatch_core::config::env_flag_enabled;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const DEBUG_LOG_ENV: &str = "TASKWATCH_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "taskwatch.log";

fn env_filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_LOG_ENV)
        .map(|value| env_flag_enabled(&value))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn stderr_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(LevelFilter::WARN)
}

/// Installs the global subscriber. Keep the returned guard alive until exit
/// so buffered file output is flushed.
pub fn init(logs_dir: Option<&Path>) -> Option<WorkerGuard> {
    let file = logs_dir.and_then(|dir| match fs::create_dir_all(dir) {
        Ok(()) => Some(tracing_appender::non_blocking(
            tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX),
        )),
        Err(err) => {
            eprintln!("taskwatch: logging to stderr only: {}", err);
            None
        }
    });

    match file {
        Some((writer, guard)) => {
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
            let _ = tracing_subscriber::registry()
                .with(env_filter())
                .with(file_layer)
                .with(stderr_layer())
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(env_filter())
                .with(stderr_layer())
                .try_init();
            None
        }
    }
}
