//! `taskwatch record`, `taskwatch monitor` and `taskwatch window-id`.

use std::env;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

use taskwatch_core::capture::{
    allocate_window_id, CaptureSupervisor, Detached, ThreadTicker, WindowPaths,
};
use taskwatch_core::recorder::{recording_already_started, RecorderPlan, STOPPED_BANNER};
use taskwatch_core::shell::{detect_shell, ShellDetection, SystemProbe, DEFAULT_STRATEGIES};
use taskwatch_core::{sink_from_config, ClockStore, TaskwatchConfig, TaskwatchError};

fn supervisor_for(config: &TaskwatchConfig, window: &WindowPaths) -> CaptureSupervisor {
    let sink = sink_from_config(config);
    let clock = Arc::new(ClockStore::new(&config.paths, Arc::clone(&sink)));
    CaptureSupervisor::for_window(config, window, clock, sink)
}

pub fn run_record(config: &TaskwatchConfig) -> Result<(), String> {
    if recording_already_started(|key| env::var(key).ok()) {
        info!("Already inside a recorded session; not starting another recorder");
        return Ok(());
    }

    let shell = match detect_shell(DEFAULT_STRATEGIES, &SystemProbe) {
        ShellDetection::Found { path, .. } => path,
        ShellDetection::Unknown => return Err(TaskwatchError::ShellNotDetected.into()),
    };

    let window_id = allocate_window_id(&config.terminals_dir)?;
    let window = WindowPaths::new(&config.terminals_dir, window_id);
    window.create()?;

    let env_vars: Vec<(String, String)> = env::vars().collect();
    let plan = RecorderPlan::build(&config.recorder, &window, &shell, &env_vars);
    info!(
        window_id,
        program = %plan.program,
        capture = %plan.capture.display(),
        "Starting terminal recorder"
    );

    let mut child = plan
        .command()
        .spawn()
        .map_err(|source| TaskwatchError::Spawn {
            program: plan.program.clone(),
            source,
        })?;

    let mut supervisor = supervisor_for(config, &window);
    let stop = AtomicBool::new(false);
    supervisor.run(&mut child, &mut ThreadTicker, &stop);

    match child.wait() {
        Ok(status) if !status.success() => {
            warn!(window_id, code = ?status.code(), "Recorder exited with failure");
        }
        Ok(_) => {}
        Err(err) => warn!(window_id, error = %err, "Failed to reap recorder"),
    }

    println!("{}", STOPPED_BANNER);
    Ok(())
}

pub fn run_monitor(config: &TaskwatchConfig, window_id: u32) -> Result<(), String> {
    let window = WindowPaths::new(&config.terminals_dir, window_id);
    info!(window_id, capture = %window.capture.display(), "Monitoring window");

    let mut supervisor = supervisor_for(config, &window);
    let stop = AtomicBool::new(false);
    supervisor.run(&mut Detached, &mut ThreadTicker, &stop);
    Ok(())
}

pub fn print_window_id(config: &TaskwatchConfig) -> Result<(), String> {
    let window_id = allocate_window_id(&config.terminals_dir)?;
    println!("{}", window_id);
    Ok(())
}
