//! `taskwatch clock ...`

use taskwatch_core::{format_elapsed, sink_from_config, ClockStore, TaskwatchConfig, Transition};

fn store(config: &TaskwatchConfig) -> ClockStore {
    ClockStore::new(&config.paths, sink_from_config(config))
}

pub fn status(config: &TaskwatchConfig, json: bool) -> Result<(), String> {
    let summary = store(config).summary()?;
    if json {
        let line = serde_json::to_string(&summary)
            .map_err(|e| format!("Failed to serialize clock summary: {}", e))?;
        println!("{}", line);
    } else {
        println!("Time elapsed: {}", format_elapsed(summary.elapsed_seconds));
        println!("Clock status: {}", summary.status);
    }
    Ok(())
}

pub fn pause(config: &TaskwatchConfig, force: bool) -> Result<(), String> {
    match store(config).pause(force)? {
        Transition::Changed => println!("Clock stopped."),
        Transition::Unchanged => println!("Clock is already stopped."),
    }
    Ok(())
}

pub fn unpause(config: &TaskwatchConfig, force: bool) -> Result<(), String> {
    match store(config).unpause(force)? {
        Transition::Changed => println!("Clock started."),
        Transition::Unchanged => println!("Clock is already running."),
    }
    Ok(())
}

pub fn elapsed(config: &TaskwatchConfig) -> Result<(), String> {
    let elapsed = store(config).get_time_elapsed()?;
    println!("{}", format_elapsed(elapsed.num_seconds()));
    Ok(())
}
