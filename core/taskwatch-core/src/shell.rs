//! Working out which shell the operator uses.

use fs_err as fs;
use std::env;
use std::path::PathBuf;
use tracing::debug;

/// Where shell detection reads process facts from.
pub trait ShellProbe {
    fn env_var(&self, key: &str) -> Option<String>;
    fn parent_pid(&self) -> Option<u32>;
    /// Contents of `/proc/<pid>/comm`.
    fn process_name(&self, pid: u32) -> Option<String>;
    fn current_executable(&self) -> Option<PathBuf>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl ShellProbe for SystemProbe {
    fn env_var(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn parent_pid(&self) -> Option<u32> {
        #[cfg(unix)]
        {
            // SAFETY: getppid() has no failure modes and returns 1 if the parent exited.
            #[allow(unsafe_code)]
            let ppid = unsafe { libc::getppid() };
            Some(ppid as u32)
        }
        #[cfg(not(unix))]
        {
            None
        }
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        fs::read_to_string(format!("/proc/{}/comm", pid)).ok()
    }

    fn current_executable(&self) -> Option<PathBuf> {
        env::current_exe().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellStrategy {
    /// `$SHELL`.
    EnvVar,
    /// Name of the parent process.
    ParentProcess,
    /// The running executable, when it is a Python interpreter.
    PythonExecutable,
}

pub const DEFAULT_STRATEGIES: &[ShellStrategy] =
    &[ShellStrategy::EnvVar, ShellStrategy::ParentProcess];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellDetection {
    Found { path: PathBuf, via: ShellStrategy },
    Unknown,
}

impl ShellDetection {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ShellDetection::Found { path, .. } => Some(path),
            ShellDetection::Unknown => None,
        }
    }
}

/// Tries each strategy in order and returns the first hit.
pub fn detect_shell(strategies: &[ShellStrategy], probe: &dyn ShellProbe) -> ShellDetection {
    for &strategy in strategies {
        if let Some(path) = try_strategy(strategy, probe) {
            debug!(shell = %path.display(), via = ?strategy, "Detected shell");
            return ShellDetection::Found {
                path,
                via: strategy,
            };
        }
    }
    ShellDetection::Unknown
}

fn try_strategy(strategy: ShellStrategy, probe: &dyn ShellProbe) -> Option<PathBuf> {
    match strategy {
        ShellStrategy::EnvVar => probe
            .env_var("SHELL")
            .filter(|shell| !shell.trim().is_empty())
            .map(PathBuf::from),
        ShellStrategy::ParentProcess => {
            let name = probe.process_name(probe.parent_pid()?)?;
            let name = name.trim();
            (!name.is_empty()).then(|| PathBuf::from(name))
        }
        ShellStrategy::PythonExecutable => probe
            .current_executable()
            .filter(|exe| exe.to_string_lossy().contains("python")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeProbe {
        env: HashMap<String, String>,
        ppid: Option<u32>,
        comm: HashMap<u32, String>,
        exe: Option<PathBuf>,
    }

    impl ShellProbe for FakeProbe {
        fn env_var(&self, key: &str) -> Option<String> {
            self.env.get(key).cloned()
        }
        fn parent_pid(&self) -> Option<u32> {
            self.ppid
        }
        fn process_name(&self, pid: u32) -> Option<String> {
            self.comm.get(&pid).cloned()
        }
        fn current_executable(&self) -> Option<PathBuf> {
            self.exe.clone()
        }
    }

    #[test]
    fn shell_env_var_wins() {
        let mut probe = FakeProbe::default();
        probe.env.insert("SHELL".into(), "/bin/zsh".into());
        probe.ppid = Some(10);
        probe.comm.insert(10, "bash\n".into());

        assert_eq!(
            detect_shell(DEFAULT_STRATEGIES, &probe),
            ShellDetection::Found {
                path: PathBuf::from("/bin/zsh"),
                via: ShellStrategy::EnvVar,
            }
        );
    }

    #[test]
    fn falls_back_to_parent_process_name() {
        let mut probe = FakeProbe::default();
        probe.env.insert("SHELL".into(), "".into());
        probe.ppid = Some(10);
        probe.comm.insert(10, "fish\n".into());

        let detection = detect_shell(DEFAULT_STRATEGIES, &probe);
        assert_eq!(detection.path(), Some(&PathBuf::from("fish")));
    }

    #[test]
    fn python_executable_only_when_asked() {
        let probe = FakeProbe {
            exe: Some(PathBuf::from("/usr/bin/python3")),
            ..Default::default()
        };
        assert_eq!(detect_shell(DEFAULT_STRATEGIES, &probe), ShellDetection::Unknown);

        let all = [
            ShellStrategy::EnvVar,
            ShellStrategy::ParentProcess,
            ShellStrategy::PythonExecutable,
        ];
        assert!(matches!(
            detect_shell(&all, &probe),
            ShellDetection::Found { via: ShellStrategy::PythonExecutable, .. }
        ));
    }

    #[test]
    fn nothing_found_is_unknown() {
        assert_eq!(
            detect_shell(DEFAULT_STRATEGIES, &FakeProbe::default()),
            ShellDetection::Unknown
        );
    }
}
