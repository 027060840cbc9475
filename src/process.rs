//! Process-level supervision of the proxy executable.

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::util::{is_process_alive, process_name_matches};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Process table operations.
pub trait ProcessControl: Send + Sync {
    /// Number of running processes named `name`.
    fn count(&self, name: &str) -> usize;

    /// Launches `program` in `working_dir` without arguments or a window.
    ///
    /// # Errors
    ///
    /// Fails if the executable cannot be started.
    fn spawn(&self, program: &Path, working_dir: &Path) -> Result<u32>;

    /// Kills every process named `name`; returns how many were found.
    ///
    /// # Errors
    ///
    /// Fails if at least one matching process could not be killed.
    fn kill_by_name(&self, name: &str) -> Result<usize>;

    /// Kills one process.
    ///
    /// # Errors
    ///
    /// Fails if the process does not exist or refuses to die.
    fn kill(&self, pid: u32) -> Result<()>;

    /// Whether `pid` is still running.
    fn is_alive(&self, pid: u32) -> bool;

    /// PID of the calling process.
    fn current_pid(&self) -> u32 {
        std::process::id()
    }
}

/// [`ProcessControl`] over the live process table.
#[derive(Debug, Clone)]
pub struct SystemProcesses {
    exit_wait: RetryPolicy,
}

impl SystemProcesses {
    /// Creates a process controller that waits up to a second for killed
    /// processes to exit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            exit_wait: RetryPolicy::new(Duration::from_millis(100), 10),
        }
    }

    fn snapshot() -> System {
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);
        sys
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl for SystemProcesses {
    fn count(&self, name: &str) -> usize {
        Self::snapshot()
            .processes()
            .values()
            .filter(|p| process_name_matches(&p.name().to_string_lossy(), name))
            .count()
    }

    fn spawn(&self, program: &Path, working_dir: &Path) -> Result<u32> {
        let mut command = Command::new(program);
        command
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(crate::platform::CREATE_NO_WINDOW);
        }

        let child = command.spawn().map_err(|e| Error::Process {
            name: program.display().to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!(program = %program.display(), pid = child.id(), "Started process");
        Ok(child.id())
    }

    fn kill_by_name(&self, name: &str) -> Result<usize> {
        let sys = Self::snapshot();
        let mut found = 0;
        let mut failed = 0;
        for process in sys
            .processes()
            .values()
            .filter(|p| process_name_matches(&p.name().to_string_lossy(), name))
        {
            found += 1;
            let pid = process.pid().as_u32();
            if !process.kill() {
                tracing::error!(process = %name, pid, "Failed to kill process");
                failed += 1;
                continue;
            }
            if self.exit_wait.poll_blocking(|| !is_process_alive(pid)) {
                tracing::info!(process = %name, pid, "Killed process");
            } else {
                tracing::warn!(process = %name, pid, "Process did not exit after kill");
            }
        }

        if found == 0 {
            tracing::debug!(process = %name, "No running process to kill");
        }
        if failed > 0 {
            return Err(Error::Process {
                name: name.to_string(),
                reason: format!("{failed} of {found} instances could not be killed"),
            });
        }
        Ok(found)
    }

    fn kill(&self, pid: u32) -> Result<()> {
        let sys = Self::snapshot();
        let process = sys.process(Pid::from_u32(pid)).ok_or_else(|| Error::Process {
            name: pid.to_string(),
            reason: "no such process".into(),
        })?;
        if process.kill() {
            Ok(())
        } else {
            Err(Error::Process {
                name: process.name().to_string_lossy().into_owned(),
                reason: "kill was refused".into(),
            })
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        is_process_alive(pid)
    }
}

/// The proxy executable, supervised by process name.
#[derive(Clone)]
pub struct ProxyProcess {
    processes: Arc<dyn ProcessControl>,
    executable: PathBuf,
    working_dir: PathBuf,
    process_name: String,
}

impl ProxyProcess {
    /// Creates a supervisor for `executable`, launched from `working_dir` and
    /// recognised in the process table as `process_name`.
    #[must_use]
    pub fn new(
        processes: Arc<dyn ProcessControl>,
        executable: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
        process_name: impl Into<String>,
    ) -> Self {
        Self {
            processes,
            executable: executable.into(),
            working_dir: working_dir.into(),
            process_name: process_name.into(),
        }
    }

    /// Whether any instance is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.processes.count(&self.process_name) > 0
    }

    /// Launches the proxy.
    ///
    /// # Errors
    ///
    /// Fails if the executable cannot be started.
    pub fn start(&self) -> Result<u32> {
        self.processes.spawn(&self.executable, &self.working_dir)
    }

    /// Kills every running instance.
    ///
    /// # Errors
    ///
    /// Fails if an instance could not be killed.
    pub fn stop(&self) -> Result<()> {
        self.processes.kill_by_name(&self.process_name).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_process_is_not_running() {
        let proxy = ProxyProcess::new(
            Arc::new(SystemProcesses::new()),
            "/nonexistent/proxy",
            "/",
            "definitely-not-a-running-process-name",
        );
        assert!(!proxy.is_running());
        proxy.stop().unwrap();
    }

    #[test]
    fn spawn_missing_executable_fails() {
        let err = SystemProcesses::new()
            .spawn(Path::new("/nonexistent/proxy"), Path::new("/"))
            .unwrap_err();
        assert!(matches!(err, Error::Process { .. }));
    }

    #[test]
    fn current_process_is_alive() {
        let processes = SystemProcesses::new();
        assert!(processes.is_alive(processes.current_pid()));
    }

    #[test]
    fn kill_missing_pid_fails() {
        assert!(SystemProcesses::new().kill(999_999_999).is_err());
    }
}
