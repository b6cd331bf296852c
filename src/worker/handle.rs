//! Worker Process Handle
//!
//! Owns the lifecycle of one worker subprocess speaking the probe protocol
//! over its standard input/output:
//! - spawn with piped stdio in the implementation's working directory
//! - readiness check (the worker must survive a short window after spawn)
//! - bounded teardown: close stdin, SIGTERM, then SIGKILL after the grace period
//!
//! The worker leads its own process group. Launchers such as `uv run` or
//! `go run` start the real worker as a grandchild, so termination signals go
//! to the whole group. `release` is idempotent and also runs on drop, so every
//! exit path that drops the handle reclaims the process tree.

use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Poll interval while waiting for a worker to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Launch command for a worker (executable + arguments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Create a launch command.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from an argument vector (`argv[0]` is the executable).
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    /// Render for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Handle lifecycle configuration
#[derive(Debug, Clone, Copy)]
pub struct HandleConfig {
    /// How long the worker must stay alive after spawn to count as launched
    pub readiness: Duration,
    /// Grace period between asking the worker to stop and killing it
    pub release_grace: Duration,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            readiness: Duration::from_millis(100),
            release_grace: Duration::from_millis(2000),
        }
    }
}

/// Worker launch errors
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("empty launch command")]
    EmptyCommand,

    #[error("worker executable not found: {program}")]
    NotFound { program: String },

    #[error("failed to spawn worker '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("worker '{program}' exited immediately ({status})")]
    ExitedImmediately { program: String, status: String },

    #[error("worker '{program}' standard channels were not captured")]
    MissingStdio { program: String },
}

/// How a release concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Worker exited on its own within the grace period
    Exited(Option<i32>),
    /// Worker had to be killed
    Killed,
    /// Handle was already released
    AlreadyReleased,
}

/// Exclusive owner of one worker subprocess.
#[derive(Debug)]
pub struct WorkerHandle {
    child: Child,
    program: String,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    config: HandleConfig,
    released: bool,
}

impl WorkerHandle {
    /// Spawn the worker and wait out the readiness window.
    pub fn acquire(
        command: &LaunchCommand,
        working_dir: &Path,
        config: HandleConfig,
    ) -> Result<Self, LaunchError> {
        if command.program.is_empty() {
            return Err(LaunchError::EmptyCommand);
        }
        let program = command.program.clone();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        own_process_group(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => LaunchError::NotFound {
                    program: program.clone(),
                },
                _ => LaunchError::Spawn {
                    program: program.clone(),
                    source: e,
                },
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(&program, stderr);
        }

        let mut handle = Self {
            child,
            program,
            stdin,
            stdout,
            config,
            released: false,
        };

        if handle.stdin.is_none() || handle.stdout.is_none() {
            let program = handle.program.clone();
            handle.force_terminate();
            return Err(LaunchError::MissingStdio { program });
        }

        if let Some(status) = handle.wait_for_exit(config.readiness) {
            handle.released = true;
            handle.signal_group(GroupSignal::Kill);
            return Err(LaunchError::ExitedImmediately {
                program: handle.program.clone(),
                status: status.to_string(),
            });
        }

        debug!(worker = %handle.program, pid = handle.pid(), "Worker launched");
        Ok(handle)
    }

    /// OS process ID of the worker.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Executable name, for logs.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Take the outbound (worker stdin) and inbound (worker stdout) streams.
    ///
    /// Returns `None` once the streams have been taken.
    pub fn take_streams(&mut self) -> Option<(ChildStdin, ChildStdout)> {
        match (self.stdin.take(), self.stdout.take()) {
            (Some(stdin), Some(stdout)) => Some((stdin, stdout)),
            (stdin, stdout) => {
                self.stdin = stdin;
                self.stdout = stdout;
                None
            }
        }
    }

    /// Returns true if the worker process has not exited.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stop the worker: close stdin, wait, SIGTERM, wait, SIGKILL.
    ///
    /// Never blocks longer than the configured grace period plus the kill.
    pub fn release(&mut self) -> ReleaseOutcome {
        if self.released {
            return ReleaseOutcome::AlreadyReleased;
        }
        self.released = true;

        drop(self.stdin.take());
        drop(self.stdout.take());

        let half = self.config.release_grace / 2;
        if let Some(status) = self.wait_for_exit(half) {
            debug!(worker = %self.program, %status, "Worker exited after stdin closed");
            self.signal_group(GroupSignal::Kill);
            return ReleaseOutcome::Exited(status.code());
        }

        self.signal_group(GroupSignal::Terminate);
        if let Some(status) = self.wait_for_exit(self.config.release_grace - half) {
            debug!(worker = %self.program, %status, "Worker exited after SIGTERM");
            self.signal_group(GroupSignal::Kill);
            return ReleaseOutcome::Exited(status.code());
        }

        warn!(worker = %self.program, pid = self.pid(), "Worker ignored termination, killing");
        self.kill();
        ReleaseOutcome::Killed
    }

    /// Kill the worker immediately, without a grace period.
    ///
    /// Used when an in-flight call must be unblocked.
    pub fn force_terminate(&mut self) -> ReleaseOutcome {
        if self.released {
            return ReleaseOutcome::AlreadyReleased;
        }
        self.released = true;
        drop(self.stdin.take());
        drop(self.stdout.take());
        self.kill();
        ReleaseOutcome::Killed
    }

    fn kill(&mut self) {
        self.signal_group(GroupSignal::Kill);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    /// Signal every process in the worker's group.
    ///
    /// Stragglers outlive the group leader, so this is also sent after the
    /// leader has exited; the group ID stays reserved while any member lives.
    fn signal_group(&self, signal: GroupSignal) {
        signal_process_group(self.child.id(), signal);
    }

    /// Poll for exit for up to `limit`; returns the status if the worker exited.
    fn wait_for_exit(&mut self, limit: Duration) -> Option<ExitStatus> {
        let start = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) => {}
                Err(e) => {
                    warn!(worker = %self.program, error = %e, "Failed to poll worker status");
                    return None;
                }
            }
            let elapsed = start.elapsed();
            if elapsed >= limit {
                return None;
            }
            thread::sleep(POLL_INTERVAL.min(limit - elapsed));
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Signals sent to a worker's process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupSignal {
    Terminate,
    Kill,
}

/// Make the spawned process the leader of a new process group.
pub(crate) fn own_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

/// Send `signal` to the process group led by `pid`.
#[cfg(unix)]
pub(crate) fn signal_process_group(pid: u32, signal: GroupSignal) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    // ESRCH once the whole group is gone
    let _ = killpg(Pid::from_raw(pid), signal);
}

#[cfg(not(unix))]
pub(crate) fn signal_process_group(_pid: u32, _signal: GroupSignal) {}

/// Forward worker stderr lines to the log at debug level.
fn forward_stderr(program: &str, stderr: std::process::ChildStderr) {
    let program = program.to_string();
    let spawned = thread::Builder::new()
        .name("worker-stderr".to_string())
        .spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines() {
                match line {
                    Ok(line) => debug!(worker = %program, "[stderr] {}", line),
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Could not start worker stderr forwarder");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> HandleConfig {
        HandleConfig {
            readiness: Duration::from_millis(50),
            release_grace: Duration::from_millis(400),
        }
    }

    #[test]
    fn test_launch_command_from_argv() {
        let argv = vec!["uv".to_string(), "run".to_string(), "worker".to_string()];
        let cmd = LaunchCommand::from_argv(&argv).unwrap();
        assert_eq!(cmd.program, "uv");
        assert_eq!(cmd.args, vec!["run", "worker"]);
        assert_eq!(cmd.display(), "uv run worker");

        assert!(LaunchCommand::from_argv(&[]).is_none());
    }

    #[test]
    fn test_missing_executable_is_not_found() {
        let cmd = LaunchCommand::new("definitely-not-a-real-worker-binary-42", vec![]);
        let err = WorkerHandle::acquire(&cmd, Path::new("."), quick_config()).unwrap_err();
        assert!(matches!(err, LaunchError::NotFound { .. }), "got {:?}", err);
    }

    #[test]
    fn test_empty_program_rejected() {
        let cmd = LaunchCommand::new("", vec![]);
        let err = WorkerHandle::acquire(&cmd, Path::new("."), quick_config()).unwrap_err();
        assert!(matches!(err, LaunchError::EmptyCommand));
    }

    #[cfg(unix)]
    #[test]
    fn test_immediate_exit_is_launch_error() {
        let cmd = LaunchCommand::new("true", vec![]);
        let config = HandleConfig {
            readiness: Duration::from_millis(500),
            release_grace: Duration::from_millis(100),
        };
        let err = WorkerHandle::acquire(&cmd, Path::new("."), config).unwrap_err();
        assert!(matches!(err, LaunchError::ExitedImmediately { .. }), "got {:?}", err);
    }

    #[cfg(unix)]
    #[test]
    fn test_release_is_idempotent_and_bounded() {
        // `cat` exits once its stdin is closed
        let cmd = LaunchCommand::new("cat", vec![]);
        let mut handle = WorkerHandle::acquire(&cmd, Path::new("."), quick_config()).unwrap();
        assert!(handle.is_running());

        let start = Instant::now();
        let first = handle.release();
        assert!(matches!(first, ReleaseOutcome::Exited(_)), "got {:?}", first);
        assert!(start.elapsed() < Duration::from_secs(2));

        assert_eq!(handle.release(), ReleaseOutcome::AlreadyReleased);
        assert_eq!(handle.force_terminate(), ReleaseOutcome::AlreadyReleased);
    }

    #[cfg(unix)]
    #[test]
    fn test_release_kills_worker_ignoring_stdin_close() {
        let cmd = LaunchCommand::new(
            "sh",
            vec!["-c".to_string(), "trap '' TERM; sleep 30".to_string()],
        );
        let mut handle = WorkerHandle::acquire(&cmd, Path::new("."), quick_config()).unwrap();

        let start = Instant::now();
        let outcome = handle.release();
        assert_eq!(outcome, ReleaseOutcome::Killed);
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(!handle.is_running());
    }

    /// Wait until `pid` has exited (a zombie counts as exited).
    #[cfg(target_os = "linux")]
    fn wait_gone(pid: u32, limit: Duration) -> bool {
        let start = Instant::now();
        loop {
            let gone = match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                Err(_) => true,
                Ok(stat) => stat
                    .rsplit_once(')')
                    .map_or(false, |(_, rest)| rest.trim_start().starts_with('Z')),
            };
            if gone {
                return true;
            }
            if start.elapsed() >= limit {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Launch `sh` with a background `sleep` grandchild and return its PID.
    #[cfg(target_os = "linux")]
    fn launch_with_grandchild(dir: &Path, script_tail: &str) -> (WorkerHandle, u32) {
        let pidfile = dir.join("grandchild.pid");
        let script = format!("sleep 30 & echo $! > {}; {}", pidfile.display(), script_tail);
        let cmd = LaunchCommand::new("sh", vec!["-c".to_string(), script]);
        let handle = WorkerHandle::acquire(&cmd, dir, quick_config()).unwrap();

        let start = Instant::now();
        let pid = loop {
            if let Some(pid) = std::fs::read_to_string(&pidfile)
                .ok()
                .and_then(|raw| raw.trim().parse::<u32>().ok())
            {
                break pid;
            }
            assert!(start.elapsed() < Duration::from_secs(5), "grandchild never started");
            thread::sleep(POLL_INTERVAL);
        };
        (handle, pid)
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_force_terminate_kills_grandchild() {
        let dir = tempfile::tempdir().unwrap();
        let (mut handle, grandchild) = launch_with_grandchild(dir.path(), "wait");

        assert_eq!(handle.force_terminate(), ReleaseOutcome::Killed);
        assert!(wait_gone(grandchild, Duration::from_secs(2)), "grandchild {} survived", grandchild);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_release_kills_grandchild_after_launcher_exits() {
        let dir = tempfile::tempdir().unwrap();
        // The launcher exits on end of input and leaves its child behind
        let (mut handle, grandchild) = launch_with_grandchild(dir.path(), "cat > /dev/null");

        assert!(matches!(handle.release(), ReleaseOutcome::Exited(_)));
        assert!(wait_gone(grandchild, Duration::from_secs(2)), "grandchild {} survived", grandchild);
    }

    #[cfg(unix)]
    #[test]
    fn test_take_streams_once() {
        let cmd = LaunchCommand::new("cat", vec![]);
        let mut handle = WorkerHandle::acquire(&cmd, Path::new("."), quick_config()).unwrap();
        assert!(handle.take_streams().is_some());
        assert!(handle.take_streams().is_none());
        handle.force_terminate();
    }
}
