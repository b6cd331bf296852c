//! Bounded external command execution.

use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::worker::{own_process_group, signal_process_group, GroupSignal};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Command execution errors
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("command not found: {program}")]
    NotFound { program: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {}: {stderr}", .code.map_or_else(|| "signal".to_string(), |c| format!("status {}", c)))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Captured output of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Turn a non-zero exit into [`CommandError::Failed`].
    pub fn into_success(self, program: &str) -> Result<Self, CommandError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandError::Failed {
                program: program.to_string(),
                code: self.status.code(),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_output(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Kill the command's whole process group and reap the leader.
fn kill_tree(child: &mut Child) {
    signal_process_group(child.id(), GroupSignal::Kill);
    let _ = child.kill();
    let _ = child.wait();
}

/// Run `argv` in `dir`, killing it if it outlives `timeout`.
///
/// The command runs in its own process group. Once the leader exits any
/// leftover group members are killed, since they would hold the output
/// pipes open. A non-zero exit is returned as output, not as an error.
pub fn run_command(argv: &[String], dir: &Path, timeout: Duration) -> Result<CommandOutput, CommandError> {
    let (program, args) = argv.split_first().ok_or(CommandError::Empty)?;
    debug!(command = %argv.join(" "), dir = %dir.display(), "Running command");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    own_process_group(&mut cmd);

    let mut child = cmd
        .spawn()
        .map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => CommandError::NotFound {
                program: program.clone(),
            },
            _ => CommandError::Spawn {
                program: program.clone(),
                source,
            },
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = match wait_with_timeout(&mut child, timeout) {
        Ok(Some(status)) => {
            signal_process_group(child.id(), GroupSignal::Kill);
            status
        }
        Ok(None) => {
            kill_tree(&mut child);
            return Err(CommandError::TimedOut {
                program: program.clone(),
                timeout,
            });
        }
        Err(source) => {
            kill_tree(&mut child);
            return Err(CommandError::Wait {
                program: program.clone(),
                source,
            });
        }
    };

    Ok(CommandOutput {
        status,
        stdout: join_output(stdout),
        stderr: join_output(stderr),
    })
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_captures_stdout() {
        let out = run_command(&argv(&["echo", "hello"]), Path::new("."), Duration::from_secs(5)).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_runs_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let out = run_command(&argv(&["ls"]), dir.path(), Duration::from_secs(5)).unwrap();
        assert!(out.stdout.contains("marker.txt"));
    }

    #[test]
    fn test_nonzero_exit_is_output() {
        let out = run_command(&argv(&["sh", "-c", "echo bad >&2; exit 3"]), Path::new("."), Duration::from_secs(5))
            .unwrap();
        assert!(!out.success());
        let err = out.into_success("sh").unwrap_err();
        assert!(matches!(err, CommandError::Failed { code: Some(3), ref stderr, .. } if stderr == "bad"));
    }

    #[test]
    fn test_timeout_kills() {
        let started = Instant::now();
        let err = run_command(&argv(&["sleep", "30"]), Path::new("."), Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_background_child_does_not_hold_output() {
        let started = Instant::now();
        let out = run_command(
            &argv(&["sh", "-c", "sleep 30 & echo started"]),
            Path::new("."),
            Duration::from_secs(20),
        )
        .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "started");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_kills_process_group() {
        let started = Instant::now();
        let err = run_command(
            &argv(&["sh", "-c", "sleep 30 & sleep 30"]),
            Path::new("."),
            Duration::from_millis(200),
        )
        .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_program() {
        let err = run_command(&argv(&["/nonexistent/tool"]), Path::new("."), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, CommandError::NotFound { .. }));
    }

    #[test]
    fn test_empty_argv() {
        assert!(matches!(
            run_command(&[], Path::new("."), Duration::from_secs(1)),
            Err(CommandError::Empty)
        ));
    }
}
