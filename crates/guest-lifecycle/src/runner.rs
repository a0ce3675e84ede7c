//! Command execution boundary
//!
//! Everything the agent does to the guest OS goes through a [`CommandRunner`].
//! The lifecycle code only decides *which* commands to run; the runner
//! decides *how*. Tests and the agent's fake mode swap in [`ScriptedRunner`].

use async_trait::async_trait;
use guest_core::ExecutionError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured output of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Run `argv` and wait for it, at most `timeout`.
    ///
    /// A non-zero exit, an expired timeout and a failed spawn are all
    /// reported as [`ExecutionError`]. Nothing is retried.
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<CommandOutput, ExecutionError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        ShellRunner
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<CommandOutput, ExecutionError> {
        let command = argv.join(" ");
        let (program, args) = argv.split_first().ok_or_else(|| ExecutionError::Spawn {
            command: command.clone(),
            reason: "empty command line".to_string(),
        })?;

        debug!(%command, ?timeout, "Executing command");

        // kill_on_drop covers a caller that abandons this future mid-wait.
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::Spawn {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(ExecutionError::Spawn {
                    command,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                // kill() also reaps, so no zombie outlives the call.
                if let Err(e) = child.kill().await {
                    warn!(%command, error = %e, "Failed to kill timed out command");
                }
                stdout_task.abort();
                stderr_task.abort();
                warn!(%command, ?timeout, "Command timed out, child killed");
                return Err(ExecutionError::TimedOut { command, timeout });
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

        if status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            Err(ExecutionError::NonZeroExit {
                command,
                exit_code: status.code(),
                stdout,
                stderr,
            })
        }
    }
}

async fn read_pipe<R>(pipe: Option<R>) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!(error = %e, "Reading command output failed");
        }
    }
    buf
}

type Reply = Result<CommandOutput, ExecutionError>;

/// Journal entries kept by default; older ones are dropped first.
pub const DEFAULT_JOURNAL_LIMIT: usize = 1024;

#[derive(Debug)]
struct Script {
    replies: Vec<(String, Reply)>,
    journal: VecDeque<String>,
    journal_limit: usize,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            replies: Vec::new(),
            journal: VecDeque::new(),
            journal_limit: DEFAULT_JOURNAL_LIMIT,
        }
    }
}

impl Script {
    fn record(&mut self, command: String) {
        if self.journal_limit == 0 {
            return;
        }
        while self.journal.len() >= self.journal_limit {
            self.journal.pop_front();
        }
        self.journal.push_back(command);
    }
}

/// Runner that executes nothing: it records every command line and answers
/// from a script.
///
/// A reply is matched when its pattern occurs in the joined command line; the
/// most recently scripted match wins. Unscripted commands succeed with empty
/// output. Only the most recent commands are journaled, see
/// [`with_journal_limit`](Self::with_journal_limit).
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    script: Arc<Mutex<Script>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` journal entries; zero disables the journal.
    pub fn with_journal_limit(self, limit: usize) -> Self {
        {
            let mut script = self.script.lock();
            script.journal_limit = limit;
            while script.journal.len() > limit {
                script.journal.pop_front();
            }
        }
        self
    }

    pub fn respond(&self, pattern: impl Into<String>, reply: Reply) {
        self.script.lock().replies.push((pattern.into(), reply));
    }

    pub fn respond_stdout(&self, pattern: impl Into<String>, stdout: impl Into<String>) {
        self.respond(pattern, Ok(CommandOutput::stdout(stdout)));
    }

    /// Make matching commands exit with `exit_code`.
    pub fn fail(&self, pattern: impl Into<String>, exit_code: i32, stderr: impl Into<String>) {
        let pattern = pattern.into();
        let reply = Err(ExecutionError::NonZeroExit {
            command: pattern.clone(),
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        });
        self.respond(pattern, reply);
    }

    /// Journaled command lines, oldest first.
    pub fn journal(&self) -> Vec<String> {
        self.script.lock().journal.iter().cloned().collect()
    }

    /// Index of the first journal entry containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.script
            .lock()
            .journal
            .iter()
            .position(|line| line.contains(pattern))
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.script
            .lock()
            .journal
            .iter()
            .filter(|line| line.contains(pattern))
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, argv: &[String], _timeout: Duration) -> Result<CommandOutput, ExecutionError> {
        let command = argv.join(" ");
        let mut script = self.script.lock();
        script.record(command.clone());
        debug!(%command, "Scripted command");

        let reply = script
            .replies
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone());

        match reply {
            Some(Err(ExecutionError::NonZeroExit {
                exit_code,
                stdout,
                stderr,
                ..
            })) => Err(ExecutionError::NonZeroExit {
                command,
                exit_code,
                stdout,
                stderr,
            }),
            Some(reply) => reply,
            None => Ok(CommandOutput::default()),
        }
    }
}

/// Build an argv from string slices.
pub fn argv<S: AsRef<str>>(parts: &[S]) -> Vec<String> {
    parts.iter().map(|part| part.as_ref().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn shell_runner_captures_stdout() {
        let output = ShellRunner::new()
            .run(&argv(&["echo", "hello"]), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn shell_runner_classifies_non_zero_exit() {
        let err = ShellRunner::new()
            .run(&argv(&["sh", "-c", "echo oops >&2; exit 3"]), TIMEOUT)
            .await
            .unwrap_err();
        match err {
            ExecutionError::NonZeroExit {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shell_runner_times_out() {
        let started = std::time::Instant::now();
        let err = ShellRunner::new()
            .run(&argv(&["sleep", "10"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timed_out_child_is_killed_and_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("pid");
        let script = format!("echo $$ > {}; exec sleep 10", pidfile.display());

        let err = ShellRunner::new()
            .run(&argv(&["sh", "-c", script.as_str()]), Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::TimedOut { .. }));

        let pid = std::fs::read_to_string(&pidfile).unwrap();
        let proc_entry = std::path::PathBuf::from(format!("/proc/{}", pid.trim()));
        assert!(!proc_entry.exists(), "process {} still exists", pid.trim());
    }

    #[tokio::test]
    async fn shell_runner_reports_missing_program() {
        let err = ShellRunner::new()
            .run(&argv(&["definitely-not-a-real-binary-xyz"]), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Spawn { .. }));
    }

    #[tokio::test]
    async fn empty_command_line_is_rejected() {
        let err = ShellRunner::new().run(&[], TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Spawn { .. }));
    }

    #[tokio::test]
    async fn scripted_runner_uses_latest_matching_reply() {
        let runner = ScriptedRunner::new();
        runner.respond_stdout("ps aux", "root 1 redis-server");
        runner.fail("ps aux", 1, "no procfs");

        let err = runner.run(&argv(&["ps", "aux"]), TIMEOUT).await.unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
        assert_eq!(err.command(), "ps aux");

        let ok = runner
            .run(&argv(&["service", "redis-server", "restart"]), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(ok, CommandOutput::default());
        assert_eq!(runner.journal().len(), 2);
        assert_eq!(runner.position("restart"), Some(1));
    }

    #[tokio::test]
    async fn journal_keeps_only_the_most_recent_commands() {
        let runner = ScriptedRunner::new().with_journal_limit(3);
        for n in 0..10 {
            let n = n.to_string();
            runner.run(&argv(&["echo", n.as_str()]), TIMEOUT).await.unwrap();
        }
        assert_eq!(runner.journal(), vec!["echo 7", "echo 8", "echo 9"]);
        assert_eq!(runner.count("echo"), 3);

        let silent = ScriptedRunner::new().with_journal_limit(0);
        silent.respond_stdout("ps aux", "redis-server");
        let output = silent.run(&argv(&["ps", "aux"]), TIMEOUT).await.unwrap();
        assert_eq!(output.stdout, "redis-server");
        assert!(silent.journal().is_empty());
    }

    #[tokio::test]
    async fn journal_is_capped_by_default() {
        let runner = ScriptedRunner::new();
        for _ in 0..DEFAULT_JOURNAL_LIMIT + 10 {
            runner.run(&argv(&["ps", "aux"]), TIMEOUT).await.unwrap();
        }
        assert_eq!(runner.journal().len(), DEFAULT_JOURNAL_LIMIT);
    }
}
