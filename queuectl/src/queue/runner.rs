//! Command execution boundary.

use async_trait::async_trait;
use process_utils::{CaptureError, argv_command, capture_with_timeout, shell_command};
use std::time::Duration;
use tracing::debug;

use crate::database::models::JobCommand;

/// Exit code shells use for "command not found".
const SHELL_NOT_FOUND_EXIT_CODE: i32 = 127;

/// What happened when a job's command was run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command ran to completion.
    Exited {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// The deadline passed and the command was killed.
    TimedOut {
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
    /// The command (or the shell) does not exist.
    NotFound { stderr: String },
    /// The runner could not run the command at all.
    Failed(String),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited { code: 0, .. })
    }

    pub fn stdout(&self) -> &str {
        match self {
            Self::Exited { stdout, .. } | Self::TimedOut { stdout, .. } => stdout,
            Self::NotFound { .. } | Self::Failed(_) => "",
        }
    }

    pub fn stderr(&self) -> &str {
        match self {
            Self::Exited { stderr, .. }
            | Self::TimedOut { stderr, .. }
            | Self::NotFound { stderr } => stderr,
            Self::Failed(message) => message,
        }
    }

    /// The `last_error` recorded for an unsuccessful outcome.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Exited { code: 0, .. } => None,
            Self::Exited { code, .. } => Some(format!("exit code {code}")),
            Self::TimedOut { timeout, .. } => Some(format!(
                "job timed out after {}",
                format_timeout(*timeout)
            )),
            Self::NotFound { .. } => Some("command not found".to_string()),
            Self::Failed(message) => Some(message.clone()),
        }
    }
}

/// Whole seconds print as `30s`, anything finer as `Duration`'s debug form.
fn format_timeout(timeout: Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{timeout:?}")
    }
}

/// Runs a job's command with a deadline.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &JobCommand, timeout: Duration) -> CommandOutcome;
}

/// Runs commands through the platform shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellCommandRunner;

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, command: &JobCommand, timeout: Duration) -> CommandOutcome {
        debug!(command = %command, ?timeout, "Executing command");
        let (cmd, via_shell) = match command {
            JobCommand::Shell(line) => (shell_command(line), true),
            JobCommand::Argv(argv) => match argv.split_first() {
                Some((program, args)) => (argv_command(program, args), false),
                None => return CommandOutcome::Failed("empty argument vector".to_string()),
            },
        };
        match capture_with_timeout(cmd, timeout).await {
            Ok(output) if via_shell && output.code() == SHELL_NOT_FOUND_EXIT_CODE => {
                CommandOutcome::NotFound {
                    stderr: output.stderr,
                }
            }
            Ok(output) => CommandOutcome::Exited {
                code: output.code(),
                stdout: output.stdout,
                stderr: output.stderr,
            },
            Err(CaptureError::TimedOut {
                timeout,
                stdout,
                stderr,
            }) => CommandOutcome::TimedOut {
                timeout,
                stdout,
                stderr,
            },
            Err(CaptureError::Spawn(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                CommandOutcome::NotFound {
                    stderr: e.to_string(),
                }
            }
            Err(e) => CommandOutcome::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let ok = CommandOutcome::Exited {
            code: 0,
            stdout: "hi".into(),
            stderr: String::new(),
        };
        assert!(ok.is_success());
        assert_eq!(ok.error_message(), None);

        let failed = CommandOutcome::Exited {
            code: 2,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(failed.error_message().as_deref(), Some("exit code 2"));

        let timed_out = CommandOutcome::TimedOut {
            timeout: Duration::from_secs(30),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(
            timed_out.error_message().as_deref(),
            Some("job timed out after 30s")
        );

        let sub_second = CommandOutcome::TimedOut {
            timeout: Duration::from_millis(200),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(
            sub_second.error_message().as_deref(),
            Some("job timed out after 200ms")
        );

        let missing = CommandOutcome::NotFound {
            stderr: String::new(),
        };
        assert_eq!(missing.error_message().as_deref(), Some("command not found"));

        let broken = CommandOutcome::Failed("pipe closed".into());
        assert_eq!(broken.error_message().as_deref(), Some("pipe closed"));
        assert_eq!(broken.stderr(), "pipe closed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_outcomes() {
        let runner = ShellCommandRunner;
        let timeout = Duration::from_secs(5);

        let ok = runner.run(&"echo hello".into(), timeout).await;
        assert!(ok.is_success());
        assert_eq!(ok.stdout().trim(), "hello");

        let failed = runner.run(&"exit 4".into(), timeout).await;
        assert_eq!(failed.error_message().as_deref(), Some("exit code 4"));

        let missing = runner
            .run(&"definitely-not-a-real-command-queuectl".into(), timeout)
            .await;
        assert!(matches!(missing, CommandOutcome::NotFound { .. }));

        let slow = runner
            .run(&"exec sleep 5".into(), Duration::from_millis(200))
            .await;
        assert!(matches!(slow, CommandOutcome::TimedOut { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_argv_runs_without_shell() {
        let runner = ShellCommandRunner;
        let timeout = Duration::from_secs(5);

        let ok = runner
            .run(&JobCommand::from(["echo", "a  b", "$HOME"]), timeout)
            .await;
        assert!(ok.is_success());
        assert_eq!(ok.stdout(), "a  b $HOME\n");

        // A program's own exit code 127 is not "command not found"
        let exited = runner
            .run(&JobCommand::from(["sh", "-c", "exit 127"]), timeout)
            .await;
        assert_eq!(exited.error_message().as_deref(), Some("exit code 127"));

        let missing = runner
            .run(&JobCommand::from(["definitely-not-a-real-command-queuectl"]), timeout)
            .await;
        assert_eq!(missing.error_message().as_deref(), Some("command not found"));

        let empty = runner.run(&JobCommand::Argv(Vec::new()), timeout).await;
        assert!(matches!(empty, CommandOutcome::Failed(_)));
    }
}
