//! Small process-related helpers shared across the workspace.
//!
//! The main entry point is [`capture_with_timeout`], which runs a prepared
//! command to completion (or until its deadline), collecting stdout and
//! stderr as text.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// How long to wait for pipe readers after a timed-out child was killed.
///
/// Grandchildren started through a shell may keep the pipes open after the
/// shell itself is gone; past this grace period their output is abandoned.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Build a command that runs `command_line` through the platform shell
/// (`sh -c` on Unix, `cmd /C` on Windows).
pub fn shell_command(command_line: &str) -> Command {
    #[cfg(windows)]
    let mut cmd = {
        let mut c = Command::new("cmd");
        c.args(["/C", command_line]);
        c
    };

    #[cfg(not(windows))]
    let mut cmd = {
        let mut c = Command::new("sh");
        c.args(["-c", command_line]);
        c
    };

    cmd.no_window();
    cmd
}

/// Build a command that runs `program` with `args` directly, without a shell.
pub fn argv_command<I, S>(program: impl AsRef<OsStr>, args: I) -> Command
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.no_window();
    cmd
}

/// Output of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// Exit code, or `-1` when the process was terminated by a signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

/// Reasons a captured run did not produce an exit status.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("process timed out after {timeout:?}")]
    TimedOut {
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
}

fn spawn_reader<R>(reader: Option<R>) -> Option<JoinHandle<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    reader.map(|mut r| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = r.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

async fn join_reader(handle: Option<JoinHandle<String>>, grace: Option<Duration>) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    match grace {
        Some(grace) => match tokio::time::timeout(grace, handle).await {
            Ok(Ok(text)) => text,
            _ => String::new(),
        },
        None => handle.await.unwrap_or_default(),
    }
}

/// Kill every process in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pgid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    // ESRCH just means the group is already gone
    let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Run `cmd` with piped stdout/stderr, killing it if it outlives `timeout`.
///
/// On Unix the child leads its own process group and the whole group is
/// killed on timeout, so processes it started do not outlive the deadline.
pub async fn capture_with_timeout(
    mut cmd: Command,
    timeout: Duration,
) -> Result<CapturedOutput, CaptureError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(CaptureError::Spawn)?;
    let pid = child.id();
    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    let waited = tokio::time::timeout(timeout, child.wait()).await;
    match waited {
        Ok(Ok(status)) => Ok(CapturedOutput {
            status,
            stdout: join_reader(stdout, None).await,
            stderr: join_reader(stderr, None).await,
        }),
        Ok(Err(e)) => Err(CaptureError::Wait(e)),
        Err(_) => {
            kill_process_group(pid);
            let _ = child.kill().await;
            Err(CaptureError::TimedOut {
                timeout,
                stdout: join_reader(stdout, Some(PIPE_DRAIN_GRACE)).await,
                stderr: join_reader(stderr, Some(PIPE_DRAIN_GRACE)).await,
            })
        }
    }
}
