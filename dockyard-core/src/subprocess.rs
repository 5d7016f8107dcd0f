//! Uniform invocation of external programs.
//!
//! Several downstream operations (reading a large log file, recursive
//! copy, recursive delete, the sandboxed builder itself) must not stall
//! the scheduler, so they are delegated to child processes rather than
//! performed in-process. This module is the single place that spawns
//! them.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::SubprocessError;

/// Options for a single invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Capture stdout+stderr as a single UTF-8 (lossy) stream.
    pub capture: bool,
    /// Tolerate a non-zero exit: return the code instead of raising.
    pub error_ok: bool,
}

impl RunOptions {
    pub fn capture() -> Self {
        RunOptions { capture: true, error_ok: false }
    }

    pub fn discard() -> Self {
        RunOptions { capture: false, error_ok: false }
    }

    pub fn error_ok(mut self) -> Self {
        self.error_ok = true;
        self
    }
}

/// Outcome of a single invocation that did not raise.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i32,
    pub output: Option<String>,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

const KILL_GRACE: Duration = Duration::from_secs(2);

/// Runs external programs, awaiting them cooperatively and signalling
/// them on cancellation. Input is never passed on stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessRunner;

impl SubprocessRunner {
    pub fn new() -> Self {
        SubprocessRunner
    }

    /// Runs `program` with `args`. `message` is used to build the
    /// human-readable error when the child fails and `options.error_ok`
    /// is false. `cancel` is observed for the whole lifetime of the
    /// child; on cancellation the child's process group is sent SIGTERM,
    /// given a grace period, then SIGKILL, and only then does the call
    /// return with a cancelled `SubprocessError`.
    pub async fn run(
        &self,
        program: &str,
        args: &[&str],
        options: RunOptions,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutput, SubprocessError> {
        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());
        if options.capture {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            SubprocessError::new(format!("{}: failed to start {}: {}", message, program, e), None)
        })?;

        let pid = child.id();

        tokio::select! {
            wait_result = wait_and_collect(&mut child, options.capture) => {
                let (status, output) = wait_result.map_err(|e| {
                    SubprocessError::new(format!("{}: {}", message, e), None)
                })?;
                let exit_code = status.code().unwrap_or(-1);
                if exit_code != 0 && !options.error_ok {
                    return Err(SubprocessError::new(
                        format!("{}: {} exited with code {}", message, program, exit_code),
                        Some(exit_code),
                    ));
                }
                Ok(RunOutput { exit_code, output })
            }
            _ = cancel.cancelled() => {
                terminate(pid);
                let _ = child.wait().await;
                Err(SubprocessError::cancelled(format!(
                    "{}: {} cancelled",
                    message, program
                )))
            }
        }
    }
}

async fn wait_and_collect(
    child: &mut tokio::process::Child,
    capture: bool,
) -> std::io::Result<(std::process::ExitStatus, Option<String>)> {
    if !capture {
        let status = child.wait().await?;
        return Ok((status, None));
    }

    use tokio::io::AsyncReadExt;
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        stdout.read_to_end(&mut stdout_buf).await?;
    }
    if let Some(mut stderr) = child.stderr.take() {
        stderr.read_to_end(&mut stderr_buf).await?;
    }
    let status = child.wait().await?;
    stdout_buf.extend_from_slice(&stderr_buf);
    Ok((status, Some(String::from_utf8_lossy(&stdout_buf).into_owned())))
}

#[cfg(unix)]
fn terminate(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    let pgid = Pid::from_raw(pid as i32);
    if killpg(pgid, Signal::SIGTERM).is_err() {
        return;
    }
    std::thread::spawn(move || {
        std::thread::sleep(KILL_GRACE);
        let _ = killpg(pgid, Signal::SIGKILL);
    });
}

#[cfg(not(unix))]
fn terminate(_pid: Option<u32>) {}
