//! Bounded external command execution
//!
//! Every privileged backend is invoked through [`run`]: spawn, poll, kill on
//! deadline. Nothing in here retries; the operations behind these commands
//! mutate system state, so retry is always a caller decision.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{ControlError, Result};

/// Default deadline for a single external command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_DETAIL_CHARS: usize = 1024;

/// Captured result of one external command
#[derive(Debug)]
pub struct Outcome {
    /// Exit code, `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Outcome {
    /// Exit code 0
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// One-line failure description with captured stderr
    #[must_use]
    pub fn describe_failure(&self) -> String {
        let status = match self.exit_code {
            Some(code) => format!("exit status {code}"),
            None => "killed by signal".to_string(),
        };
        let stderr: String = self.stderr.trim().chars().take(MAX_DETAIL_CHARS).collect();
        if stderr.is_empty() {
            status
        } else {
            format!("{status}: {stderr}")
        }
    }
}

/// Run a command and wait for it to exit, fail, or hit the deadline
///
/// The subprocess gets a null stdin and `LC_ALL=C` so its output stays
/// parseable. Both output pipes are drained on reader threads while the
/// child runs. On timeout the child is killed and reaped before the error
/// is returned. Nonzero exits are not an error here; callers classify the
/// returned [`Outcome`].
///
/// # Errors
///
/// [`ControlError::TimedOut`] when the deadline elapses,
/// [`ControlError::OperationFailed`] when the process cannot be spawned or
/// polled.
pub fn run(program: &Path, args: &[&str], timeout: Duration) -> Result<Outcome> {
    let action = action_label(program, args);
    debug!("running `{}` with {:?} deadline", action, timeout);

    let mut child = Command::new(program)
        .args(args)
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ControlError::operation_failed(&action, format!("spawn failed: {e}")))?;

    // A pipe holds 64 KiB; a child that fills one blocks until somebody
    // reads, so collection cannot wait until after exit.
    let stdout = spawn_drain(child.stdout.take());
    let stderr = spawn_drain(child.stderr.take());

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                // Detach the drain threads instead of joining: a surviving
                // descendant can hold the pipes open indefinitely, and the
                // captured output is discarded on this path anyway.
                drop(stdout);
                drop(stderr);
                return Err(ControlError::operation_failed(
                    &action,
                    format!("wait failed: {e}"),
                ));
            }
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            // Detach rather than join: the killed child's descendants may
            // keep the pipes open past the deadline, and this path does not
            // use the captured output.
            drop(stdout);
            drop(stderr);
            return Err(ControlError::TimedOut {
                action,
                timeout_secs: timeout.as_secs(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(Outcome {
        exit_code: status.code(),
        stdout: join_output(stdout),
        stderr: join_output(stderr),
    })
}

fn spawn_drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_output(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Run a command and require exit code 0
///
/// Folds a nonzero exit into [`ControlError::OperationFailed`] under the
/// given action name, keeping the captured stderr as the detail.
pub fn run_ok(program: &Path, args: &[&str], timeout: Duration, action: &str) -> Result<Outcome> {
    let outcome = run(program, args, timeout)?;
    if outcome.success() {
        Ok(outcome)
    } else {
        Err(ControlError::operation_failed(
            action,
            outcome.describe_failure(),
        ))
    }
}

fn action_label(program: &Path, args: &[&str]) -> String {
    let name = program
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());
    if args.is_empty() {
        name
    } else {
        format!("{name} {}", args.join(" "))
    }
}
