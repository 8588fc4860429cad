//! Builder for executing engine processes with a hard timeout.
//!
//! Each process is started in its own process group (unix) so that a timeout
//! can take down the whole tree an engine spawns, not just the direct child.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Default command timeout: 90 seconds.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Default time between the polite and the forceful kill.
const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// How long to wait for stdout/stderr after the process has exited.
/// Grandchildren that inherited the pipes can keep them open indefinitely.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Output captured from a finished process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Why a command did not complete successfully.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The deadline passed. `reclaimed` is false when the process could not
    /// be confirmed dead after SIGKILL.
    #[error("timed out after {}s", after.as_secs())]
    TimedOut { after: Duration, reclaimed: bool },

    #[error("exited with status {status}: {detail}")]
    Exited { status: ExitStatus, detail: String },

    #[error("I/O error waiting for process: {0}")]
    Wait(std::io::Error),
}

/// A builder for constructing and executing engine invocations.
///
/// # Example
///
/// ```no_run
/// use dr_engine::EngineCommand;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), dr_engine::CommandError> {
/// let output = EngineCommand::new("soffice")
///     .arg("--version")
///     .timeout(Duration::from_secs(5))
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EngineCommand {
    program: PathBuf,
    args: Vec<String>,
    envs: HashMap<String, String>,
    timeout: Duration,
    kill_grace: Duration,
}

impl EngineCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Set the wait between SIGTERM and SIGKILL on timeout.
    pub fn kill_grace(&mut self, d: Duration) -> &mut Self {
        self.kill_grace = d;
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// Never returns later than `timeout + 2 * kill_grace` (plus the output
    /// drain window); on timeout the process group is terminated before the
    /// call returns.
    pub async fn execute(&self) -> Result<CommandOutput, CommandError> {
        let program = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();

        tracing::debug!(program = %program, pid = ?pid, args = ?self.args, "Engine process started");

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                // Stragglers left in the group by a well-behaved exit.
                #[cfg(unix)]
                if let Some(pid) = pid {
                    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                }

                let stdout = drain(stdout).await;
                let stderr = drain(stderr).await;

                if !status.success() {
                    let detail = if stderr.trim().is_empty() {
                        stdout.trim().to_string()
                    } else {
                        stderr.trim().to_string()
                    };
                    return Err(CommandError::Exited { status, detail });
                }

                Ok(CommandOutput {
                    status,
                    stdout,
                    stderr,
                })
            }
            Ok(Err(e)) => {
                stdout.abort();
                stderr.abort();
                Err(CommandError::Wait(e))
            }
            Err(_elapsed) => {
                tracing::warn!(
                    program = %program,
                    pid = ?pid,
                    timeout_secs = self.timeout.as_secs(),
                    "Engine process timed out, terminating"
                );
                let reclaimed = terminate(&mut child, pid, self.kill_grace).await;
                stdout.abort();
                stderr.abort();
                if !reclaimed {
                    tracing::error!(program = %program, pid = ?pid, "Engine process survived SIGKILL");
                }
                Err(CommandError::TimedOut {
                    after: self.timeout,
                    reclaimed,
                })
            }
        }
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).to_string()
    })
}

async fn drain(handle: JoinHandle<String>) -> String {
    let abort = handle.abort_handle();
    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, handle).await {
        Ok(Ok(s)) => s,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

/// SIGTERM the group, wait `grace`, then SIGKILL. Returns whether the direct
/// child was confirmed reaped.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) -> bool {
    #[cfg(unix)]
    if let Some(pid) = pid {
        signal_group(pid, nix::sys::signal::Signal::SIGTERM);
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    if let Ok(Ok(_)) = tokio::time::timeout(grace, child.wait()).await {
        // The leader is gone; make sure nothing else in its group survives.
        #[cfg(unix)]
        if let Some(pid) = pid {
            signal_group(pid, nix::sys::signal::Signal::SIGKILL);
        }
        return true;
    }

    #[cfg(unix)]
    if let Some(pid) = pid {
        signal_group(pid, nix::sys::signal::Signal::SIGKILL);
    }
    let _ = child.start_kill();

    matches!(tokio::time::timeout(grace, child.wait()).await, Ok(Ok(_)))
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::debug!(pid, ?signal, error = %e, "Failed to signal process group"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn execute_echo() {
        let output = EngineCommand::new("echo").arg("hello").execute().await;

        match output {
            Ok(out) => {
                assert!(out.status.success());
                assert!(out.stdout.trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[tokio::test]
    async fn execute_nonexistent_program() {
        let result = EngineCommand::new("nonexistent_engine_xyz_12345").execute().await;
        assert!(matches!(result, Err(CommandError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_reports_stderr() {
        let result = EngineCommand::new("sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .execute()
            .await;
        match result {
            Err(CommandError::Exited { status, detail }) => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(detail, "broken");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_fires_and_reclaims() {
        let started = Instant::now();
        let result = EngineCommand::new("sleep")
            .arg("30")
            .timeout(Duration::from_millis(200))
            .kill_grace(Duration::from_millis(500))
            .execute()
            .await;

        match result {
            Err(CommandError::TimedOut { reclaimed, .. }) => assert!(reclaimed),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_escalates_past_ignored_sigterm() {
        let started = Instant::now();
        let result = EngineCommand::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .timeout(Duration::from_millis(200))
            .kill_grace(Duration::from_millis(300))
            .execute()
            .await;

        match result {
            Err(CommandError::TimedOut { reclaimed, .. }) => assert!(reclaimed),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn env_is_passed_through() {
        let out = EngineCommand::new("sh")
            .args(["-c", "printf %s \"$DOCRELAY_TEST\""])
            .env("DOCRELAY_TEST", "present")
            .execute()
            .await
            .unwrap();
        assert_eq!(out.stdout, "present");
    }
}
