//! Bounded Executor - runs allowlisted commands with a hard deadline
//!
//! Every subprocess kioskd starts goes through [`BoundedExecutor::run`]:
//! - The argv is checked against the [`CommandPolicy`] first
//! - The program is spawned directly, never through a shell
//! - stdout and stderr are buffered in full
//! - Exit is raced against a timer; on expiry the child is killed
//!
//! Exactly one of output, timeout, non-zero exit or spawn failure comes
//! back per call. Nothing is retried here; see `retry` for the caller-side
//! layer.

use async_trait::async_trait;
use kiosk_common::{CommandPolicy, ControlError, ControlResult};
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Default deadline for a single subprocess
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(5000);

/// Everything a finished process left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` if the process was terminated by a signal
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Handle to a running subprocess
#[async_trait]
pub trait ChildProcess: Send {
    /// Wait for exit while draining stdout and stderr.
    ///
    /// The executor drops this future when the deadline passes, so
    /// implementations must tolerate being cancelled mid-wait.
    async fn wait_with_output(&mut self) -> io::Result<ProcessOutput>;

    /// Forcibly terminate the process
    async fn kill(&mut self) -> io::Result<()>;
}

/// Starts subprocesses from an already-validated argv
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, command: &str, args: &[String]) -> io::Result<Box<dyn ChildProcess>>;
}

// ============================================================================
// Tokio Spawner (Production)
// ============================================================================

/// Spawns real processes with `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, command: &str, args: &[String]) -> io::Result<Box<dyn ChildProcess>> {
        let child = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        Ok(Box::new(TokioChild { child }))
    }
}

struct TokioChild {
    child: tokio::process::Child,
}

#[async_trait]
impl ChildProcess for TokioChild {
    async fn wait_with_output(&mut self) -> io::Result<ProcessOutput> {
        let stdout = self.child.stdout.take();
        let stderr = self.child.stderr.take();

        let (status, stdout, stderr) =
            tokio::try_join!(self.child.wait(), drain(stdout), drain(stderr))?;

        Ok(ProcessOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

// ============================================================================
// Bounded Executor
// ============================================================================

/// Policy-checked, deadline-bounded command runner
pub struct BoundedExecutor {
    policy: CommandPolicy,
    spawner: Arc<dyn ProcessSpawner>,
    default_timeout: Duration,
}

impl BoundedExecutor {
    pub fn new(policy: CommandPolicy, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            policy,
            spawner,
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, default_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run with the default deadline, returning trimmed stdout
    pub async fn run(&self, command: &str, args: &[&str]) -> ControlResult<String> {
        self.run_with_timeout(command, args, self.default_timeout)
            .await
    }

    /// Run with an explicit deadline, returning trimmed stdout
    pub async fn run_with_timeout(
        &self,
        command: &str,
        args: &[&str],
        limit: Duration,
    ) -> ControlResult<String> {
        let argv: Vec<String> = args.iter().map(|a| a.to_string()).collect();

        if let Err(e) = self.policy.validate(command, &argv) {
            warn!(command, args = ?argv, code = e.code(), "Command rejected by policy");
            return Err(e);
        }

        let started = Instant::now();
        let mut child = match self.spawner.spawn(command, &argv) {
            Ok(child) => child,
            Err(e) => {
                error!(command, args = ?argv, error = %e, "Command could not be spawned");
                return Err(ControlError::SpawnFailed {
                    command: display_argv(command, &argv),
                    reason: e.to_string(),
                });
            }
        };

        let waited = timeout(limit, child.wait_with_output()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let output = match waited {
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(command, error = %e, "Failed to kill timed out command");
                }
                warn!(
                    command,
                    args = ?argv,
                    timeout_ms = limit.as_millis() as u64,
                    "Command timed out"
                );
                return Err(ControlError::CommandTimeout {
                    command: display_argv(command, &argv),
                    timeout_ms: limit.as_millis() as u64,
                });
            }
            Ok(Err(e)) => {
                error!(command, args = ?argv, error = %e, "Command execution error");
                return Err(ControlError::SpawnFailed {
                    command: display_argv(command, &argv),
                    reason: e.to_string(),
                });
            }
            Ok(Ok(output)) => output,
        };

        if output.code == Some(0) {
            info!(command, args = ?argv, elapsed_ms, "Command executed successfully");
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(
            command,
            args = ?argv,
            code = ?output.code,
            elapsed_ms,
            stderr = %stderr,
            "Command failed"
        );
        Err(ControlError::CommandFailed {
            command: display_argv(command, &argv),
            code: output.code,
            stderr,
        })
    }
}

/// Render an argv for messages only. Never executed.
pub fn display_argv(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeBehavior, FakeSpawner};
    use kiosk_common::{AllowlistEntry, ErrorKind};

    fn executor(spawner: FakeSpawner) -> BoundedExecutor {
        BoundedExecutor::new(CommandPolicy::default(), Arc::new(spawner))
    }

    #[tokio::test]
    async fn test_output_is_trimmed() {
        let fake = FakeSpawner::new().with_response(
            "df / --output=size,used,avail",
            FakeBehavior::output("  1K-blocks Used Avail\n 10 5 5 \n\n"),
        );
        let exec = executor(fake);
        let out = exec
            .run("df", &["/", "--output=size,used,avail"])
            .await
            .unwrap();
        assert_eq!(out, "1K-blocks Used Avail\n 10 5 5");
    }

    #[tokio::test]
    async fn test_rejected_command_never_spawns() {
        let fake = FakeSpawner::new();
        let exec = executor(fake.clone());

        let err = exec.run("rm", &["-rf", "/"]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandNotAllowed);

        let err = exec.run("systemctl", &["poweroff"]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandArgsNotAllowed);

        assert!(fake.spawned().is_empty());
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_code_and_stderr() {
        let fake = FakeSpawner::new().with_response(
            "shutdown -c",
            FakeBehavior::exit(1, "Failed to talk to shutdownd\n"),
        );
        let err = executor(fake).run("shutdown", &["-c"]).await.unwrap_err();
        match err {
            ControlError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "Failed to talk to shutdownd");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_signal_exit_is_a_failure() {
        let fake = FakeSpawner::new().with_response("top -bn1", FakeBehavior::Signal);
        let err = executor(fake).run("top", &["-bn1"]).await.unwrap_err();
        assert!(matches!(err, ControlError::CommandFailed { code: None, .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let fake = FakeSpawner::new()
            .with_response("pm-suspend", FakeBehavior::SpawnError(io::ErrorKind::NotFound));
        let err = executor(fake).run("pm-suspend", &[]).await.unwrap_err();
        assert!(matches!(err, ControlError::SpawnFailed { .. }));
        assert_eq!(err.kind(), ErrorKind::CommandFailed);
    }

    #[tokio::test]
    async fn test_timeout_kills_once() {
        let fake = FakeSpawner::new().with_response("top -bn1", FakeBehavior::Hang);
        let exec = executor(fake.clone());

        let started = Instant::now();
        let err = exec
            .run_with_timeout("top", &["-bn1"], Duration::from_millis(50))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(
            err,
            ControlError::CommandTimeout { timeout_ms: 50, .. }
        ));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(1000), "took {elapsed:?}");
        assert_eq!(fake.kill_count("top -bn1"), 1);
    }

    #[tokio::test]
    async fn test_successful_command_is_not_killed() {
        let fake = FakeSpawner::new().with_response(
            "which systemctl",
            FakeBehavior::delayed(Duration::from_millis(10), "/usr/bin/systemctl"),
        );
        let exec = executor(fake.clone());
        let out = exec.run("which", &["systemctl"]).await.unwrap();
        assert_eq!(out, "/usr/bin/systemctl");
        assert_eq!(fake.kill_count("which systemctl"), 0);
    }

    // Real processes through the tokio spawner

    fn real_executor() -> BoundedExecutor {
        let policy = CommandPolicy::from_entries(vec![
            AllowlistEntry::new("echo", &["hello"]),
            AllowlistEntry::new("false", &[]),
            AllowlistEntry::new("sleep", &["10"]),
            AllowlistEntry::new("kioskd-definitely-missing", &[]),
        ]);
        BoundedExecutor::new(policy, Arc::new(TokioSpawner))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_echo() {
        let out = real_executor().run("echo", &["hello"]).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_false() {
        let err = real_executor().run("false", &[]).await.unwrap_err();
        assert!(matches!(err, ControlError::CommandFailed { code: Some(1), .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_missing_binary() {
        let err = real_executor()
            .run("kioskd-definitely-missing", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::SpawnFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_timeout() {
        let started = Instant::now();
        let err = real_executor()
            .run_with_timeout("sleep", &["10"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandTimeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
