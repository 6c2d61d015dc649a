//! System Controller - the public operation surface
//!
//! Power operations (sleep, restart, shutdown, cancel) run one at a time
//! under a single FIFO lock that also owns the [`SystemState`]. A second
//! caller waits until the first has finished, including its state cleanup.
//!
//! Once the lock is acquired the operation body runs in its own task that
//! holds the lock guard. Dropping the caller's future (a client timeout or
//! disconnect) does not stop that task, so the state always ends up where
//! the operation leaves it. A caller dropped while still queued for the
//! lock never starts its operation.
//!
//! Status and health never take that lock. They read the most recently
//! published state snapshot instead, so they stay available while a power
//! operation is waiting on a subprocess.

use crate::diagnostics::{DiagnosticsCollector, HostIntrospection, SysinfoHost};
use crate::executor::{BoundedExecutor, ProcessSpawner, TokioSpawner};
use crate::health::HealthEvaluator;
use crate::state::{Operation, SystemState};
use kiosk_common::{Config, ControlError, ControlResult, HealthCheckResult, SystemStatus};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::{error, info};

pub struct SystemController {
    state: Arc<Mutex<SystemState>>,
    worker: PowerWorker,
    diagnostics: Arc<DiagnosticsCollector>,
    health: HealthEvaluator,
}

impl SystemController {
    pub fn new(
        config: &Config,
        spawner: Arc<dyn ProcessSpawner>,
        host: Arc<dyn HostIntrospection>,
    ) -> Self {
        let executor = Arc::new(
            BoundedExecutor::new(config.command_policy(), spawner)
                .with_default_timeout(config.executor.command_timeout()),
        );
        let diagnostics = Arc::new(DiagnosticsCollector::new(
            Arc::clone(&executor),
            host,
            config.diagnostics.thermal_path.clone(),
        ));
        let health = HealthEvaluator::new(Arc::clone(&diagnostics), config.health);
        let (published, _) = watch::channel(SystemState::new());

        Self {
            state: Arc::new(Mutex::new(SystemState::new())),
            worker: PowerWorker {
                executor,
                published: Arc::new(published),
            },
            diagnostics,
            health,
        }
    }

    /// Controller backed by real processes and `sysinfo`
    pub fn from_config(config: &Config) -> Self {
        Self::new(config, Arc::new(TokioSpawner), Arc::new(SysinfoHost::new()))
    }

    pub fn executor(&self) -> &BoundedExecutor {
        &self.worker.executor
    }

    /// Best-effort snapshot; may be mid-transition
    pub fn state(&self) -> SystemState {
        *self.worker.published.borrow()
    }

    /// Receive every published state change
    pub fn subscribe(&self) -> watch::Receiver<SystemState> {
        self.worker.published.subscribe()
    }

    // ------------------------------------------------------------------
    // Read-only operations
    // ------------------------------------------------------------------

    pub async fn status(&self) -> ControlResult<SystemStatus> {
        self.diagnostics.status().await
    }

    pub async fn health_check(&self) -> HealthCheckResult {
        self.health.health_check().await
    }

    // ------------------------------------------------------------------
    // Power operations
    // ------------------------------------------------------------------

    /// Suspend the machine. The sleeping flag is cleared when the suspend
    /// call returns, whatever the outcome.
    pub async fn sleep(&self) -> ControlResult<()> {
        self.exclusive("sleep", |worker, mut state| async move {
            worker.sleep(&mut state).await
        })
        .await
    }

    pub async fn restart(&self) -> ControlResult<()> {
        self.exclusive("restart", |worker, mut state| async move {
            worker
                .request_power_action(&mut state, Operation::Restart, &["-r", "now"])
                .await
        })
        .await
    }

    pub async fn shutdown(&self) -> ControlResult<()> {
        self.exclusive("shutdown", |worker, mut state| async move {
            worker
                .request_power_action(&mut state, Operation::Shutdown, &["-h", "now"])
                .await
        })
        .await
    }

    /// Cancel a pending restart or shutdown. Succeeds without touching the
    /// OS when nothing is pending.
    pub async fn cancel_shutdown(&self) -> ControlResult<()> {
        self.exclusive("cancel_shutdown", |worker, mut state| async move {
            worker.cancel_shutdown(&mut state).await
        })
        .await
    }

    /// Wait for the lock, then run `body` to completion in its own task
    async fn exclusive<F, Fut>(&self, operation: &'static str, body: F) -> ControlResult<()>
    where
        F: FnOnce(PowerWorker, OwnedMutexGuard<SystemState>) -> Fut,
        Fut: Future<Output = ControlResult<()>> + Send + 'static,
    {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let task = tokio::spawn(body(self.worker.clone(), guard));

        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(operation, error = %e, "Power operation task ended abnormally");
                Err(ControlError::OperationInterrupted {
                    operation: operation.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Everything an operation body needs once it holds the lock
#[derive(Clone)]
struct PowerWorker {
    executor: Arc<BoundedExecutor>,
    published: Arc<watch::Sender<SystemState>>,
}

impl PowerWorker {
    async fn sleep(&self, state: &mut SystemState) -> ControlResult<()> {
        if let Err(e) = state.begin(Operation::Sleep) {
            error!(code = e.code(), error = %e, "Failed to suspend system");
            return Err(e);
        }
        self.publish(state);
        info!("Suspending system");

        let result = self.suspend().await;

        state.finish_sleep();
        self.publish(state);

        match &result {
            Ok(()) => info!("System resumed from suspend"),
            Err(e) => error!(code = e.code(), error = %e, "Failed to suspend system"),
        }
        result
    }

    async fn cancel_shutdown(&self, state: &mut SystemState) -> ControlResult<()> {
        if !state.has_pending_action() {
            info!("No pending shutdown or restart to cancel");
            return Ok(());
        }

        let phase = state.phase();
        if let Err(e) = self.executor.run("shutdown", &["-c"]).await {
            error!(code = e.code(), error = %e, pending = %phase, "Failed to cancel shutdown");
            return Err(e);
        }

        state.cancel_pending();
        self.publish(state);
        info!(cancelled = %phase, "Pending power action cancelled");
        Ok(())
    }

    async fn request_power_action(
        &self,
        state: &mut SystemState,
        operation: Operation,
        args: &[&str],
    ) -> ControlResult<()> {
        if let Err(e) = state.begin(operation) {
            error!(operation = operation.as_str(), code = e.code(), error = %e, "Power action refused");
            return Err(e);
        }
        self.publish(state);
        info!(operation = operation.as_str(), "Requesting power action");

        match self.executor.run("shutdown", args).await {
            Ok(_) => {
                info!(
                    operation = operation.as_str(),
                    "Power action requested; pending until cancelled"
                );
                Ok(())
            }
            Err(e @ ControlError::CommandTimeout { .. }) => {
                // The OS may already have accepted the request
                error!(
                    operation = operation.as_str(),
                    error = %e,
                    "Power action timed out; left pending until cancelled"
                );
                Err(e)
            }
            Err(e) => {
                state.abort(operation);
                self.publish(state);
                error!(operation = operation.as_str(), code = e.code(), error = %e, "Power action failed");
                Err(e)
            }
        }
    }

    /// `systemctl suspend` when available, `pm-suspend` otherwise
    async fn suspend(&self) -> ControlResult<()> {
        if self.command_available("systemctl").await {
            self.executor.run("systemctl", &["suspend"]).await?;
            return Ok(());
        }

        if self.command_available("pm-suspend").await {
            self.executor.run("pm-suspend", &[]).await?;
            return Ok(());
        }

        Err(ControlError::SuspendUnavailable)
    }

    async fn command_available(&self, command: &str) -> bool {
        self.executor.run("which", &[command]).await.is_ok()
    }

    fn publish(&self, state: &SystemState) {
        self.published.send_replace(*state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeBehavior, FakeHost, FakeSpawner};
    use crate::state::Phase;
    use kiosk_common::ErrorKind;
    use std::time::Duration;

    fn controller(spawner: &FakeSpawner) -> SystemController {
        SystemController::new(
            &Config::default(),
            Arc::new(spawner.clone()),
            Arc::new(FakeHost::default()),
        )
    }

    #[tokio::test]
    async fn test_shutdown_stays_pending() {
        let fake = FakeSpawner::new().with_response("shutdown -h now", FakeBehavior::output(""));
        let ctl = controller(&fake);

        ctl.shutdown().await.unwrap();
        assert_eq!(ctl.state().phase(), Phase::ShuttingDown);
    }

    #[tokio::test]
    async fn test_failed_request_returns_to_idle() {
        let fake = FakeSpawner::new()
            .with_response("shutdown -r now", FakeBehavior::exit(1, "Access denied"));
        let ctl = controller(&fake);

        let err = ctl.restart().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandFailed);
        assert!(ctl.state().is_idle());
    }

    #[tokio::test]
    async fn test_timed_out_request_stays_pending() {
        let fake = FakeSpawner::new().with_response("shutdown -h now", FakeBehavior::Hang);
        let mut config = Config::default();
        config.executor.command_timeout_ms = 20;
        let ctl = SystemController::new(
            &config,
            Arc::new(fake.clone()),
            Arc::new(FakeHost::default()),
        );

        let err = ctl.shutdown().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandTimeout);
        assert!(ctl.state().is_shutting_down());
        assert_eq!(fake.kill_count("shutdown -h now"), 1);
    }

    #[tokio::test]
    async fn test_sleep_prefers_systemctl() {
        let fake = FakeSpawner::new()
            .with_response("which systemctl", FakeBehavior::output("/usr/bin/systemctl"))
            .with_response("systemctl suspend", FakeBehavior::output(""));
        let ctl = controller(&fake);

        ctl.sleep().await.unwrap();
        assert!(ctl.state().is_idle());
        assert_eq!(
            fake.spawned(),
            vec!["which systemctl".to_string(), "systemctl suspend".to_string()]
        );
    }

    #[tokio::test]
    async fn test_sleep_falls_back_to_pm_suspend() {
        let fake = FakeSpawner::new()
            .with_response("which systemctl", FakeBehavior::exit(1, ""))
            .with_response("which pm-suspend", FakeBehavior::output("/usr/sbin/pm-suspend"))
            .with_response("pm-suspend", FakeBehavior::output(""));
        let ctl = controller(&fake);

        ctl.sleep().await.unwrap();
        assert_eq!(fake.spawn_count("pm-suspend"), 1);
        assert_eq!(fake.spawn_count("systemctl suspend"), 0);
    }

    #[tokio::test]
    async fn test_sleep_without_mechanism() {
        let fake = FakeSpawner::new()
            .with_response("which systemctl", FakeBehavior::exit(1, ""))
            .with_response("which pm-suspend", FakeBehavior::exit(1, ""));
        let ctl = controller(&fake);

        let err = ctl.sleep().await.unwrap_err();
        assert_eq!(err, ControlError::SuspendUnavailable);
        assert!(ctl.state().is_idle());
    }

    #[tokio::test]
    async fn test_failed_suspend_clears_sleeping() {
        let fake = FakeSpawner::new()
            .with_response("which systemctl", FakeBehavior::output("/usr/bin/systemctl"))
            .with_response("systemctl suspend", FakeBehavior::exit(1, "Sleep verb not supported"));
        let ctl = controller(&fake);

        assert!(ctl.sleep().await.is_err());
        assert!(ctl.state().is_idle());
    }

    #[tokio::test]
    async fn test_cancel_while_idle_is_a_no_op() {
        let fake = FakeSpawner::new();
        let ctl = controller(&fake);

        ctl.cancel_shutdown().await.unwrap();
        assert!(ctl.state().is_idle());
        assert!(fake.spawned().is_empty());
    }

    #[tokio::test]
    async fn test_failed_cancel_keeps_pending() {
        let fake = FakeSpawner::new()
            .with_response("shutdown -h now", FakeBehavior::output(""))
            .with_response("shutdown -c", FakeBehavior::exit(1, "no scheduled shutdown"));
        let ctl = controller(&fake);

        ctl.shutdown().await.unwrap();
        assert!(ctl.cancel_shutdown().await.is_err());
        assert!(ctl.state().is_shutting_down());
    }

    #[tokio::test]
    async fn test_sleep_is_visible_to_readers() {
        let fake = FakeSpawner::new()
            .with_response("which systemctl", FakeBehavior::output("/usr/bin/systemctl"))
            .with_response(
                "systemctl suspend",
                FakeBehavior::delayed(Duration::from_millis(100), ""),
            );
        let ctl = controller(&fake);

        let (result, observed) = tokio::join!(ctl.sleep(), async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            ctl.state()
        });

        result.unwrap();
        assert_eq!(observed.phase(), Phase::Sleeping);
        assert!(ctl.state().is_idle());
    }
}
