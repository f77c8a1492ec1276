//! Worker supervision: state machine plus restart budget

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    child::ManagedChild,
    config::ProcessConfig,
    error::{ProcessError, Result},
    policy::RestartPolicy,
    state::WorkerState,
};

/// Supervises one long-lived worker process.
///
/// The supervisor does not own the running child: `start` hands it to the
/// caller, which wires its stdio into a transport and reports back through
/// `mark_running`, `mark_crashed` and `stop`.
pub struct Supervisor {
    /// Worker name used in logs
    name: String,
    /// How to spawn the worker
    config: ProcessConfig,
    /// Restart budget and backoff
    policy: RestartPolicy,
    /// Consecutive restarts since the last stable run
    restart_count: u32,
    /// When the current run entered `Running`
    running_since: Option<Instant>,
    /// Current state, observable by other tasks
    state_tx: watch::Sender<WorkerState>,
}

impl Supervisor {
    /// Create a stopped supervisor
    pub fn new(name: impl Into<String>, config: ProcessConfig, policy: RestartPolicy) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Stopped);
        Self {
            name: name.into(),
            config,
            policy,
            restart_count: 0,
            running_since: None,
            state_tx,
        }
    }

    /// Worker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> WorkerState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    /// Restarts since the last stable run
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Active restart policy
    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    fn transition(&self, to: WorkerState) -> Result<()> {
        let from = self.state();
        if !from.can_transition_to(to) {
            return Err(ProcessError::InvalidTransition { from, to });
        }
        debug!(worker = %self.name, from = %from, to = %to, "Worker state transition");
        self.state_tx.send_replace(to);
        Ok(())
    }

    /// Spawn the worker (`Stopped | Crashed → Starting`)
    ///
    /// A spawn failure leaves the supervisor in `Crashed` so the restart
    /// policy decides what happens next.
    pub async fn start(&mut self) -> Result<ManagedChild> {
        self.transition(WorkerState::Starting)?;

        match ManagedChild::spawn(self.config.clone()).await {
            Ok(child) => {
                info!(
                    worker = %self.name,
                    pid = child.pid(),
                    restart_count = self.restart_count,
                    "Worker started"
                );
                Ok(child)
            }
            Err(e) => {
                error!(worker = %self.name, error = %e, "Failed to spawn worker");
                self.transition(WorkerState::Crashed)?;
                Err(e)
            }
        }
    }

    /// Handshake finished (`Starting → Running`)
    pub fn mark_running(&mut self) -> Result<()> {
        self.transition(WorkerState::Running)?;
        self.running_since = Some(Instant::now());
        Ok(())
    }

    /// The worker exited or its transport closed unexpectedly
    pub fn mark_crashed(&mut self, reason: &str) -> Result<()> {
        self.transition(WorkerState::Crashed)?;

        if let Some(since) = self.running_since.take() {
            if since.elapsed() >= self.policy.reset_after() {
                debug!(worker = %self.name, "Worker ran long enough, resetting restart count");
                self.restart_count = 0;
            }
        }

        warn!(
            worker = %self.name,
            reason = %reason,
            restart_count = self.restart_count,
            "Worker crashed"
        );
        Ok(())
    }

    /// Check if restart is allowed
    pub fn can_restart(&self) -> bool {
        self.policy.allows(self.restart_count)
    }

    /// Consume one restart from the budget and return the backoff to wait
    pub fn prepare_restart(&mut self) -> Result<Duration> {
        if !self.can_restart() {
            return Err(ProcessError::RestartLimitExceeded {
                max_restarts: self.policy.max_restarts.unwrap_or(u32::MAX),
            });
        }

        let backoff = self.policy.backoff(self.restart_count);
        self.restart_count = self.restart_count.saturating_add(1);

        debug!(
            worker = %self.name,
            restart_count = self.restart_count,
            backoff_ms = backoff.as_millis() as u64,
            "Preparing to restart worker with exponential backoff"
        );

        Ok(backoff)
    }

    /// Stop the worker (`* → Stopping → Stopped`)
    pub async fn stop(&mut self, child: Option<ManagedChild>) -> Result<()> {
        if self.state() == WorkerState::Stopped {
            return Ok(());
        }

        self.transition(WorkerState::Stopping)?;
        self.running_since = None;

        let result = match child {
            Some(mut child) => child.shutdown().await,
            None => Ok(()),
        };

        self.transition(WorkerState::Stopped)?;
        info!(worker = %self.name, "Worker stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor(policy: RestartPolicy) -> Supervisor {
        Supervisor::new("test-worker", ProcessConfig::new("cat"), policy)
    }

    #[test]
    fn test_supervisor_creation() {
        let supervisor = supervisor(RestartPolicy::unbounded());
        assert_eq!(supervisor.state(), WorkerState::Stopped);
        assert_eq!(supervisor.restart_count(), 0);
        assert!(supervisor.can_restart());
    }

    #[test]
    fn test_restart_limit() {
        let mut supervisor = supervisor(RestartPolicy::bounded(2));
        assert!(supervisor.can_restart());

        supervisor.prepare_restart().unwrap();
        assert!(supervisor.can_restart());

        supervisor.prepare_restart().unwrap();
        assert!(!supervisor.can_restart());

        let err = supervisor.prepare_restart().unwrap_err();
        assert!(matches!(
            err,
            ProcessError::RestartLimitExceeded { max_restarts: 2 }
        ));
    }

    #[test]
    fn test_mark_running_requires_start() {
        let mut supervisor = supervisor(RestartPolicy::unbounded());
        let err = supervisor.mark_running().unwrap_err();
        assert!(matches!(
            err,
            ProcessError::InvalidTransition {
                from: WorkerState::Stopped,
                to: WorkerState::Running
            }
        ));
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let mut supervisor = supervisor(RestartPolicy::unbounded());
        supervisor.stop(None).await.unwrap();
        assert_eq!(supervisor.state(), WorkerState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lifecycle_with_crash_and_restart() {
        let mut supervisor = supervisor(RestartPolicy::bounded(3));
        let mut states = supervisor.subscribe();

        let mut child = supervisor.start().await.unwrap();
        assert_eq!(*states.borrow_and_update(), WorkerState::Starting);

        supervisor.mark_running().unwrap();
        assert_eq!(supervisor.state(), WorkerState::Running);

        child.shutdown().await.unwrap();
        supervisor.mark_crashed("exit status 1").unwrap();
        assert_eq!(supervisor.state(), WorkerState::Crashed);

        let backoff = supervisor.prepare_restart().unwrap();
        assert_eq!(backoff, Duration::from_millis(100));

        let child = supervisor.start().await.unwrap();
        supervisor.mark_running().unwrap();
        supervisor.stop(Some(child)).await.unwrap();
        assert_eq!(supervisor.state(), WorkerState::Stopped);
        assert_eq!(supervisor.restart_count(), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_crashed() {
        let mut supervisor = Supervisor::new(
            "missing",
            ProcessConfig::new("definitely-not-a-real-malloy-worker"),
            RestartPolicy::bounded(1),
        );

        assert!(supervisor.start().await.is_err());
        assert_eq!(supervisor.state(), WorkerState::Crashed);

        supervisor.stop(None).await.unwrap();
        assert_eq!(supervisor.state(), WorkerState::Stopped);
    }
}
