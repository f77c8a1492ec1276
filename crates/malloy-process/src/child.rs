//! Managed worker process wrapper

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::{
    config::ProcessConfig,
    error::{ProcessError, Result},
};

/// SIGKILL escalation timeout
const SIGKILL_TIMEOUT_MS: u64 = 200;

/// How long shutdown waits for the process to exit
const SHUTDOWN_GRACE_SECS: u64 = 5;

/// Wrapper around tokio::process::Child with lifecycle management
pub struct ManagedChild {
    /// Underlying tokio child process
    child: Child,
    /// Process configuration
    config: ProcessConfig,
    /// Process ID
    pid: u32,
}

impl ManagedChild {
    /// Spawn a worker with piped stdin/stdout for the RPC transport
    pub async fn spawn(config: ProcessConfig) -> Result<Self> {
        config.validate()?;

        debug!(
            command = %config.command,
            args = ?config.args,
            "Spawning worker process"
        );

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);

        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(if config.capture_stderr {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.kill_on_drop(true);

        #[cfg(unix)]
        {
            if config.own_process_group {
                cmd.process_group(0);
            }
        }

        let child = cmd.spawn()?;
        let pid = child.id().ok_or_else(|| ProcessError::Crashed {
            reason: "process exited before its pid could be read".to_string(),
        })?;

        info!(pid = %pid, command = %config.command, "Worker process spawned");

        Ok(Self { child, config, pid })
    }

    /// Get process ID
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Get process configuration
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Check if process is still running
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait for process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().await.map_err(Into::into)
    }

    /// Gracefully shutdown process
    ///
    /// Sends SIGTERM to the process group first (unix), then SIGKILL, then
    /// waits for the exit status.
    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        debug!(pid = %self.pid, "Shutting down worker process");

        #[cfg(unix)]
        {
            if self.config.own_process_group {
                self.signal_group().await;
            }
        }

        if self.is_running() {
            if let Err(e) = self.child.kill().await {
                warn!(pid = %self.pid, error = %e, "Failed to kill process");
                return Err(ProcessError::KillFailed(e.to_string()));
            }
        }

        let timeout = Duration::from_secs(SHUTDOWN_GRACE_SECS);
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid = %self.pid, status = %status, "Worker process shut down");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(pid = %self.pid, error = %e, "Error waiting for process");
                Err(ProcessError::KillFailed(e.to_string()))
            }
            Err(_) => {
                warn!(pid = %self.pid, "Timeout waiting for process to exit");
                Err(ProcessError::Timeout {
                    seconds: timeout.as_secs(),
                })
            }
        }
    }

    /// SIGTERM then SIGKILL to the worker's process group
    #[cfg(unix)]
    async fn signal_group(&mut self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let pgid = Pid::from_raw(self.pid as i32);

        match killpg(pgid, Signal::SIGTERM) {
            Ok(_) => debug!(pid = %self.pid, "Sent SIGTERM to process group"),
            Err(e) => {
                warn!(pid = %self.pid, error = %e, "Failed to send SIGTERM to process group");
                return;
            }
        }

        tokio::time::sleep(Duration::from_millis(SIGKILL_TIMEOUT_MS)).await;

        if self.is_running() {
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                warn!(pid = %self.pid, error = %e, "Failed to send SIGKILL to process group");
            }
        }
    }

    /// Take stdin handle
    pub fn stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take stdout handle
    pub fn stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take stderr handle
    pub fn stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_and_wait() {
        let config = ProcessConfig::new("sh").args(["-c", "exit 3"]);

        let mut child = ManagedChild::spawn(config).await.unwrap();
        assert!(child.pid() > 0);

        let status = child.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
        assert!(!child.is_running());
    }

    #[tokio::test]
    async fn test_shutdown() {
        let config = ProcessConfig::new("sleep").args(["10"]);

        let mut child = ManagedChild::spawn(config).await.unwrap();
        assert!(child.is_running());

        child.shutdown().await.unwrap();
        assert!(!child.is_running());
    }

    #[tokio::test]
    async fn test_stdio_taken_once() {
        let config = ProcessConfig::new("cat");

        let mut child = ManagedChild::spawn(config).await.unwrap();
        assert!(child.stdin().is_some());
        assert!(child.stdin().is_none());
        assert!(child.stdout().is_some());
        assert!(child.stderr().is_some());

        child.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let config = ProcessConfig::new("definitely-not-a-real-malloy-worker");
        let result = ManagedChild::spawn(config).await;
        assert!(matches!(result, Err(ProcessError::SpawnFailed(_))));
    }
}
