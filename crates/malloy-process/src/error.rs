//! Error types for worker process management

use std::io;
use thiserror::Error;

use crate::state::WorkerState;

/// Process management errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Failed to spawn process
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[from] io::Error),

    /// Process did not exit within the shutdown grace period
    #[error("Process timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Process crashed or exited unexpectedly
    #[error("Process crashed: {reason}")]
    Crashed { reason: String },

    /// Failed to kill process
    #[error("Failed to kill process: {0}")]
    KillFailed(String),

    /// Invalid configuration
    #[error("Invalid process configuration: {0}")]
    InvalidConfig(String),

    /// State machine violation
    #[error("Invalid worker state transition: {from} -> {to}")]
    InvalidTransition { from: WorkerState, to: WorkerState },

    /// Restart budget exhausted
    #[error("Max restart attempts ({max_restarts}) exceeded")]
    RestartLimitExceeded { max_restarts: u32 },
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;
