//! Worker lifecycle state machine

use std::fmt;

/// State of a supervised worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Not started
    Stopped,
    /// Process spawned, handshake in progress
    Starting,
    /// Handshake complete, serving requests
    Running,
    /// Exited unexpectedly (restart pending)
    Crashed,
    /// Shutdown requested
    Stopping,
}

impl WorkerState {
    /// Whether `self -> next` is an edge of the lifecycle graph
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Crashed)
                | (Starting, Stopping)
                | (Running, Crashed)
                | (Running, Stopping)
                | (Crashed, Starting)
                | (Crashed, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Requests can only be served in this state
    pub fn is_running(self) -> bool {
        self == WorkerState::Running
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Stopped => "stopped",
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Crashed => "crashed",
            WorkerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}
