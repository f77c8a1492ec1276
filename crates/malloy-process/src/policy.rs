//! Restart policy for crashed workers

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often, and how fast, a crashed worker is restarted.
///
/// `max_restarts: None` restarts forever. The counter is reset once a worker
/// has stayed up for `reset_after_ms`, so the bound applies to crash loops
/// rather than to the lifetime of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    /// Maximum consecutive restarts (None = unbounded)
    pub max_restarts: Option<u32>,
    /// First backoff delay
    pub base_backoff_ms: u64,
    /// Backoff ceiling
    pub max_backoff_ms: u64,
    /// Uptime after which the restart counter starts over
    pub reset_after_ms: u64,
}

impl RestartPolicy {
    /// Always restart
    pub fn unbounded() -> Self {
        Self {
            max_restarts: None,
            ..Self::default()
        }
    }

    /// Give up after `max_restarts` consecutive crashes
    pub fn bounded(max_restarts: u32) -> Self {
        Self {
            max_restarts: Some(max_restarts),
            ..Self::default()
        }
    }

    /// Whether another restart is allowed after `restart_count` restarts
    pub fn allows(&self, restart_count: u32) -> bool {
        match self.max_restarts {
            Some(max) => restart_count < max,
            None => true,
        }
    }

    /// Backoff before restart number `attempt`
    /// Formula: min(base * 2^attempt, max_backoff)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let backoff_ms = self
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_backoff_ms);

        Duration::from_millis(backoff_ms)
    }

    /// Uptime that resets the restart counter
    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after_ms)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: None,
            base_backoff_ms: 100,
            max_backoff_ms: 30_000,
            reset_after_ms: 180_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_calculation() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        // Should cap at max
        assert_eq!(policy.backoff(20), Duration::from_millis(30_000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_unbounded_always_allows() {
        let policy = RestartPolicy::unbounded();
        assert!(policy.allows(0));
        assert!(policy.allows(u32::MAX));
    }

    #[test]
    fn test_bounded_limit() {
        let policy = RestartPolicy::bounded(2);
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
    }
}
